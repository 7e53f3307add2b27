//! Dispatch states and completion events

use crate::collision::UnitMask;
use crate::pool::BufferId;
use crate::regs;

/// Dispatch scheduler states
///
/// Selection, co-processing and programming run to completion inside one
/// [`drive`](super::Engine::drive) call; the `Awaiting*` states are where
/// the scheduler parks until a completion event frees the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Picking the next request and folding compatible ones into it
    SelectingCandidate,
    /// Candidate chosen, working buffer still occupied
    AwaitingWorkingBuffer(BufferId),
    /// Candidate's pixels going through the co-processor
    PipelineProcessing(BufferId),
    /// Processed candidate waiting for a free execution unit
    AwaitingExecutionUnit(BufferId),
    /// Waiting for the last unit to finish before using another
    AwaitingLastUnit(BufferId),
    /// Unit picked, waiting for a frame boundary before programming
    AwaitingFrameEnd(BufferId, usize),
    /// Whitening fill running on the unit before the candidate itself
    AwaitingFill(BufferId, usize),
    /// Writing the update registers for the candidate on the unit
    Programming(BufferId, usize),
}

impl DispatchState {
    /// Buffer the scheduler is working on, if any
    pub fn candidate(&self) -> Option<BufferId> {
        match *self {
            DispatchState::Idle | DispatchState::SelectingCandidate => None,
            DispatchState::AwaitingWorkingBuffer(id)
            | DispatchState::PipelineProcessing(id)
            | DispatchState::AwaitingExecutionUnit(id)
            | DispatchState::AwaitingLastUnit(id)
            | DispatchState::AwaitingFrameEnd(id, _)
            | DispatchState::AwaitingFill(id, _)
            | DispatchState::Programming(id, _) => Some(id),
        }
    }
}

/// Resource the scheduler is parked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitReason {
    WorkingBuffer,
    ExecutionUnit,
    LastUnit,
    FrameEnd,
    Fill,
}

/// Result of one [`drive`](super::Engine::drive) call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveOutcome {
    /// No dispatchable work left
    Idle,
    /// Parked until a completion event
    Suspended(WaitReason),
}

/// Decoded completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completion {
    /// Execution units that finished
    pub units: UnitMask,
    /// Working buffer finished its pass
    pub working_buffer: bool,
    /// Units the working buffer pass collided with, if the hardware said so
    pub collision: Option<UnitMask>,
    pub frame_end: bool,
    /// Timing controller underrun
    pub underrun: bool,
}

impl Completion {
    /// Decode acknowledged interrupt status
    pub fn from_status(status: u32, collision_units: u32) -> Self {
        Self {
            units: UnitMask::from_bits((status & regs::IRQ_LUT_MASK) as u16),
            working_buffer: status & regs::IRQ_WB_CMPLT != 0,
            collision: (status & regs::IRQ_LUT_COL != 0)
                .then_some(UnitMask::from_bits(collision_units as u16)),
            frame_end: status & regs::IRQ_FRAME_END != 0,
            underrun: status & regs::IRQ_TCE_UNDERRUN != 0,
        }
    }

    pub fn unit(unit: usize) -> Self {
        Self {
            units: UnitMask::single(unit),
            ..Self::default()
        }
    }

    pub fn working_buffer() -> Self {
        Self {
            working_buffer: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
            && !self.working_buffer
            && self.collision.is_none()
            && !self.frame_end
            && !self.underrun
    }
}

/// What a completion event changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompletionOutcome {
    /// Units retired by this event
    pub retired: UnitMask,
    /// Engine is now fully drained
    pub quiescent: bool,
    /// Power-down was scheduled, to run after this many milliseconds
    pub power_down_after_ms: Option<u32>,
}

/// Power request from a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerHint {
    /// Bring the panel up ahead of updates
    On,
    /// Power down now if nothing is in flight
    Off,
}

/// Running counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineStats {
    pub submitted: u32,
    pub merged: u32,
    pub dispatched: u32,
    pub collisions: u32,
    pub pipeline_timeouts: u32,
    pub power_failures: u32,
    pub underruns: u32,
    pub missed_frame_ends: u32,
}
