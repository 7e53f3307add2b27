//! Update engine
//!
//! One `Engine` per display. It owns the buffer pool, the execution unit
//! table, markers and the power sequencer, plus the board collaborators.
//! All entry points take `&mut self`; whoever embeds the engine provides
//! the single lock that serializes admission, completion handling and
//! dispatch.

mod admission;
mod completion;
mod dispatch;
pub mod state;

pub use admission::Admission;
pub use state::{
    Completion, CompletionOutcome, DispatchState, DriveOutcome, EngineStats, PowerHint,
    WaitReason,
};

use crate::collision::{UnitMask, UnitTable};
use crate::config::{EngineConfig, UpdateScheme};
use crate::error::Error;
use crate::geometry::{Rect, Rotation};
use crate::markers::MarkerTable;
use crate::pool::{BufferId, BufferPool, PoolCounts};
use crate::power::{PowerSequencer, PowerState};
use crate::regs;
use crate::temperature::{TemperatureTable, DEFAULT_TEMPERATURE_C};
use crate::traits::{ImagePipeline, PowerRails, RegisterBus, TemperatureSensor};
use crate::update::{Marker, UpdateRequest};
use crate::waveform::WaveformModes;

/// Interrupts enabled whenever the engine is initialized
const BASE_IRQ_MASK: u32 = regs::IRQ_TCE_UNDERRUN;

/// E-paper update engine
pub struct Engine<R, P, S, X> {
    config: EngineConfig,
    regs: R,
    rails: P,
    sensor: S,
    pipeline: X,

    /// Waveform data installed
    ready: bool,
    temperatures: TemperatureTable,
    ambient_index: usize,
    ambient_override: Option<i32>,

    pool: BufferPool,
    units: UnitTable,
    markers: MarkerTable,
    power: PowerSequencer,

    dispatch: DispatchState,
    /// Buffer whose pixels the working buffer is processing
    working: Option<BufferId>,
    /// Units retired while the working buffer was busy
    completed_during_wb: UnitMask,
    /// Whitening candidate whose fill already ran
    filled: Option<BufferId>,
    frame_end_seen: bool,
    irq_mask: u32,

    next_order: u32,
    /// Inside the forced whitening phase
    whitening: bool,
    /// Bumped on every state change callers might wait for
    epoch: u32,
    stats: EngineStats,
}

impl<R, P, S, X> Engine<R, P, S, X>
where
    R: RegisterBus,
    P: PowerRails,
    S: TemperatureSensor,
    X: ImagePipeline,
{
    /// Create an engine; it accepts no work until waveform data is installed
    pub fn new(config: EngineConfig, regs: R, rails: P, sensor: S, pipeline: X) -> Self {
        let pool = BufferPool::new(config.buffer_base, config.buffer_stride);
        let power = PowerSequencer::new(config.lockout_threshold);
        Self {
            config,
            regs,
            rails,
            sensor,
            pipeline,
            ready: false,
            temperatures: TemperatureTable::default(),
            ambient_index: 0,
            ambient_override: None,
            pool,
            units: UnitTable::new(),
            markers: MarkerTable::new(),
            power,
            dispatch: DispatchState::Idle,
            working: None,
            completed_during_wb: UnitMask::EMPTY,
            filled: None,
            frame_end_seen: false,
            irq_mask: 0,
            next_order: 0,
            whitening: false,
            epoch: 0,
            stats: EngineStats::default(),
        }
    }

    /// Install waveform data and start accepting work
    pub fn install_waveform(&mut self, temperatures: TemperatureTable, modes: WaveformModes) {
        self.temperatures = temperatures;
        self.config.waveform_modes = modes;
        let temp = self.ambient_override.unwrap_or(DEFAULT_TEMPERATURE_C);
        self.ambient_index = self.temperatures.index_for(temp);
        self.set_irq_mask(BASE_IRQ_MASK);
        self.ready = true;
        info!(
            "waveform installed, {} temperature ranges",
            self.temperatures.len()
        );
    }

    /// Stop accepting work and cut panel power
    ///
    /// Callers drain first; anything still in flight is left to finish.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.ready = false;
        self.set_irq_mask(0);
        self.power.power_down_now(&mut self.rails)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Display rectangle in caller coordinates
    pub fn display_rect(&self) -> Rect {
        self.config.panel.display_rect(self.config.rotation)
    }

    /// Nothing queued, colliding, dispatching or running
    pub fn is_quiescent(&self) -> bool {
        self.pool.is_drained()
            && !self.units.any_busy()
            && self.working.is_none()
            && self.dispatch == DispatchState::Idle
    }

    /// True while a request carrying `marker` has not completed
    pub fn is_marker_pending(&self, marker: Marker) -> bool {
        self.markers.is_pending(marker)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_counts(&self) -> PoolCounts {
        self.pool.counts()
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatch
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Change counter, bumped whenever waiters should re-check
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Temperature range index used for updates without an override
    pub fn temperature_index(&self) -> usize {
        self.ambient_index
    }

    /// Compensate for `temp_c` instead of the sensor until cleared
    pub fn set_temperature_override(&mut self, temp_c: i32) {
        self.ambient_override = Some(temp_c);
        self.ambient_index = self.temperatures.index_for(temp_c);
    }

    /// Go back to reading the sensor after each co-processor job
    pub fn clear_temperature_override(&mut self) {
        self.ambient_override = None;
    }

    /// Switch update scheme; callers drain first
    pub fn set_scheme(&mut self, scheme: UpdateScheme) {
        if !self.is_quiescent() {
            warn!("scheme changed with work in flight");
        }
        self.config.scheme = scheme;
    }

    /// Switch display rotation; callers drain first
    pub fn set_rotation(&mut self, rotation: Rotation) {
        if !self.is_quiescent() {
            warn!("rotation changed with work in flight");
        }
        self.config.rotation = rotation;
    }

    /// Client power request
    pub fn power_hint(&mut self, hint: PowerHint) -> Result<(), Error> {
        match hint {
            PowerHint::On => self.ensure_power(),
            PowerHint::Off => {
                if self.is_quiescent() {
                    self.power.power_down_now(&mut self.rails)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Run a power-down scheduled by a completion event
    ///
    /// No-op if something powered the panel back up in the meantime.
    pub fn complete_power_down(&mut self) -> Result<(), Error> {
        let result = self.power.complete_power_down(&mut self.rails);
        self.bump();
        result
    }

    /// Clear a thermal lockout
    pub fn reset_lockout(&mut self) -> Result<(), Error> {
        self.power.reset_lockout(&mut self.rails)
    }

    fn ensure_power(&mut self) -> Result<(), Error> {
        if self.power.is_on() {
            return Ok(());
        }
        let result = self.power.power_up(&mut self.rails);
        if result == Err(Error::PowerSequenceFailure) {
            self.stats.power_failures += 1;
        }
        result
    }

    fn set_irq_mask(&mut self, mask: u32) {
        self.irq_mask = mask;
        self.regs.write(regs::IRQ_MASK, mask);
    }

    fn bump(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Request region mapped to panel coordinates
    fn panel_region(&self, request: &UpdateRequest) -> Rect {
        let (xres, yres) = self.config.panel.display_size(self.config.rotation);
        request.region.rotated(self.config.rotation, xres, yres)
    }

    /// Re-read the ambient temperature unless overridden
    fn refresh_ambient(&mut self) {
        if let Some(temp) = self.ambient_override {
            self.ambient_index = self.temperatures.index_for(temp);
            return;
        }
        match self.sensor.read_celsius() {
            Ok(temp) => {
                self.ambient_index = self.temperatures.index_for(temp);
                trace!("ambient {} C, index {}", temp, self.ambient_index);
            }
            Err(e) => warn!("temperature read failed: {:?}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::testing::{MockPanel, MockPipeline, MockRails, MockRegisters, MockSensor};

    pub type TestEngine<'a> =
        Engine<MockRegisters<'a>, MockRails<'a>, MockSensor<'a>, MockPipeline<'a>>;

    pub fn engine_with(panel: &MockPanel, config: EngineConfig) -> TestEngine<'_> {
        let mut engine = Engine::new(
            config,
            panel.registers(),
            panel.rails(),
            panel.sensor(),
            panel.pipeline(),
        );
        let table = TemperatureTable::new(&[-10, 0, 10, 20, 30]).unwrap();
        engine.install_waveform(table, WaveformModes::default());
        engine
    }

    pub fn engine(panel: &MockPanel) -> TestEngine<'_> {
        engine_with(panel, EngineConfig::default())
    }
}
