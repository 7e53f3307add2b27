//! Dispatch scheduler
//!
//! `drive` walks the state machine in [`DispatchState`] until it either runs
//! out of dispatchable work or parks on a busy resource. It is re-entrant:
//! admission and completion handling both call it again afterwards.

use super::{DispatchState, DriveOutcome, Engine, WaitReason};
use crate::collision::{BusyUnit, UnitMask, LAST_UNIT};
use crate::error::Error;
use crate::pipeline::{PipelineJob, PlanContext, Surface};
use crate::pool::BufferId;
use crate::regs;
use crate::traits::{ImagePipeline, PowerRails, RegisterBus, TemperatureSensor};
use crate::update::{try_merge, MergeOutcome, PendingUpdate, Processed, UpdateFlags, UpdateKind};
use crate::waveform::{resolve_auto, WaveformMode};

/// White, as a fixed next-pixel value
const FILL_WHITE: u8 = 0xFF;

impl<R, P, S, X> Engine<R, P, S, X>
where
    R: RegisterBus,
    P: PowerRails,
    S: TemperatureSensor,
    X: ImagePipeline,
{
    /// Advance the scheduler as far as the hardware allows
    pub fn drive(&mut self) -> DriveOutcome {
        if !self.ready {
            return DriveOutcome::Idle;
        }

        loop {
            match self.dispatch {
                DispatchState::Idle => {
                    if self.pool.pending().is_empty() && !self.has_eligible_colliding() {
                        return DriveOutcome::Idle;
                    }
                    self.dispatch = DispatchState::SelectingCandidate;
                }

                DispatchState::SelectingCandidate => match self.select_candidate() {
                    None => {
                        self.dispatch = DispatchState::Idle;
                        return DriveOutcome::Idle;
                    }
                    Some(id) => {
                        let mask = self.pending_collisions(id);
                        if mask.is_empty() {
                            self.dispatch = DispatchState::AwaitingWorkingBuffer(id);
                        } else {
                            debug!(
                                "buffer {} collides with units {:#x}",
                                id.index(),
                                mask.bits()
                            );
                            self.pool.defer(id, mask);
                            self.stats.collisions += 1;
                            self.bump();
                        }
                    }
                },

                DispatchState::AwaitingWorkingBuffer(id) => {
                    if self.working.is_some() {
                        return DriveOutcome::Suspended(WaitReason::WorkingBuffer);
                    }
                    self.dispatch = DispatchState::PipelineProcessing(id);
                }

                DispatchState::PipelineProcessing(id) => {
                    let already_processed = self
                        .pool
                        .update(id)
                        .is_some_and(|u| u.processed.is_some());
                    let result = if already_processed {
                        self.ensure_power()
                    } else {
                        self.process_candidate(id)
                    };
                    match result {
                        Ok(()) => self.dispatch = DispatchState::AwaitingExecutionUnit(id),
                        Err(e) => {
                            self.fail_candidate(id, e);
                            self.dispatch = DispatchState::Idle;
                        }
                    }
                }

                DispatchState::AwaitingExecutionUnit(id) => {
                    let choice = self.units.choose_next();
                    let Some(unit) = choice.unit else {
                        return DriveOutcome::Suspended(WaitReason::ExecutionUnit);
                    };
                    self.dispatch = if !choice.last_busy {
                        DispatchState::Programming(id, unit)
                    } else if self.config.avoid_last_unit {
                        DispatchState::AwaitingLastUnit(id)
                    } else {
                        self.arm_frame_end();
                        DispatchState::AwaitingFrameEnd(id, unit)
                    };
                }

                DispatchState::AwaitingLastUnit(id) => {
                    if self.units.is_busy(LAST_UNIT) {
                        return DriveOutcome::Suspended(WaitReason::LastUnit);
                    }
                    self.dispatch = DispatchState::AwaitingExecutionUnit(id);
                }

                DispatchState::AwaitingFrameEnd(id, unit) => {
                    if !self.frame_end_seen {
                        return DriveOutcome::Suspended(WaitReason::FrameEnd);
                    }
                    self.dispatch = DispatchState::Programming(id, unit);
                }

                DispatchState::AwaitingFill(id, unit) => {
                    if self.units.is_busy(unit) {
                        return DriveOutcome::Suspended(WaitReason::Fill);
                    }
                    self.filled = Some(id);
                    self.dispatch = DispatchState::AwaitingExecutionUnit(id);
                }

                DispatchState::Programming(id, unit) => {
                    let Some(update) = self.pool.update(id).copied() else {
                        self.dispatch = DispatchState::Idle;
                        continue;
                    };
                    if update.request.is_whitening() && self.filled != Some(id) {
                        self.program_fill(unit, update.order);
                        self.dispatch = DispatchState::AwaitingFill(id, unit);
                    } else {
                        self.program_update(id, unit, &update);
                        self.dispatch = DispatchState::Idle;
                    }
                }
            }
        }
    }

    fn has_eligible_colliding(&self) -> bool {
        self.pool
            .colliding()
            .iter()
            .any(|&id| self.pool.collision_mask(id) == Some(UnitMask::EMPTY))
    }

    /// Pick the next candidate, folding compatible entries into it
    ///
    /// Cleared colliding entries go first. The pending queue is only
    /// scanned for a new candidate when none was found, but always for
    /// merges when the scheme merges.
    fn select_candidate(&mut self) -> Option<BufferId> {
        let merging = self.config.scheme.merges();
        let mut chosen: Option<BufferId> = None;
        let mut blocked = false;

        let mut i = 0;
        while i < self.pool.colliding().len() {
            let id = self.pool.colliding()[i];
            if self.pool.collision_mask(id) != Some(UnitMask::EMPTY) {
                i += 1;
                continue;
            }
            match chosen {
                None => {
                    chosen = Some(self.pool.take_colliding(i));
                    if !merging {
                        break;
                    }
                }
                Some(target) => match self.fold(target, id) {
                    // Entry was released, the list shifted down
                    MergeOutcome::Merged => {}
                    MergeOutcome::Fail => i += 1,
                    MergeOutcome::Blocked => {
                        blocked = true;
                        break;
                    }
                },
            }
        }

        if blocked || (chosen.is_some() && !merging) {
            return chosen;
        }

        let mut i = 0;
        while i < self.pool.pending().len() {
            let id = self.pool.pending()[i];
            match chosen {
                None => {
                    chosen = Some(self.pool.take_pending(i));
                    if !merging {
                        break;
                    }
                }
                Some(target) => match self.fold(target, id) {
                    MergeOutcome::Merged => {}
                    MergeOutcome::Fail => i += 1,
                    MergeOutcome::Blocked => break,
                },
            }
        }

        chosen
    }

    /// Try to merge `other` into `target`, releasing `other` on success
    fn fold(&mut self, target: BufferId, other: BufferId) -> MergeOutcome {
        let (Some(mut merged), Some(candidate)) = (
            self.pool.update(target).copied(),
            self.pool.update(other).copied(),
        ) else {
            return MergeOutcome::Fail;
        };

        let outcome = try_merge(&mut merged, &candidate);
        if outcome == MergeOutcome::Merged {
            if let Some(slot) = self.pool.update_mut(target) {
                *slot = merged;
            }
            self.pool.release(other);
            self.stats.merged += 1;
            debug!("merged buffer {} into {}", other.index(), target.index());
        }
        outcome
    }

    /// Units a candidate has to wait for before it may be dispatched
    ///
    /// Busy units overlapping its panel region, plus whatever overlapping
    /// entries already on the colliding list are waiting for, so it cannot
    /// overtake them.
    fn pending_collisions(&self, id: BufferId) -> UnitMask {
        let Some(update) = self.pool.update(id) else {
            return UnitMask::EMPTY;
        };
        let region = update.request.region;
        let mut mask = self.units.overlapping(&self.panel_region(&update.request));

        for &other in self.pool.colliding() {
            if other == id {
                continue;
            }
            let overlaps = self
                .pool
                .update(other)
                .is_some_and(|o| o.request.region.overlaps(&region));
            if let (true, Some(waiting)) = (overlaps, self.pool.collision_mask(other)) {
                mask = mask.union(waiting);
            }
        }
        mask
    }

    /// Run a buffer's pixels through the co-processor
    ///
    /// Brings panel power up while the job runs and refreshes the ambient
    /// temperature afterwards. `Auto` is resolved from the histogram here
    /// and nowhere else.
    pub(super) fn process_candidate(&mut self, id: BufferId) -> Result<(), Error> {
        let update = self
            .pool
            .update(id)
            .copied()
            .ok_or(Error::PipelineSubmitFailure)?;
        let job = self.plan_job(id, &update);

        if let Err(e) = self.pipeline.submit(&job) {
            error!("co-processor submit failed: {:?}", e);
            return Err(Error::PipelineSubmitFailure);
        }

        let powered = self.ensure_power();

        let histogram = match self.pipeline.wait(self.config.timeouts.pipeline_ms) {
            Ok(histogram) => histogram,
            Err(e) => {
                error!("co-processor did not finish: {:?}", e);
                self.pipeline.reset();
                self.stats.pipeline_timeouts += 1;
                return Err(Error::PipelineTimeout);
            }
        };

        powered?;
        self.power.check_driver(&mut self.rails)?;
        self.refresh_ambient();

        let waveform = match update.request.waveform {
            WaveformMode::Auto => resolve_auto(histogram),
            mode => mode,
        };
        trace!(
            "buffer {} processed, histogram {:#x}",
            id.index(),
            histogram.bits()
        );

        if let Some(slot) = self.pool.update_mut(id) {
            slot.processed = Some(Processed {
                waveform,
                read_offset: job.read_offset,
            });
        }
        Ok(())
    }

    fn plan_job(&self, id: BufferId, update: &PendingUpdate) -> PipelineJob {
        let request = &update.request;
        let (source, region) = match request.alt_source {
            Some(alt) => (
                Surface {
                    addr: alt.addr,
                    width: alt.width,
                    height: alt.height,
                },
                alt.region,
            ),
            None => {
                let (width, height) = self.config.panel.display_size(self.config.rotation);
                (
                    Surface {
                        addr: self.config.framebuffer_addr,
                        width,
                        height,
                    },
                    request.region,
                )
            }
        };

        let ctx = PlanContext {
            bytes_per_pixel: self.config.bytes_per_pixel as u32,
            rotation: self.config.rotation,
            auto_waveform: request.waveform == WaveformMode::Auto,
            invert: request.flags.contains(UpdateFlags::INVERT) ^ self.config.grayscale_inverted,
            monochrome: request.flags.contains(UpdateFlags::MONOCHROME),
            output_addr: self.pool.address(id),
        };
        PipelineJob::plan(source, region, &ctx)
    }

    /// Drop a candidate that could not be dispatched
    pub(super) fn fail_candidate(&mut self, id: BufferId, error: Error) {
        warn!("update in buffer {} dropped: {}", id.index(), error);
        if let Some(update) = self.pool.release(id) {
            if let Some(marker) = update.request.marker {
                self.markers.release(marker);
            }
        }
        if self.filled == Some(id) {
            self.filled = None;
        }
        self.bump();
    }

    fn arm_frame_end(&mut self) {
        self.frame_end_seen = false;
        self.regs.write(regs::IRQ_CLEAR, regs::IRQ_FRAME_END);
        self.set_irq_mask(self.irq_mask | regs::IRQ_FRAME_END);
    }

    /// Draw the whole panel white on `unit` ahead of a whitening update
    fn program_fill(&mut self, unit: usize, order: u32) {
        let panel = self.config.panel.panel_rect();
        let du = self.config.waveform_modes.du;

        self.regs.write(regs::IRQ_CLEAR, 1 << unit);
        self.set_irq_mask(self.irq_mask | (1 << unit));
        self.regs.write(regs::TEMP, self.ambient_index as u32);
        self.regs.write(regs::UPD_CORD, regs::cord(0, 0));
        self.regs.write(regs::UPD_SIZE, regs::size(panel.width, panel.height));
        self.regs
            .write(regs::UPD_FIXED, regs::fixed_next_pixel(FILL_WHITE));
        self.regs
            .write(regs::UPD_CTRL, regs::upd_ctrl(unit, du, true, true));

        self.units.occupy(
            unit,
            BusyUnit {
                order,
                region: panel,
                buffer: None,
                fill: true,
            },
        );
        debug!("whitening fill on unit {}", unit);
    }

    fn program_update(&mut self, id: BufferId, unit: usize, update: &PendingUpdate) {
        let request = &update.request;
        let modes = self.config.waveform_modes;
        let processed = update.processed.unwrap_or(Processed {
            waveform: request.waveform,
            read_offset: 0,
        });
        let waveform = modes.index_of(processed.waveform).unwrap_or(modes.gc16);
        let temp_index = request
            .temperature
            .map(|t| self.temperatures.index_for(t))
            .unwrap_or(self.ambient_index);
        let region = self.panel_region(request);
        let full = request.kind == UpdateKind::Full;

        let irqs = regs::IRQ_WB_CMPLT | regs::IRQ_LUT_COL | (1 << unit);
        self.regs.write(regs::IRQ_CLEAR, irqs);
        self.set_irq_mask(self.irq_mask | irqs);

        self.regs.write(regs::TEMP, temp_index as u32);
        self.regs.write(
            regs::UPD_ADDR,
            self.pool.address(id).wrapping_add(processed.read_offset),
        );
        self.regs
            .write(regs::UPD_CORD, regs::cord(region.left, region.top));
        self.regs
            .write(regs::UPD_SIZE, regs::size(region.width, region.height));
        self.regs.write(regs::UPD_FIXED, 0);
        self.regs
            .write(regs::UPD_CTRL, regs::upd_ctrl(unit, waveform, full, false));

        self.units.occupy(
            unit,
            BusyUnit {
                order: update.order,
                region,
                buffer: Some(id),
                fill: false,
            },
        );
        if let Some(marker) = request.marker {
            self.markers.attach(marker, unit);
        }
        self.working = Some(id);
        self.completed_during_wb = UnitMask::EMPTY;
        self.pool.mark_active(id);
        if self.filled == Some(id) {
            self.filled = None;
        }
        self.stats.dispatched += 1;
        self.bump();

        debug!(
            "buffer {} on unit {}, waveform {}, order {}",
            id.index(),
            unit,
            waveform,
            update.order
        );
    }
}
