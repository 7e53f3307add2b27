//! Completion handling
//!
//! Retires execution units and the working buffer, clears collision bits
//! and decides when the engine has gone idle.

use super::{Completion, CompletionOutcome, DispatchState, Engine};
use crate::collision::{UnitMask, NUM_UNITS};
use crate::config::{PowerDownPolicy, UpdateScheme};
use crate::geometry::Rect;
use crate::regs;
use crate::traits::{ImagePipeline, PowerRails, RegisterBus, TemperatureSensor};

impl<R, P, S, X> Engine<R, P, S, X>
where
    R: RegisterBus,
    P: PowerRails,
    S: TemperatureSensor,
    X: ImagePipeline,
{
    /// Read, acknowledge and process pending controller interrupts
    pub fn service_interrupt(&mut self) -> CompletionOutcome {
        let status = self.regs.read(regs::IRQ) & self.irq_mask;
        if status == 0 {
            return CompletionOutcome {
                quiescent: self.is_quiescent(),
                ..CompletionOutcome::default()
            };
        }

        let collision = if status & regs::IRQ_LUT_COL != 0 {
            self.regs.read(regs::STATUS_COL)
        } else {
            0
        };
        self.regs.write(regs::IRQ_CLEAR, status);
        self.process_completion(Completion::from_status(status, collision))
    }

    /// Apply a decoded completion event
    pub fn process_completion(&mut self, completion: Completion) -> CompletionOutcome {
        let mut outcome = CompletionOutcome::default();
        if completion.is_empty() {
            outcome.quiescent = self.is_quiescent();
            return outcome;
        }
        self.bump();

        if completion.underrun {
            warn!("timing controller underrun");
            self.stats.underruns += 1;
        }

        if completion.frame_end {
            self.frame_end_seen = true;
            self.set_irq_mask(self.irq_mask & !regs::IRQ_FRAME_END);
        }

        for unit in completion.units.iter() {
            if self.retire_unit(unit) {
                outcome.retired = outcome.retired.with(unit);
            }
        }

        if completion.working_buffer {
            self.finish_working_buffer(completion.collision);
        }

        if self.is_quiescent() {
            outcome.quiescent = true;
            self.next_order = 0;
            if let PowerDownPolicy::AfterMs(delay) = self.config.power_down {
                if self.power.schedule_power_down() {
                    trace!("power-down in {} ms", delay);
                    outcome.power_down_after_ms = Some(delay);
                }
            }
        }
        outcome
    }

    /// Mark a unit idle; false if it was not busy
    fn retire_unit(&mut self, unit: usize) -> bool {
        let Some(busy) = self.units.retire(unit) else {
            return false;
        };

        self.pool.clear_unit(unit);
        if self.working.is_some() {
            self.completed_during_wb = self.completed_during_wb.with(unit);
        }
        if let Some(id) = busy.buffer {
            if self.working != Some(id) {
                self.pool.release(id);
            }
        }
        self.markers.complete_unit(unit);
        self.set_irq_mask(self.irq_mask & !(1 << unit));
        trace!("unit {} idle", unit);
        true
    }

    /// Working buffer pass done: release the buffer or park it as colliding
    ///
    /// Without a hardware collision report, colliding entries overlapping
    /// this update still count: the working buffer can swallow the report.
    /// Those units only count when they run older updates. A reported
    /// collision is ignored outright if any unit involved is at least as new.
    fn finish_working_buffer(&mut self, reported: Option<UnitMask>) {
        let Some(id) = self.working.take() else {
            return;
        };
        self.set_irq_mask(self.irq_mask & !(regs::IRQ_WB_CMPLT | regs::IRQ_LUT_COL));

        let Some(update) = self.pool.update(id).copied() else {
            return;
        };

        let mut own_unit = None;
        for unit in 0..NUM_UNITS {
            if let Some(busy) = self.units.get_mut(unit) {
                if busy.buffer == Some(id) {
                    busy.buffer = None;
                    own_unit = Some(unit);
                }
            }
        }
        let mut exclude = self.completed_during_wb;
        if let Some(unit) = own_unit {
            exclude = exclude.with(unit);
        }

        // Reported units already idle have no completion left to clear them
        let busy = self.units.busy_mask();
        let mask = match reported.map(|m| m.difference(exclude).intersection(busy)) {
            Some(hw) if !hw.is_empty() => {
                if self.units.any_newer_or_equal(hw, update.order) {
                    debug!("collision with newer update ignored");
                    UnitMask::EMPTY
                } else {
                    hw
                }
            }
            _ => self.missed_collisions(&update.request.region, update.order, exclude),
        };

        if mask.is_empty() {
            self.pool.release(id);
            return;
        }

        debug!(
            "buffer {} collided with units {:#x}",
            id.index(),
            mask.bits()
        );
        if let (Some(marker), Some(unit)) = (update.request.marker, own_unit) {
            self.markers.detach(marker, unit);
        }
        if self.config.scheme != UpdateScheme::Snapshot {
            if let Some(slot) = self.pool.update_mut(id) {
                slot.processed = None;
            }
        }
        self.pool.defer(id, mask);
        self.stats.collisions += 1;
    }

    /// Older busy units behind colliding entries overlapping `region`
    fn missed_collisions(
        &self,
        region: &Rect,
        order: u32,
        exclude: UnitMask,
    ) -> UnitMask {
        let mut candidates = UnitMask::EMPTY;
        for &other in self.pool.colliding() {
            let overlaps = self
                .pool
                .update(other)
                .is_some_and(|o| o.request.region.overlaps(region));
            if let (true, Some(waiting)) = (overlaps, self.pool.collision_mask(other)) {
                candidates = candidates.union(waiting);
            }
        }

        let mut mask = UnitMask::EMPTY;
        for unit in candidates.difference(exclude).iter() {
            if self.units.get(unit).is_some_and(|busy| busy.order < order) {
                mask = mask.with(unit);
            }
        }
        if !mask.is_empty() {
            debug!("missed collision, units {:#x}", mask.bits());
        }
        mask
    }

    /// Resynchronize with the hardware after a resource wait timed out
    ///
    /// Units and the working buffer the controller reports idle are retired
    /// as if their interrupts had arrived; an awaited frame-end pulse is
    /// treated as seen.
    pub fn recover_stall(&mut self) -> CompletionOutcome {
        let hw_busy = UnitMask::from_bits(self.regs.read(regs::STATUS_LUTS) as u16);
        let wb_busy = self.regs.read(regs::STATUS) & regs::STATUS_WB_BUSY != 0;

        let mut completion = Completion {
            units: self.units.busy_mask().difference(hw_busy),
            working_buffer: self.working.is_some() && !wb_busy,
            ..Completion::default()
        };
        if matches!(self.dispatch, DispatchState::AwaitingFrameEnd(..)) && !self.frame_end_seen {
            completion.frame_end = true;
            self.stats.missed_frame_ends += 1;
            warn!("frame end pulse missed");
        }

        if completion.is_empty() {
            return CompletionOutcome {
                quiescent: self.is_quiescent(),
                ..CompletionOutcome::default()
            };
        }

        warn!(
            "recovering stall, units {:#x}, working buffer {}",
            completion.units.bits(),
            completion.working_buffer
        );
        let mut stale = completion.units.bits() as u32;
        if completion.working_buffer {
            stale |= regs::IRQ_WB_CMPLT | regs::IRQ_LUT_COL;
        }
        self.regs.write(regs::IRQ_CLEAR, stale);
        self.process_completion(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::*;
    use super::super::{Completion, DriveOutcome, WaitReason};
    use crate::collision::{BusyUnit, UnitMask};
    use crate::config::{EngineConfig, PowerDownPolicy};
    use crate::geometry::Rect;
    use crate::pool::{BufferState, MAX_UPDATES};
    use crate::power::PowerState;
    use crate::testing::MockPanel;
    use crate::update::{Marker, UpdateRequest};
    use crate::waveform::WaveformMode;

    fn du(region: Rect) -> UpdateRequest {
        UpdateRequest::partial(region, WaveformMode::Du)
    }

    #[test]
    fn test_full_cycle_schedules_power_down() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        let m = Marker::new(1).unwrap();
        engine
            .submit(du(Rect::new(0, 0, 16, 16)).with_marker(m))
            .unwrap();
        engine.drive();

        panel.complete_working_buffer();
        let outcome = engine.service_interrupt();
        assert!(!outcome.quiescent);
        assert_eq!(engine.pool().free_count(), MAX_UPDATES);
        assert!(engine.is_marker_pending(m));

        panel.complete_unit(0);
        let outcome = engine.service_interrupt();
        assert_eq!(outcome.retired, UnitMask::single(0));
        assert!(outcome.quiescent);
        assert_eq!(outcome.power_down_after_ms, Some(80));
        assert!(!engine.is_marker_pending(m));
        assert_eq!(engine.power_state(), PowerState::PoweringDown);
        assert_eq!(panel.irq_status(), 0);

        engine.complete_power_down().unwrap();
        assert_eq!(engine.power_state(), PowerState::Off);
    }

    #[test]
    fn test_power_down_disabled() {
        let panel = MockPanel::new();
        let config = EngineConfig {
            power_down: PowerDownPolicy::Disabled,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(&panel, config);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        panel.complete_unit(0);
        let outcome = engine.service_interrupt();
        assert!(outcome.quiescent);
        assert_eq!(outcome.power_down_after_ms, None);
        assert_eq!(engine.power_state(), PowerState::On);
    }

    #[test]
    fn test_order_restarts_when_idle() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        engine.submit(du(Rect::new(300, 0, 16, 16))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();
        engine.drive();
        panel.complete_working_buffer();
        panel.complete_unit(0);
        panel.complete_unit(1);
        assert!(engine.service_interrupt().quiescent);

        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        let id = engine.pool().pending()[0];
        assert_eq!(engine.pool().update(id).map(|u| u.order), Some(0));
    }

    #[test]
    fn test_reported_collision_defers() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();

        let m = Marker::new(2).unwrap();
        engine
            .submit(du(Rect::new(300, 0, 16, 16)).with_marker(m))
            .unwrap();
        let id = engine.pool().pending()[0];
        engine.drive();
        assert_eq!(panel.last_programmed().unwrap().unit, 1);

        panel.complete_working_buffer_colliding(1 << 0);
        engine.service_interrupt();
        assert_eq!(
            engine.pool().state(id),
            BufferState::Colliding(UnitMask::single(0))
        );
        assert_eq!(engine.pool().update(id).unwrap().processed, None);
        assert_eq!(engine.stats().collisions, 1);

        // The unit it ran on finishing does not complete the marker
        panel.complete_unit(1);
        engine.service_interrupt();
        assert!(engine.is_marker_pending(m));

        panel.complete_unit(0);
        engine.service_interrupt();
        assert_eq!(engine.drive(), DriveOutcome::Idle);
        assert_eq!(panel.programmed_count(), 3);
        assert_eq!(panel.jobs().len(), 3);

        panel.complete_working_buffer();
        engine.service_interrupt();
        panel.complete_unit(panel.last_programmed().unwrap().unit);
        engine.service_interrupt();
        assert!(!engine.is_marker_pending(m));
        assert!(engine.is_quiescent());
    }

    #[test]
    fn test_collision_with_newer_update_ignored() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        let id = engine.pool().pending()[0];
        engine.drive();
        engine.units.occupy(
            5,
            BusyUnit {
                order: 7,
                region: Rect::new(0, 0, 16, 16),
                buffer: None,
                fill: false,
            },
        );

        panel.complete_working_buffer_colliding(1 << 5);
        engine.service_interrupt();
        assert_eq!(engine.pool().state(id), BufferState::Free);
        assert_eq!(engine.stats().collisions, 0);
    }

    #[test]
    fn test_reported_collision_with_idle_unit_dropped() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        let id = engine.pool().pending()[0];
        engine.drive();

        // Unit 9 never ran anything
        panel.complete_working_buffer_colliding(1 << 9);
        engine.service_interrupt();
        assert_eq!(engine.pool().state(id), BufferState::Free);
        assert_eq!(engine.stats().collisions, 0);

        panel.complete_unit(0);
        assert!(engine.service_interrupt().quiescent);
    }

    #[test]
    fn test_units_done_during_working_buffer_dropped_from_mask() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();

        engine.submit(du(Rect::new(300, 0, 16, 16))).unwrap();
        let id = engine.pool().pending()[0];
        engine.drive();

        panel.complete_unit(0);
        engine.service_interrupt();
        panel.complete_working_buffer_colliding(1 << 0);
        engine.service_interrupt();
        assert_eq!(engine.pool().state(id), BufferState::Free);
    }

    #[test]
    fn test_missed_collision_defers() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        // Order 0 on unit 0
        engine.submit(du(Rect::new(0, 0, 100, 100))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();

        // Order 1 on unit 1, working buffer still busy
        engine.submit(du(Rect::new(150, 0, 100, 100))).unwrap();
        let w = engine.pool().pending()[0];
        engine.drive();

        // Spans both, parks behind units 0 and 1
        engine.submit(du(Rect::new(50, 0, 150, 10))).unwrap();
        let y = engine.pool().pending()[0];
        engine.drive();
        assert_eq!(
            engine.pool().collision_mask(y),
            Some(UnitMask::single(0).with(1))
        );

        // No collision reported, but unit 0 is older and sits behind y
        panel.complete_working_buffer();
        engine.service_interrupt();
        assert_eq!(
            engine.pool().state(w),
            BufferState::Colliding(UnitMask::single(0))
        );
        assert_eq!(engine.stats().collisions, 2);
    }

    #[test]
    fn test_unit_completion_clears_bit_once() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 100, 100))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();

        engine.submit(du(Rect::new(10, 10, 10, 10))).unwrap();
        let id = engine.pool().pending()[0];
        engine.drive();

        // Unrelated unit finishing leaves the bit alone
        let outcome = engine.process_completion(Completion::unit(4));
        assert!(outcome.retired.is_empty());
        assert_eq!(engine.pool().collision_mask(id), Some(UnitMask::single(0)));

        panel.complete_unit(0);
        engine.service_interrupt();
        assert_eq!(engine.pool().collision_mask(id), Some(UnitMask::EMPTY));
    }

    #[test]
    fn test_underrun_counted() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        panel.underrun();
        let outcome = engine.service_interrupt();
        assert!(outcome.quiescent);
        assert_eq!(engine.stats().underruns, 1);
        assert_eq!(panel.irq_status(), 0);
    }

    #[test]
    fn test_masked_interrupts_ignored() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        panel.complete_unit(7);
        let outcome = engine.service_interrupt();
        assert!(outcome.retired.is_empty());
        assert_ne!(panel.irq_status(), 0);
    }

    #[test]
    fn test_recover_lost_unit_interrupt() {
        let panel = MockPanel::new();
        let mut engine = engine(&panel);
        engine.submit(du(Rect::new(0, 0, 16, 16))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();

        panel.lose_unit_interrupt(0);
        let outcome = engine.recover_stall();
        assert_eq!(outcome.retired, UnitMask::single(0));
        assert!(outcome.quiescent);
        assert!(engine.is_quiescent());
    }

    #[test]
    fn test_recover_missed_frame_end() {
        let panel = MockPanel::new();
        let config = EngineConfig {
            avoid_last_unit: false,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(&panel, config);
        engine.submit(du(Rect::new(600, 0, 8, 8))).unwrap();
        engine.drive();
        panel.complete_working_buffer();
        engine.service_interrupt();
        for unit in 1..16 {
            engine.units.occupy(
                unit,
                BusyUnit {
                    order: 0,
                    region: Rect::new(700, 500, 1, 1),
                    buffer: None,
                    fill: false,
                },
            );
        }
        panel.complete_unit(0);
        engine.service_interrupt();

        engine.submit(du(Rect::new(0, 0, 8, 8))).unwrap();
        assert_eq!(
            engine.drive(),
            DriveOutcome::Suspended(WaitReason::FrameEnd)
        );

        // Units 1..15 were never started on the controller, so they go too
        engine.recover_stall();
        assert_eq!(engine.stats().missed_frame_ends, 1);
        assert_eq!(engine.drive(), DriveOutcome::Idle);
        assert_eq!(panel.programmed_count(), 2);
    }
}
