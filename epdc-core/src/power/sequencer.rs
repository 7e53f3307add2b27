//! Power sequencer state machine

use heapless::Vec;

use crate::error::Error;
use crate::traits::{PowerRails, Rail};

/// Rails switched on for a power-up, in order
pub const POWER_UP_SEQUENCE: [Rail; 5] = [
    Rail::Display,
    Rail::V3p3,
    Rail::Clocks,
    Rail::EpdDriver,
    Rail::Vcom,
];

/// Tries per power-up request (first attempt plus one retry)
const POWER_UP_ATTEMPTS: u8 = 2;

/// Panel power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    #[default]
    Off,
    /// Sequence in progress
    PoweringUp,
    On,
    /// Power-down scheduled, can still be cancelled
    PoweringDown,
    /// Supply cut after repeated failures, needs an explicit reset
    Locked,
}

/// Power sequencer
///
/// Holds no rail handle itself; each operation is given the board's rails.
#[derive(Debug, Clone)]
pub struct PowerSequencer {
    state: PowerState,
    /// Consecutive failed power-up requests
    failures: u8,
    lockout_threshold: u8,
    /// Rails brought up by the last successful sequence, in order
    enabled: Vec<Rail, 5>,
}

impl PowerSequencer {
    pub fn new(lockout_threshold: u8) -> Self {
        Self {
            state: PowerState::Off,
            failures: 0,
            lockout_threshold: lockout_threshold.max(1),
            enabled: Vec::new(),
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == PowerState::On
    }

    pub fn is_locked(&self) -> bool {
        self.state == PowerState::Locked
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.failures
    }

    /// Bring the panel supplies up
    ///
    /// Cancels a scheduled power-down. Each failing step rolls back what
    /// this attempt enabled; the sequence is retried once before the
    /// request counts as failed.
    pub fn power_up<P: PowerRails>(&mut self, rails: &mut P) -> Result<(), Error> {
        match self.state {
            PowerState::Locked => return Err(Error::Locked),
            PowerState::On => return Ok(()),
            PowerState::PoweringDown => {
                debug!("power-down pre-empted");
                self.state = PowerState::On;
                return Ok(());
            }
            PowerState::Off | PowerState::PoweringUp => {}
        }

        self.state = PowerState::PoweringUp;
        for attempt in 0..POWER_UP_ATTEMPTS {
            match Self::run_sequence(rails) {
                Ok(enabled) => {
                    self.enabled = enabled;
                    self.failures = 0;
                    self.state = PowerState::On;
                    return Ok(());
                }
                Err(rail) => {
                    warn!("power-up attempt {} failed at {:?}", attempt, rail);
                }
            }
        }

        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.lockout_threshold {
            error!("{} consecutive power-up failures, locking out", self.failures);
            self.lock(rails);
        } else {
            self.state = PowerState::Off;
        }
        Err(Error::PowerSequenceFailure)
    }

    /// Enable every rail in order, rolling back on the first failure
    fn run_sequence<P: PowerRails>(rails: &mut P) -> Result<Vec<Rail, 5>, Rail> {
        let mut enabled: Vec<Rail, 5> = Vec::new();
        for rail in POWER_UP_SEQUENCE {
            if rails.enable(rail).is_err() {
                for done in enabled.iter().rev() {
                    if rails.disable(*done).is_err() {
                        warn!("rollback failed to disable {:?}", done);
                    }
                }
                return Err(rail);
            }
            let _ = enabled.push(rail);
        }
        Ok(enabled)
    }

    /// Mark a power-down as pending
    ///
    /// Returns true if one was scheduled; the caller runs
    /// [`complete_power_down`](Self::complete_power_down) after its delay.
    pub fn schedule_power_down(&mut self) -> bool {
        if self.state == PowerState::On {
            self.state = PowerState::PoweringDown;
            true
        } else {
            false
        }
    }

    /// Execute a scheduled power-down
    ///
    /// Does nothing if a power-up pre-empted it. If the EPD driver rail is
    /// already off the PMIC has cut out on its own, which locks the engine.
    pub fn complete_power_down<P: PowerRails>(&mut self, rails: &mut P) -> Result<(), Error> {
        if self.state != PowerState::PoweringDown {
            return Ok(());
        }

        if self.enabled.contains(&Rail::EpdDriver) && !rails.is_enabled(Rail::EpdDriver) {
            error!("EPD driver rail dropped before power-down");
            self.lock(rails);
            return Err(Error::Locked);
        }

        while let Some(rail) = self.enabled.pop() {
            if rails.disable(rail).is_err() {
                warn!("failed to disable {:?}", rail);
            }
        }
        self.state = PowerState::Off;
        Ok(())
    }

    /// Power down right away
    pub fn power_down_now<P: PowerRails>(&mut self, rails: &mut P) -> Result<(), Error> {
        self.schedule_power_down();
        self.complete_power_down(rails)
    }

    /// Verify the EPD driver rail is still up while powered
    pub fn check_driver<P: PowerRails>(&mut self, rails: &mut P) -> Result<(), Error> {
        match self.state {
            PowerState::Locked => Err(Error::Locked),
            PowerState::On | PowerState::PoweringDown => {
                if rails.is_enabled(Rail::EpdDriver) {
                    Ok(())
                } else {
                    error!("EPD driver rail dropped, locking out");
                    self.lock(rails);
                    Err(Error::Locked)
                }
            }
            _ => Ok(()),
        }
    }

    /// Clear a lockout and re-enable the upstream supply
    pub fn reset_lockout<P: PowerRails>(&mut self, rails: &mut P) -> Result<(), Error> {
        if self.state != PowerState::Locked {
            return Ok(());
        }
        rails.enable(Rail::SystemSupply)?;
        info!("power lockout cleared");
        self.failures = 0;
        self.state = PowerState::Off;
        Ok(())
    }

    fn lock<P: PowerRails>(&mut self, rails: &mut P) {
        while let Some(rail) = self.enabled.pop() {
            if rails.disable(rail).is_err() {
                warn!("lockout failed to disable {:?}", rail);
            }
        }
        if rails.disable(Rail::SystemSupply).is_err() {
            error!("lockout failed to cut the system supply");
        }
        self.state = PowerState::Locked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPanel, RailOp};

    #[test]
    fn test_power_up_order() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);

        assert_eq!(seq.power_up(&mut rails), Ok(()));
        assert_eq!(seq.state(), PowerState::On);
        let calls = panel.rail_calls();
        let enabled: heapless::Vec<Rail, 8> = calls
            .iter()
            .filter(|(op, _)| *op == RailOp::Enable)
            .map(|(_, r)| *r)
            .collect();
        assert_eq!(enabled.as_slice(), &POWER_UP_SEQUENCE);
    }

    #[test]
    fn test_power_down_reverses_order() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        seq.power_up(&mut rails).unwrap();
        panel.clear_rail_calls();

        assert!(seq.schedule_power_down());
        assert_eq!(seq.complete_power_down(&mut rails), Ok(()));
        assert_eq!(seq.state(), PowerState::Off);

        let disabled: heapless::Vec<Rail, 8> =
            panel.rail_calls().iter().map(|(_, r)| *r).collect();
        assert_eq!(
            disabled.as_slice(),
            &[
                Rail::Vcom,
                Rail::EpdDriver,
                Rail::Clocks,
                Rail::V3p3,
                Rail::Display
            ]
        );
    }

    #[test]
    fn test_failed_step_rolls_back_and_retries() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        // Fails the first attempt only
        panel.fail_rail(Rail::EpdDriver, Some(1));

        assert_eq!(seq.power_up(&mut rails), Ok(()));
        let calls = panel.rail_calls();
        // Rollback after the failing step, in reverse
        assert_eq!(calls[3], (RailOp::Enable, Rail::EpdDriver));
        assert_eq!(calls[4], (RailOp::Disable, Rail::Clocks));
        assert_eq!(calls[5], (RailOp::Disable, Rail::V3p3));
        assert_eq!(calls[6], (RailOp::Disable, Rail::Display));
        assert_eq!(calls[7], (RailOp::Enable, Rail::Display));
        assert_eq!(seq.consecutive_failures(), 0);
    }

    #[test]
    fn test_rollback_continues_past_stuck_rail() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        panel.fail_rail(Rail::EpdDriver, None);
        panel.stick_rail(Rail::V3p3);

        assert_eq!(seq.power_up(&mut rails), Err(Error::PowerSequenceFailure));
        assert!(!panel.rail_enabled(Rail::Clocks));
        assert!(panel.rail_enabled(Rail::V3p3));
        assert!(!panel.rail_enabled(Rail::Display));
        assert_eq!(seq.state(), PowerState::Off);
    }

    #[test]
    fn test_lockout_cuts_supply_past_stuck_rail() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        seq.power_up(&mut rails).unwrap();
        panel.stick_rail(Rail::Vcom);

        panel.drop_rail(Rail::EpdDriver);
        assert_eq!(seq.check_driver(&mut rails), Err(Error::Locked));
        assert_eq!(seq.state(), PowerState::Locked);
        assert!(panel.rail_enabled(Rail::Vcom));
        assert!(!panel.rail_enabled(Rail::Clocks));
        assert!(!panel.rail_enabled(Rail::SystemSupply));
    }

    #[test]
    fn test_lockout_after_threshold() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        panel.fail_rail(Rail::Vcom, None);

        for _ in 0..2 {
            assert_eq!(seq.power_up(&mut rails), Err(Error::PowerSequenceFailure));
            assert_eq!(seq.state(), PowerState::Off);
        }
        assert_eq!(seq.power_up(&mut rails), Err(Error::PowerSequenceFailure));
        assert_eq!(seq.state(), PowerState::Locked);
        assert!(!panel.rail_enabled(Rail::SystemSupply));

        panel.clear_rail_calls();
        assert_eq!(seq.power_up(&mut rails), Err(Error::Locked));
        assert!(panel.rail_calls().is_empty());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        panel.fail_rail(Rail::Clocks, Some(2));

        assert!(seq.power_up(&mut rails).is_err());
        assert_eq!(seq.consecutive_failures(), 1);
        assert_eq!(seq.power_up(&mut rails), Ok(()));
        assert_eq!(seq.consecutive_failures(), 0);
    }

    #[test]
    fn test_power_up_cancels_pending_power_down() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        seq.power_up(&mut rails).unwrap();
        assert!(seq.schedule_power_down());
        panel.clear_rail_calls();

        assert_eq!(seq.power_up(&mut rails), Ok(()));
        assert_eq!(seq.state(), PowerState::On);
        // Delayed power-down now finds nothing to do
        assert_eq!(seq.complete_power_down(&mut rails), Ok(()));
        assert_eq!(seq.state(), PowerState::On);
        assert!(panel.rail_calls().is_empty());
    }

    #[test]
    fn test_pmic_cutout_locks_on_power_down() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        seq.power_up(&mut rails).unwrap();
        panel.drop_rail(Rail::EpdDriver);

        seq.schedule_power_down();
        assert_eq!(seq.complete_power_down(&mut rails), Err(Error::Locked));
        assert!(seq.is_locked());
        assert!(!panel.rail_enabled(Rail::SystemSupply));
    }

    #[test]
    fn test_check_driver_detects_cutout() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(3);
        seq.power_up(&mut rails).unwrap();
        assert_eq!(seq.check_driver(&mut rails), Ok(()));
        panel.drop_rail(Rail::EpdDriver);
        assert_eq!(seq.check_driver(&mut rails), Err(Error::Locked));
    }

    #[test]
    fn test_reset_lockout() {
        let panel = MockPanel::new();
        let mut rails = panel.rails();
        let mut seq = PowerSequencer::new(1);
        panel.fail_rail(Rail::Display, None);
        assert!(seq.power_up(&mut rails).is_err());
        assert!(seq.is_locked());

        panel.clear_rail_failure();
        assert_eq!(seq.reset_lockout(&mut rails), Ok(()));
        assert!(panel.rail_enabled(Rail::SystemSupply));
        assert_eq!(seq.power_up(&mut rails), Ok(()));
    }
}
