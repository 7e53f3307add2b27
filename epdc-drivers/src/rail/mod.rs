//! Switched supplies and the board rail set

pub mod board;
pub mod gpio;

pub use board::BoardRails;
pub use gpio::GpioRail;

use epdc_core::traits::RailError;

/// A single on/off supply or clock gate
pub trait RailSwitch {
    /// Switch the rail
    fn switch(&mut self, on: bool) -> Result<(), RailError>;

    /// Current state of the rail
    fn is_on(&mut self) -> bool;
}

/// Hard-wired rail that is always on
///
/// Switching it on is a no-op; switching it off is unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

impl RailSwitch for AlwaysOn {
    fn switch(&mut self, on: bool) -> Result<(), RailError> {
        if on {
            Ok(())
        } else {
            Err(RailError::Unsupported)
        }
    }

    fn is_on(&mut self) -> bool {
        true
    }
}
