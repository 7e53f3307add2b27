//! GPIO switched rail
//!
//! Load switch or regulator enable driven by a GPIO pin, active-high by
//! default or active-low.

use embedded_hal::digital::OutputPin;
use epdc_core::traits::RailError;

use super::RailSwitch;

/// Rail behind a GPIO enable pin
pub struct GpioRail<P> {
    pin: P,
    /// If true, rail ON = pin LOW
    inverted: bool,
    on: bool,
}

impl<P: OutputPin> GpioRail<P> {
    /// Create a rail in the given state
    pub fn new(pin: P, inverted: bool, on: bool) -> Self {
        let mut rail = Self {
            pin,
            inverted,
            on: false,
        };
        // A failed pin write leaves the rail reported off
        let _ = rail.switch(on);
        rail
    }

    /// Active-high rail, starting off
    pub fn new_active_high(pin: P) -> Self {
        Self::new(pin, false, false)
    }

    /// Active-low rail, starting off
    pub fn new_active_low(pin: P) -> Self {
        Self::new(pin, true, false)
    }

    pub fn release(self) -> P {
        self.pin
    }

    #[cfg(test)]
    pub(crate) fn pin(&self) -> &P {
        &self.pin
    }
}

impl<P: OutputPin> RailSwitch for GpioRail<P> {
    fn switch(&mut self, on: bool) -> Result<(), RailError> {
        let result = if on != self.inverted {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|_| RailError::Bus)?;
        self.on = on;
        Ok(())
    }

    fn is_on(&mut self) -> bool {
        self.on
    }
}
