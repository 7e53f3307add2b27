//! Board rail set
//!
//! Maps each engine `Rail` to the switch or PMIC output that drives it.

use epdc_core::traits::{PowerRails, Rail, RailError};

use super::RailSwitch;
use crate::pmic::{PanelPmic, PmicOutput};

/// Every switchable supply on the board
pub struct BoardRails<D, V, C, S, M> {
    pub display: D,
    pub v3p3: V,
    pub clocks: C,
    /// Upstream supply feeding the PMIC
    pub system: S,
    pub pmic: M,
}

impl<D, V, C, S, M> BoardRails<D, V, C, S, M>
where
    D: RailSwitch,
    V: RailSwitch,
    C: RailSwitch,
    S: RailSwitch,
    M: PanelPmic,
{
    pub fn new(display: D, v3p3: V, clocks: C, system: S, pmic: M) -> Self {
        Self {
            display,
            v3p3,
            clocks,
            system,
            pmic,
        }
    }

    fn set(&mut self, rail: Rail, on: bool) -> Result<(), RailError> {
        match rail {
            Rail::Display => self.display.switch(on),
            Rail::V3p3 => self.v3p3.switch(on),
            Rail::Clocks => self.clocks.switch(on),
            Rail::SystemSupply => self.system.switch(on),
            Rail::EpdDriver => self.set_pmic(PmicOutput::EpdDriver, on),
            Rail::Vcom => self.set_pmic(PmicOutput::Vcom, on),
        }
    }

    fn set_pmic(&mut self, output: PmicOutput, on: bool) -> Result<(), RailError> {
        if on && !self.system.is_on() {
            return Err(RailError::Fault);
        }
        self.pmic
            .set_output(output, on)
            .map_err(|_| RailError::Bus)?;
        if on && !self.pmic.output_enabled(output).unwrap_or(false) {
            return Err(RailError::Fault);
        }
        Ok(())
    }
}

impl<D, V, C, S, M> PowerRails for BoardRails<D, V, C, S, M>
where
    D: RailSwitch,
    V: RailSwitch,
    C: RailSwitch,
    S: RailSwitch,
    M: PanelPmic,
{
    fn enable(&mut self, rail: Rail) -> Result<(), RailError> {
        self.set(rail, true)
    }

    fn disable(&mut self, rail: Rail) -> Result<(), RailError> {
        self.set(rail, false)
    }

    fn is_enabled(&mut self, rail: Rail) -> bool {
        match rail {
            Rail::Display => self.display.is_on(),
            Rail::V3p3 => self.v3p3.is_on(),
            Rail::Clocks => self.clocks.is_on(),
            Rail::SystemSupply => self.system.is_on(),
            Rail::EpdDriver => self
                .pmic
                .output_enabled(PmicOutput::EpdDriver)
                .unwrap_or(false),
            Rail::Vcom => self.pmic.output_enabled(PmicOutput::Vcom).unwrap_or(false),
        }
    }
}
