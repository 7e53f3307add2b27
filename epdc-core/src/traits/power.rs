//! Power rail and clock control

/// Switchable supplies and clocks, in power-up order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rail {
    /// Panel logic supply
    Display,
    /// 3.3V rail
    V3p3,
    /// Pixel and processing clocks
    Clocks,
    /// PMIC high-voltage outputs driving the panel
    EpdDriver,
    /// Common electrode voltage
    Vcom,
    /// Upstream system supply feeding the PMIC
    SystemSupply,
}

/// Rail control failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RailError {
    /// Regulator or clock refused the request
    Fault,
    /// Bus to the regulator failed
    Bus,
    /// Rail not present on this board
    Unsupported,
}

/// Trait for boards that can switch the panel supplies
pub trait PowerRails {
    /// Switch a rail on
    fn enable(&mut self, rail: Rail) -> Result<(), RailError>;

    /// Switch a rail off
    fn disable(&mut self, rail: Rail) -> Result<(), RailError>;

    /// Check whether a rail is currently on
    ///
    /// A rail can drop on its own, e.g. when the PMIC trips its thermal
    /// shutdown.
    fn is_enabled(&mut self, rail: Rail) -> bool;
}
