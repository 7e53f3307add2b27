//! Panel temperature sensing

/// Errors that can occur with temperature sensing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Bus transaction failed
    Bus,
    /// Sensor disconnected
    OpenCircuit,
    /// Reading out of expected range
    OutOfRange,
}

/// Trait for panel temperature sensors
pub trait TemperatureSensor {
    /// Read the current temperature in whole degrees Celsius
    fn read_celsius(&mut self) -> Result<i32, SensorError>;
}
