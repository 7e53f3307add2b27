//! Panel power management ICs

pub mod max17135;

pub use max17135::{Max17135, PmicError};

/// High-voltage outputs a PMIC switches for the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmicOutput {
    /// Source/gate driver supplies
    EpdDriver,
    /// Common electrode
    Vcom,
}

/// Trait for PMICs whose outputs the board rail set can switch
pub trait PanelPmic {
    type Error;

    /// Switch one output
    fn set_output(&mut self, output: PmicOutput, on: bool) -> Result<(), Self::Error>;

    /// Read back whether an output is on
    ///
    /// Reflects the hardware, so it also catches a thermal cut-out.
    fn output_enabled(&mut self, output: PmicOutput) -> Result<bool, Self::Error>;
}
