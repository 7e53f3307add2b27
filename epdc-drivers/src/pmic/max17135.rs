//! MAX17135 e-paper PMIC
//!
//! Register-level driver over I2C. The chip generates the source, gate
//! and VCOM supplies and measures the panel thermistor.
//!
//! # Enabling
//!
//! `ENABLE.EN` starts the whole high-voltage sequence; `ENABLE.VCOM`
//! switches VCOM separately and only takes effect while `EN` is set.

use embedded_hal::i2c::I2c;
use epdc_core::temperature::celsius_from_raw;
use epdc_core::traits::{SensorError, TemperatureSensor};

use super::{PanelPmic, PmicOutput};

/// Default 7-bit I2C address
pub const DEFAULT_ADDRESS: u8 = 0x48;

/// Product ID register value
pub const PRODUCT_ID: u8 = 0x4D;

/// MAX17135 register addresses
pub mod reg {
    /// External thermistor temperature, integer degrees in the high byte
    pub const EXT_TEMP: u8 = 0x00;
    /// Thermistor configuration
    pub const CONFIG: u8 = 0x01;
    /// Die temperature
    pub const INT_TEMP: u8 = 0x04;
    /// Thermistor status
    pub const TEMP_STAT: u8 = 0x05;
    pub const PROD_REV: u8 = 0x06;
    pub const PROD_ID: u8 = 0x07;
    /// VCOM DAC setting
    pub const DVR: u8 = 0x08;
    /// Output enables
    pub const ENABLE: u8 = 0x09;
    /// Latched faults
    pub const FAULT: u8 = 0x0A;
}

pub const ENABLE_EN: u8 = 1 << 0;
pub const ENABLE_VCOM: u8 = 1 << 1;

pub const TEMP_STAT_BUSY: u8 = 1 << 0;
pub const TEMP_STAT_OPEN: u8 = 1 << 1;
pub const TEMP_STAT_SHORT: u8 = 1 << 2;

/// Least negative VCOM the DAC produces, at code 0
pub const VCOM_MAX_MV: i32 = -500;
/// Most negative VCOM, at code 255
pub const VCOM_MIN_MV: i32 = -4325;
/// DAC step
pub const VCOM_STEP_MV: i32 = 15;

/// Latched PMIC faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Faults(pub u8);

impl Faults {
    pub const FB_POS: u8 = 1 << 0;
    pub const FB_NEG: u8 = 1 << 1;
    pub const HV_INP_UV: u8 = 1 << 2;
    pub const DVR_UV: u8 = 1 << 3;
    pub const VCOM_SHORT: u8 = 1 << 4;
    pub const THERMAL_SHUTDOWN: u8 = 1 << 6;

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn thermal_shutdown(self) -> bool {
        self.0 & Self::THERMAL_SHUTDOWN != 0
    }
}

/// PMIC errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmicError<E> {
    /// I2C transaction failed
    Bus(E),
    /// Product ID did not match
    UnknownDevice(u8),
    /// VCOM outside the DAC range
    VcomOutOfRange,
}

/// Convert a VCOM voltage to its DAC code
pub fn vcom_code(mv: i32) -> Option<u8> {
    if !(VCOM_MIN_MV..=VCOM_MAX_MV).contains(&mv) {
        return None;
    }
    Some(((VCOM_MAX_MV - mv) / VCOM_STEP_MV).min(255) as u8)
}

/// Convert a DAC code back to millivolts
pub fn vcom_mv(code: u8) -> i32 {
    VCOM_MAX_MV - code as i32 * VCOM_STEP_MV
}

/// MAX17135 driver
pub struct Max17135<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Max17135<I> {
    /// Create a driver at the default address
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Release the bus
    pub fn release(self) -> I {
        self.i2c
    }

    #[cfg(test)]
    pub(crate) fn bus(&mut self) -> &mut I {
        &mut self.i2c
    }

    /// Check the product ID register
    pub fn probe(&mut self) -> Result<u8, PmicError<I::Error>> {
        let id = self.read_reg(reg::PROD_ID)?;
        if id != PRODUCT_ID {
            return Err(PmicError::UnknownDevice(id));
        }
        self.read_reg(reg::PROD_REV)
    }

    fn read_reg(&mut self, register: u8) -> Result<u8, PmicError<I::Error>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(PmicError::Bus)?;
        Ok(buf[0])
    }

    fn write_reg(&mut self, register: u8, value: u8) -> Result<(), PmicError<I::Error>> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(PmicError::Bus)
    }

    fn modify_enable(&mut self, set: u8, clear: u8) -> Result<(), PmicError<I::Error>> {
        let value = self.read_reg(reg::ENABLE)?;
        self.write_reg(reg::ENABLE, (value & !clear) | set)
    }

    /// Program VCOM, in millivolts (negative)
    pub fn set_vcom_mv(&mut self, mv: i32) -> Result<(), PmicError<I::Error>> {
        let code = vcom_code(mv).ok_or(PmicError::VcomOutOfRange)?;
        self.write_reg(reg::DVR, code)
    }

    /// Programmed VCOM in millivolts
    pub fn vcom(&mut self) -> Result<i32, PmicError<I::Error>> {
        Ok(vcom_mv(self.read_reg(reg::DVR)?))
    }

    /// Read and clear latched faults
    pub fn faults(&mut self) -> Result<Faults, PmicError<I::Error>> {
        self.read_reg(reg::FAULT).map(Faults)
    }

    /// External thermistor reading in whole degrees
    pub fn thermistor_celsius(&mut self) -> Result<i32, PmicError<I::Error>> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[reg::EXT_TEMP], &mut buf)
            .map_err(PmicError::Bus)?;
        Ok(celsius_from_raw(buf[0]))
    }
}

impl<I: I2c> PanelPmic for Max17135<I> {
    type Error = PmicError<I::Error>;

    fn set_output(&mut self, output: PmicOutput, on: bool) -> Result<(), Self::Error> {
        let bit = match output {
            PmicOutput::EpdDriver => ENABLE_EN,
            PmicOutput::Vcom => ENABLE_VCOM,
        };
        match (output, on) {
            // Dropping the main enable takes VCOM down with it
            (PmicOutput::EpdDriver, false) => self.modify_enable(0, ENABLE_EN | ENABLE_VCOM),
            (_, true) => self.modify_enable(bit, 0),
            (_, false) => self.modify_enable(0, bit),
        }
    }

    fn output_enabled(&mut self, output: PmicOutput) -> Result<bool, Self::Error> {
        let value = self.read_reg(reg::ENABLE)?;
        Ok(match output {
            PmicOutput::EpdDriver => value & ENABLE_EN != 0,
            PmicOutput::Vcom => value & ENABLE_EN != 0 && value & ENABLE_VCOM != 0,
        })
    }
}

impl<I: I2c> TemperatureSensor for Max17135<I> {
    fn read_celsius(&mut self) -> Result<i32, SensorError> {
        let status = self
            .read_reg(reg::TEMP_STAT)
            .map_err(|_| SensorError::Bus)?;
        if status & TEMP_STAT_OPEN != 0 {
            return Err(SensorError::OpenCircuit);
        }
        if status & TEMP_STAT_SHORT != 0 {
            return Err(SensorError::OutOfRange);
        }
        self.thermistor_celsius().map_err(|_| SensorError::Bus)
    }
}
