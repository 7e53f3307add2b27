//! Board drivers for the e-paper update engine
//!
//! Concrete implementations of the collaborator traits in epdc-core:
//!
//! - PMIC (MAX17135-style) over I2C: EPD driver and VCOM outputs,
//!   VCOM voltage, external thermistor
//! - GPIO switched supplies
//! - Board rail set mapping every `Rail` to its switch

#![no_std]
#![deny(unsafe_code)]

pub mod pmic;
pub mod rail;
