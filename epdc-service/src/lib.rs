//! Async update service for e-paper display controllers
//!
//! Wraps an `epdc_core::Engine` behind an embassy mutex and provides:
//!
//! - Blocking-style `submit`, `wait` and `flush` for callers
//! - The dispatcher loop that reacts to controller interrupts
//! - The delayed power-down timer
//! - Configuration blob loading

#![no_std]
#![deny(unsafe_code)]

// Must come first so the logging macros are visible to every module
mod fmt;

pub mod config;
pub mod epdc;

pub use config::load_config;
pub use epdc::Epdc;
