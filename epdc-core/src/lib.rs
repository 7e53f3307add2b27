//! Board-agnostic update engine for e-paper display controllers
//!
//! This crate contains the scheduling logic that sits between callers
//! asking for screen updates and the controller hardware:
//!
//! - Collaborator traits (registers, power rails, temperature, co-processor)
//! - Region math and rotation
//! - Temperature compensation
//! - Buffer pool and admission control
//! - Merge and collision tracking
//! - Dispatch state machine and completion handling
//! - Power sequencing with thermal lockout
//! - Configuration type definitions

#![no_std]
#![deny(unsafe_code)]

// Must come first so the logging macros are visible to every module
mod fmt;

pub mod collision;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod markers;
pub mod pipeline;
pub mod pool;
pub mod power;
pub mod regs;
pub mod temperature;
pub mod traits;
pub mod update;
pub mod waveform;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::Error;
