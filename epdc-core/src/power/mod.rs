//! Panel power management
//!
//! Ordered rail sequencing with rollback, one retry per power-up, and a
//! lockout that cuts the upstream supply after repeated failures.

pub mod sequencer;

pub use sequencer::{PowerSequencer, PowerState, POWER_UP_SEQUENCE};
