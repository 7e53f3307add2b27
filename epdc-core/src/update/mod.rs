//! Update requests and merge rules
//!
//! A request describes one region to redraw. Once admitted it carries an
//! arbitration `order` and may absorb later compatible requests.

pub mod merge;
pub mod request;

pub use merge::{try_merge, MergeOutcome};
pub use request::{
    AltSource, Marker, PendingUpdate, Processed, UpdateFlags, UpdateKind, UpdateRequest,
};
