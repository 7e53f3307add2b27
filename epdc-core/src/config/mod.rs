//! Configuration types
//!
//! Board-agnostic engine configuration, storable as postcard binary data.

#[cfg(feature = "serde")]
pub mod persist;
pub mod types;

pub use types::*;
