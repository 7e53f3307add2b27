//! Temperature compensation
//!
//! Waveform timing depends on panel temperature. The waveform data comes
//! with a sorted list of range boundaries; entry `i` starts range `i`.

use heapless::Vec;

/// Maximum number of temperature ranges in one waveform file
pub const MAX_TEMPERATURE_RANGES: usize = 32;

/// Assumed ambient temperature before the first sensor reading (°C)
pub const DEFAULT_TEMPERATURE_C: i32 = 20;

/// Table construction errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableError {
    /// More boundaries than the table can hold
    TooManyRanges,
    /// Boundaries are not strictly ascending
    Unsorted,
}

/// Boundary table mapping a temperature to a waveform timing index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemperatureTable {
    bounds: Vec<i32, MAX_TEMPERATURE_RANGES>,
}

impl TemperatureTable {
    /// Build a table from ascending range boundaries
    pub fn new(bounds: &[i32]) -> Result<Self, TableError> {
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TableError::Unsorted);
        }
        let bounds = Vec::from_slice(bounds).map_err(|_| TableError::TooManyRanges)?;
        Ok(Self { bounds })
    }

    /// Number of ranges
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Timing index for `temp`
    ///
    /// Below the first boundary clamps to 0, at or above the last boundary
    /// clamps to the last index. An empty table always yields 0.
    pub fn index_for(&self, temp: i32) -> usize {
        // Bounds are ascending, so the count at or below temp locates the range
        let at_or_below = self.bounds.partition_point(|&b| b <= temp);
        at_or_below.saturating_sub(1)
    }
}

/// Convert an 8-bit two's complement sensor register to °C
pub fn celsius_from_raw(raw: u8) -> i32 {
    raw as i8 as i32
}
