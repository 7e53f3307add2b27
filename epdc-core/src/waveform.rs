//! Waveform mode selection
//!
//! Callers name a drive-timing profile; the loaded waveform data decides
//! which hardware index each profile lives at.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pipeline::HistogramStats;

/// Drive-timing profile requested for an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaveformMode {
    /// Pick from the co-processor's content histogram
    Auto,
    Init,
    /// Direct update, black/white only
    Du,
    Gc4,
    Gc8,
    Gc16,
    Gc32,
    /// Fast monochrome animation mode
    A2,
    /// Hardware index given directly
    Raw(u16),
}

/// Hardware index of each named mode in the loaded waveform data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WaveformModes {
    pub init: u8,
    pub du: u8,
    pub gc4: u8,
    pub gc8: u8,
    pub gc16: u8,
    pub gc32: u8,
    pub a2: u8,
}

impl Default for WaveformModes {
    fn default() -> Self {
        Self {
            init: 0,
            du: 1,
            gc4: 3,
            gc8: 2,
            gc16: 2,
            gc32: 2,
            a2: 4,
        }
    }
}

impl WaveformModes {
    /// Hardware index for a concrete mode
    ///
    /// Returns `None` for `Auto` (not resolved yet) and for raw indices that
    /// do not fit the update control register.
    pub fn index_of(&self, mode: WaveformMode) -> Option<u8> {
        match mode {
            WaveformMode::Auto => None,
            WaveformMode::Init => Some(self.init),
            WaveformMode::Du => Some(self.du),
            WaveformMode::Gc4 => Some(self.gc4),
            WaveformMode::Gc8 => Some(self.gc8),
            WaveformMode::Gc16 => Some(self.gc16),
            WaveformMode::Gc32 => Some(self.gc32),
            WaveformMode::A2 => Some(self.a2),
            WaveformMode::Raw(n) => u8::try_from(n).ok(),
        }
    }

    /// True if `mode` is usable in a request
    pub fn accepts(&self, mode: WaveformMode) -> bool {
        mode == WaveformMode::Auto || self.index_of(mode).is_some()
    }

    /// True if `mode` selects the same hardware waveform as `named`
    pub fn is(&self, mode: WaveformMode, named: WaveformMode) -> bool {
        match (self.index_of(mode), self.index_of(named)) {
            (Some(a), Some(b)) => a == b,
            _ => mode == named,
        }
    }
}

/// Pick a concrete mode from the co-processor's content histogram
///
/// The histogram reports which gray-level subsets the region fits in;
/// the narrowest one wins.
pub fn resolve_auto(stats: HistogramStats) -> WaveformMode {
    if stats.fits_du() {
        WaveformMode::Du
    } else if stats.fits_gc4() {
        WaveformMode::Gc4
    } else if stats.fits_gc8() {
        WaveformMode::Gc8
    } else if stats.fits_gc16() {
        WaveformMode::Gc16
    } else {
        WaveformMode::Gc32
    }
}
