//! Update request types

use bitflags::bitflags;

use crate::geometry::Rect;
use crate::waveform::WaveformMode;

/// Partial updates only drive changed pixels; full updates drive all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateKind {
    #[default]
    Partial,
    Full,
}

bitflags! {
    /// Per-request processing options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u8 {
        /// Read pixels from an alternate buffer instead of the framebuffer
        const ALT_SOURCE = 1 << 0;
        /// Invert gray levels
        const INVERT = 1 << 1;
        /// Collapse to black and white
        const MONOCHROME = 1 << 2;
        /// Single-shot whitening update, set by the engine at admission
        const WHITEN = 1 << 3;
    }
}

/// Caller-chosen completion token
///
/// Zero is reserved, so a marker is always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Marker(u32);

impl Marker {
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

/// Alternate pixel source for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AltSource {
    /// Physical address of the buffer
    pub addr: u32,
    /// Buffer width in pixels
    pub width: u32,
    /// Buffer height in pixels
    pub height: u32,
    /// Region inside the buffer to read from
    pub region: Rect,
}

/// A caller's update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Target region in display coordinates
    pub region: Rect,
    pub waveform: WaveformMode,
    pub kind: UpdateKind,
    pub flags: UpdateFlags,
    pub alt_source: Option<AltSource>,
    /// Temperature (°C) to compensate for instead of ambient
    pub temperature: Option<i32>,
    pub marker: Option<Marker>,
}

impl UpdateRequest {
    pub fn new(region: Rect, waveform: WaveformMode, kind: UpdateKind) -> Self {
        Self {
            region,
            waveform,
            kind,
            flags: UpdateFlags::empty(),
            alt_source: None,
            temperature: None,
            marker: None,
        }
    }

    pub fn partial(region: Rect, waveform: WaveformMode) -> Self {
        Self::new(region, waveform, UpdateKind::Partial)
    }

    pub fn full(region: Rect, waveform: WaveformMode) -> Self {
        Self::new(region, waveform, UpdateKind::Full)
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_temperature(mut self, temp_c: i32) -> Self {
        self.temperature = Some(temp_c);
        self
    }

    pub fn with_alt_source(mut self, source: AltSource) -> Self {
        self.alt_source = Some(source);
        self.flags |= UpdateFlags::ALT_SOURCE;
        self
    }

    pub fn is_whitening(&self) -> bool {
        self.flags.contains(UpdateFlags::WHITEN)
    }
}

/// Processed pixel data carried by a request admitted under the snapshot
/// scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Processed {
    /// Concrete waveform after auto resolution
    pub waveform: WaveformMode,
    /// Byte offset the execution unit reads from inside the buffer
    pub read_offset: u32,
}

/// An admitted request as held in a processing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    pub request: UpdateRequest,
    /// Arbitration key, higher is newer
    pub order: u32,
    /// Set once pixel data is in the buffer ahead of dispatch
    pub processed: Option<Processed>,
}

impl PendingUpdate {
    pub fn new(request: UpdateRequest, order: u32) -> Self {
        Self {
            request,
            order,
            processed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_rejects_zero() {
        assert!(Marker::new(0).is_none());
        assert_eq!(Marker::new(7).map(Marker::value), Some(7));
    }

    #[test]
    fn test_alt_source_sets_flag() {
        let req = UpdateRequest::partial(Rect::new(0, 0, 10, 10), WaveformMode::Du)
            .with_alt_source(AltSource {
                addr: 0x8000_0000,
                width: 64,
                height: 64,
                region: Rect::new(0, 0, 10, 10),
            });
        assert!(req.flags.contains(UpdateFlags::ALT_SOURCE));
        assert!(!req.is_whitening());
    }
}
