//! Region math
//!
//! Rectangles are in pixels with an inclusive origin and exclusive far
//! edge. Request regions live in display coordinates (what the caller
//! sees after rotation); execution units work in native panel coordinates.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin
    pub const fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if the two rectangles share at least one pixel
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }

    /// True if the rectangles share a pixel or an edge
    pub fn touches(&self, other: &Rect) -> bool {
        self.left <= other.right()
            && other.left <= self.right()
            && self.top <= other.bottom()
            && other.top <= self.bottom()
    }

    /// Shared area, if any
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.overlaps(other) {
            return None;
        }
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(Rect::new(left, top, right - left, bottom - top))
    }

    /// Smallest rectangle covering both
    pub fn union(&self, other: &Rect) -> Rect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(left, top, right - left, bottom - top)
    }

    /// True if `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Map a region from display coordinates into panel coordinates
    ///
    /// `xres`/`yres` are the display dimensions as seen by the caller
    /// (already swapped for 90/270 degree rotations).
    pub fn rotated(&self, rotation: Rotation, xres: u32, yres: u32) -> Rect {
        match rotation {
            Rotation::Upright => *self,
            Rotation::Clockwise => Rect::new(
                yres.saturating_sub(self.bottom()),
                self.left,
                self.height,
                self.width,
            ),
            Rotation::UpsideDown => Rect::new(
                xres.saturating_sub(self.right()),
                yres.saturating_sub(self.bottom()),
                self.width,
                self.height,
            ),
            Rotation::CounterClockwise => Rect::new(
                self.top,
                xres.saturating_sub(self.right()),
                self.height,
                self.width,
            ),
        }
    }

    /// Grow outwards so every edge lands on a multiple of `align`
    pub fn aligned_out(&self, align: u32) -> Rect {
        let left = self.left - self.left % align;
        let top = self.top - self.top % align;
        let right = self.right().div_ceil(align) * align;
        let bottom = self.bottom().div_ceil(align) * align;
        Rect::new(left, top, right - left, bottom - top)
    }
}

/// Display orientation relative to the native panel scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Rotation {
    #[default]
    Upright,
    Clockwise,
    UpsideDown,
    CounterClockwise,
}

impl Rotation {
    /// Rotation in degrees, as handed to the co-processor
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Upright => 0,
            Rotation::Clockwise => 90,
            Rotation::UpsideDown => 180,
            Rotation::CounterClockwise => 270,
        }
    }

    /// True if display width and height are swapped relative to the panel
    pub fn is_transposed(self) -> bool {
        matches!(self, Rotation::Clockwise | Rotation::CounterClockwise)
    }
}

/// Native panel resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PanelGeometry {
    pub width: u32,
    pub height: u32,
}

impl PanelGeometry {
    /// Display size as seen by callers under `rotation`
    pub fn display_size(&self, rotation: Rotation) -> (u32, u32) {
        if rotation.is_transposed() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Whole display in caller coordinates
    pub fn display_rect(&self, rotation: Rotation) -> Rect {
        let (w, h) = self.display_size(rotation);
        Rect::sized(w, h)
    }

    /// Whole panel in native coordinates
    pub fn panel_rect(&self) -> Rect {
        Rect::sized(self.width, self.height)
    }
}
