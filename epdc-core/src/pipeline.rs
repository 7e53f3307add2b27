//! Co-processor job planning
//!
//! The co-processor works on 8x8 pixel blocks and needs its input pointer
//! 32-bit aligned. Regions that violate either rule get widened, and when
//! the widening would pull foreign pixels into auto-waveform analysis (or
//! overrun a line) the source is first copied into a zero-padded scratch
//! buffer.

use crate::geometry::{Rect, Rotation};

/// Content histogram reported by the co-processor
///
/// Each bit says the processed pixels fit in a gray-level subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HistogramStats(u32);

impl HistogramStats {
    const DU: u32 = 1 << 0;
    const GC4: u32 = 1 << 1;
    const GC8: u32 = 1 << 2;
    const GC16: u32 = 1 << 3;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Black and white only
    pub fn fits_du(self) -> bool {
        self.0 & Self::DU != 0
    }

    pub fn fits_gc4(self) -> bool {
        self.0 & Self::GC4 != 0
    }

    pub fn fits_gc8(self) -> bool {
        self.0 & Self::GC8 != 0
    }

    pub fn fits_gc16(self) -> bool {
        self.0 & Self::GC16 != 0
    }
}

/// Pixel surface a job reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Surface {
    pub addr: u32,
    /// Line length in pixels
    pub width: u32,
    pub height: u32,
}

/// Per-job settings that do not come from the region itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlanContext {
    pub bytes_per_pixel: u32,
    pub rotation: Rotation,
    /// Waveform will be picked from this job's histogram
    pub auto_waveform: bool,
    pub invert: bool,
    pub monochrome: bool,
    /// Processing buffer receiving the output
    pub output_addr: u32,
}

/// One co-processor job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipelineJob {
    /// Surface holding the source pixels
    pub source: Surface,
    /// Copy `copy_region` of the source into a padded scratch buffer first
    pub copy_first: bool,
    /// Region of `source` to copy when `copy_first` is set
    pub copy_region: Rect,
    /// Byte offset of the input pointer, relative to the source (or scratch)
    pub input_offset: u32,
    /// Line length of the input in pixels
    pub input_width: u32,
    /// Block-aligned region processed, relative to the input pointer
    pub region: Rect,
    pub rotation: Rotation,
    pub invert: bool,
    pub monochrome: bool,
    /// Output pointer inside the processing buffer
    pub output_addr: u32,
    /// Byte offset the execution unit reads from, relative to the buffer
    pub read_offset: u32,
}

fn align8(v: u32) -> u32 {
    v.div_ceil(8) * 8
}

impl PipelineJob {
    /// Plan a job converting `region` of `source`
    pub fn plan(source: Surface, region: Rect, ctx: &PlanContext) -> Self {
        let bpp = ctx.bytes_per_pixel.max(1);
        // Bytes between the region start and the previous word boundary
        let misalignment = |left: u32| ((left & 0x3) * bpp) % 4;

        let lead_pixels = misalignment(region.left) / bpp;
        let blocks_unaligned =
            region.width & 0x7 != 0 || region.height & 0x7 != 0 || misalignment(region.left) != 0;
        let line_overflow = !ctx.rotation.is_transposed()
            && align8(region.width) < align8(region.width + lead_pixels);
        let copy_first = (blocks_unaligned && ctx.auto_waveform) || line_overflow;

        let (input_width, src) = if copy_first {
            (align8(region.width), Rect::sized(region.width, region.height))
        } else {
            (source.width, region)
        };

        let shift_bytes = misalignment(src.left);
        let exact_offset = (src.top * input_width + src.left) * bpp;
        let (input_offset, lead) = if shift_bytes != 0 {
            (exact_offset & !0x3, shift_bytes / bpp)
        } else {
            (exact_offset, 0)
        };

        let processed = Rect::sized(align8(src.width + lead), align8(src.height));

        // Where the region's first pixel lands in the rotated output
        let (stride, x, y) = match ctx.rotation {
            Rotation::Upright => (processed.width, lead, 0),
            Rotation::Clockwise => (processed.height, processed.height - src.height, lead),
            Rotation::UpsideDown => (
                processed.width,
                processed.width - src.width - lead,
                processed.height - src.height,
            ),
            Rotation::CounterClockwise => {
                (processed.height, 0, processed.width - src.width - lead)
            }
        };
        let output_shift = align8(x) - x;

        Self {
            source,
            copy_first,
            copy_region: region,
            input_offset,
            input_width,
            region: processed,
            rotation: ctx.rotation,
            invert: ctx.invert,
            monochrome: ctx.monochrome,
            output_addr: ctx.output_addr.wrapping_add(output_shift),
            read_offset: y * stride + align8(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FB: Surface = Surface {
        addr: 0x8000_0000,
        width: 800,
        height: 600,
    };

    fn ctx(auto: bool, rotation: Rotation) -> PlanContext {
        PlanContext {
            bytes_per_pixel: 2,
            rotation,
            auto_waveform: auto,
            invert: false,
            monochrome: false,
            output_addr: 0x9000_0000,
        }
    }

    #[test]
    fn test_aligned_region_reads_in_place() {
        let region = Rect::new(16, 8, 64, 32);
        let job = PipelineJob::plan(FB, region, &ctx(true, Rotation::Upright));
        assert!(!job.copy_first);
        assert_eq!(job.input_offset, (8 * 800 + 16) * 2);
        assert_eq!(job.region, Rect::sized(64, 32));
        assert_eq!(job.output_addr, 0x9000_0000);
        assert_eq!(job.read_offset, 0);
    }

    #[test]
    fn test_unaligned_auto_copies_first() {
        let region = Rect::new(3, 5, 10, 10);
        let job = PipelineJob::plan(FB, region, &ctx(true, Rotation::Upright));
        assert!(job.copy_first);
        assert_eq!(job.copy_region, region);
        assert_eq!(job.input_width, 16);
        assert_eq!(job.input_offset, 0);
        assert_eq!(job.region, Rect::sized(16, 16));
    }

    #[test]
    fn test_unaligned_fixed_mode_shifts_input() {
        // 2 bytes per pixel, left=1 sits 2 bytes past a word boundary
        let region = Rect::new(1, 0, 15, 8);
        let job = PipelineJob::plan(FB, region, &ctx(false, Rotation::Upright));
        assert!(!job.copy_first);
        assert_eq!(job.input_offset, 0);
        assert_eq!(job.region, Rect::sized(16, 8));
        // Output is shifted so the first real pixel lands block aligned
        assert_eq!(job.output_addr, 0x9000_0000 + 7);
        assert_eq!(job.read_offset, 8);
    }

    #[test]
    fn test_line_overflow_forces_copy() {
        // Shift of one pixel pushes a 8-aligned width over a block boundary
        let region = Rect::new(1, 0, 8, 8);
        let job = PipelineJob::plan(FB, region, &ctx(false, Rotation::Upright));
        assert!(job.copy_first);
    }

    #[test]
    fn test_rotated_read_offset() {
        let region = Rect::new(0, 0, 16, 12);
        let job = PipelineJob::plan(FB, region, &ctx(false, Rotation::Clockwise));
        // Processed 16x16, first pixel lands at x = 16 - 12 on row 0
        assert_eq!(job.region, Rect::sized(16, 16));
        assert_eq!(job.output_addr, 0x9000_0000 + 4);
        assert_eq!(job.read_offset, 8);
    }
}
