//! Merge rules for queued requests
//!
//! `a` is the candidate already chosen for dispatch, `b` a later entry the
//! scheduler would like to fold into it.

use super::request::PendingUpdate;
use crate::waveform::WaveformMode;

/// Result of attempting to fold one request into another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MergeOutcome {
    /// `b` was absorbed into `a`
    Merged,
    /// Not compatible, keep scanning
    Fail,
    /// Flag boundary, stop scanning so ordering is kept
    Blocked,
}

/// Try to fold `b` into `a`
///
/// On `Merged`, `a` holds the combined request and `b` can be released.
pub fn try_merge(a: &mut PendingUpdate, b: &PendingUpdate) -> MergeOutcome {
    let ra = &a.request;
    let rb = &b.request;

    if ra.flags != rb.flags && ra.region != rb.region {
        return MergeOutcome::Blocked;
    }

    let modes_clash = ra.waveform != rb.waveform
        && ra.waveform != WaveformMode::Auto
        && rb.waveform != WaveformMode::Auto;
    if modes_clash
        || ra.kind != rb.kind
        || !ra.region.touches(&rb.region)
        || (ra.marker.is_some() && rb.marker.is_some())
        || ra.is_whitening()
        || rb.is_whitening()
        || a.processed.is_some()
        || b.processed.is_some()
    {
        return MergeOutcome::Fail;
    }

    // Alternate-buffer regions cannot be widened
    if ra.alt_source.is_some() && rb.alt_source.is_some() && ra.region != rb.region {
        return MergeOutcome::Fail;
    }

    let region = ra.region.union(&rb.region);
    let waveform = if ra.waveform == rb.waveform {
        ra.waveform
    } else {
        WaveformMode::Auto
    };

    let merged = &mut a.request;
    merged.region = region;
    merged.waveform = waveform;
    merged.flags = rb.flags;
    merged.alt_source = rb.alt_source;
    if rb.marker.is_some() {
        merged.marker = rb.marker;
    }
    if rb.temperature.is_some() {
        merged.temperature = rb.temperature;
    }
    a.order = a.order.max(b.order);

    MergeOutcome::Merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::update::request::{Marker, UpdateFlags, UpdateRequest};

    fn pending(region: Rect, mode: WaveformMode, order: u32) -> PendingUpdate {
        PendingUpdate::new(UpdateRequest::full(region, mode), order)
    }

    #[test]
    fn test_overlapping_merge_to_bounding_box() {
        let mut a = pending(Rect::new(0, 0, 100, 100), WaveformMode::Gc16, 1);
        let b = pending(Rect::new(50, 50, 100, 100), WaveformMode::Gc16, 2);
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Merged);
        assert_eq!(a.request.region, Rect::new(0, 0, 150, 150));
        assert_eq!(a.order, 2);
    }

    #[test]
    fn test_touching_regions_merge() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        let b = pending(Rect::new(10, 0, 10, 10), WaveformMode::Du, 2);
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Merged);
        assert_eq!(a.request.region, Rect::new(0, 0, 20, 10));
    }

    #[test]
    fn test_disjoint_regions_fail() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        let b = pending(Rect::new(20, 20, 10, 10), WaveformMode::Du, 2);
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Fail);
        assert_eq!(a.request.region, Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn test_flag_boundary_blocks() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        let mut b = pending(Rect::new(5, 5, 10, 10), WaveformMode::Du, 2);
        b.request.flags = UpdateFlags::INVERT;
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Blocked);
    }

    #[test]
    fn test_flag_difference_allowed_for_identical_region() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        let mut b = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 2);
        b.request.flags = UpdateFlags::INVERT;
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Merged);
        assert_eq!(a.request.flags, UpdateFlags::INVERT);
    }

    #[test]
    fn test_mode_clash_fails_unless_auto() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        let b = pending(Rect::new(0, 0, 10, 10), WaveformMode::Gc16, 2);
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Fail);

        let c = pending(Rect::new(0, 0, 10, 10), WaveformMode::Auto, 3);
        assert_eq!(try_merge(&mut a, &c), MergeOutcome::Merged);
        assert_eq!(a.request.waveform, WaveformMode::Auto);
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        let b = PendingUpdate::new(
            UpdateRequest::partial(Rect::new(0, 0, 10, 10), WaveformMode::Du),
            2,
        );
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Fail);
    }

    #[test]
    fn test_markers() {
        let m1 = Marker::new(1).unwrap();
        let m2 = Marker::new(2).unwrap();

        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        a.request.marker = Some(m1);
        let mut b = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 2);
        b.request.marker = Some(m2);
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Fail);

        let mut c = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 1);
        assert_eq!(try_merge(&mut c, &b), MergeOutcome::Merged);
        assert_eq!(c.request.marker, Some(m2));
    }

    #[test]
    fn test_whitening_never_merges() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::A2, 1);
        a.request.flags = UpdateFlags::WHITEN;
        let mut b = pending(Rect::new(0, 0, 10, 10), WaveformMode::A2, 2);
        b.request.flags = UpdateFlags::WHITEN;
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Fail);
    }

    #[test]
    fn test_order_takes_maximum() {
        let mut a = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 9);
        let b = pending(Rect::new(0, 0, 10, 10), WaveformMode::Du, 4);
        assert_eq!(try_merge(&mut a, &b), MergeOutcome::Merged);
        assert_eq!(a.order, 9);
    }
}
