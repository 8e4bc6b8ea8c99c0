//! Peak filtering by strength, resolution, frame range and extinction.

use crate::config::FilterParams;
use crate::model::{Peak, SpaceGroup};

/// Outcome of a filter pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterVerdict {
    pub caught: usize,
    pub total: usize,
}

/// Filter criteria resolved from [`FilterParams`].
///
/// Every pass recomputes the `caught_by_filter` flag from scratch, so applying
/// the same filter twice gives the same verdict.
#[derive(Debug, Clone)]
pub struct PeakFilter<'a> {
    params: &'a FilterParams,
    space_group: Option<&'a SpaceGroup>,
}

impl<'a> PeakFilter<'a> {
    pub fn new(params: &'a FilterParams, space_group: Option<&'a SpaceGroup>) -> Self {
        Self {
            params,
            space_group,
        }
    }

    /// True if the peak passes every enabled criterion.
    pub fn accepts(&self, peak: &Peak) -> bool {
        let p = self.params;
        if !peak.selected {
            return false;
        }
        if p.filter_strength {
            match peak.strength() {
                Some(s) if s >= p.min_strength && s <= p.max_strength => {}
                _ => return false,
            }
        }
        if p.filter_d_range {
            let d = peak.d_spacing();
            if d < p.min_d_range || d > p.max_d_range {
                return false;
            }
        }
        if p.filter_frames {
            let frame = peak.position.frame;
            if frame < p.frame_min || frame > p.frame_max {
                return false;
            }
        }
        if p.extinct {
            if let (Some(sg), Some(hkl)) = (self.space_group, &peak.hkl) {
                if sg.is_extinct(hkl) {
                    return false;
                }
            }
        }
        true
    }

    /// Flag every peak and count the caught ones.
    pub fn apply(&self, peaks: &mut [Peak]) -> FilterVerdict {
        let mut caught = 0;
        for peak in peaks.iter_mut() {
            peak.caught_by_filter = self.accepts(peak);
            if peak.caught_by_filter {
                caught += 1;
            }
        }
        FilterVerdict {
            caught,
            total: peaks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DetectorPosition, Intensity, MillerIndex, PeakShape};

    fn peak(strength: f64, d: f64, frame: f64) -> Peak {
        let mut p = Peak::new(
            DetectorPosition::new(0.0, 0.0, frame),
            PeakShape::new(1.0, 1.0, 1.0),
            [1.0 / d, 0.0, 0.0],
        );
        p.intensity = Some(Intensity::new(strength * 10.0, 10.0));
        p
    }

    #[test]
    fn test_strength_and_resolution() {
        let params = FilterParams::default();
        let filter = PeakFilter::new(&params, None);
        assert!(filter.accepts(&peak(5.0, 3.0, 0.0)));
        assert!(!filter.accepts(&peak(0.5, 3.0, 0.0)));
        assert!(!filter.accepts(&peak(5.0, 1.0, 0.0)));
        assert!(!filter.accepts(&peak(5.0, 80.0, 0.0)));
    }

    #[test]
    fn test_unintegrated_peaks_fail_strength() {
        let params = FilterParams::default();
        let mut p = peak(5.0, 3.0, 0.0);
        p.intensity = None;
        assert!(!PeakFilter::new(&params, None).accepts(&p));

        let relaxed = FilterParams {
            filter_strength: false,
            ..FilterParams::default()
        };
        assert!(PeakFilter::new(&relaxed, None).accepts(&p));
    }

    #[test]
    fn test_frame_window() {
        let params = FilterParams {
            filter_frames: true,
            frame_min: 2.0,
            frame_max: 4.0,
            ..FilterParams::default()
        };
        let filter = PeakFilter::new(&params, None);
        assert!(filter.accepts(&peak(5.0, 3.0, 3.0)));
        assert!(!filter.accepts(&peak(5.0, 3.0, 4.5)));
    }

    #[test]
    fn test_extinction_needs_space_group_and_index() {
        let params = FilterParams {
            extinct: true,
            ..FilterParams::default()
        };
        let sg = SpaceGroup::parse("P 21 21 21").unwrap();
        let mut p = peak(5.0, 3.0, 0.0);
        p.hkl = Some(MillerIndex::new(0, 0, 3));
        assert!(PeakFilter::new(&params, None).accepts(&p));
        assert!(!PeakFilter::new(&params, Some(&sg)).accepts(&p));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let params = FilterParams::default();
        let filter = PeakFilter::new(&params, None);
        let mut peaks: Vec<Peak> = (0..20).map(|i| peak(i as f64 * 0.25, 3.0, 0.0)).collect();
        let first = filter.apply(&mut peaks);
        let second = filter.apply(&mut peaks);
        assert_eq!(first, second);
        assert_eq!(first.total, 20);
        assert_eq!(first.caught, 16);
    }
}
