//! Integration tests for peak filtering.

use diffract::config::FilterParams;
use diffract::engine::PeakFilter;
use diffract::model::{DetectorPosition, Intensity, MillerIndex, Peak, PeakShape, SpaceGroup, UnitCell};

/// 269 indexed peaks with a spread of strengths, resolutions and frames.
fn peaks() -> Vec<Peak> {
    let cell = UnitCell::new([24.5, 28.7, 37.7], [90.0; 3], "P 21 21 21");
    (0..269)
        .map(|i| {
            let hkl = MillerIndex::new(i % 9 - 4, (i / 9) % 7 - 3, (i / 63) % 5);
            let position = DetectorPosition::new(10.0 * i as f64, 5.0, (i % 40) as f64 + 0.5);
            let mut peak = Peak::new(position, PeakShape::new(2.0, 2.0, 1.0), cell.q_vector(&hkl));
            peak.hkl = Some(hkl);
            peak.intensity = Some(Intensity::new((i % 13) as f64 * 10.0, 10.0));
            peak
        })
        .collect()
}

fn params() -> FilterParams {
    FilterParams {
        min_strength: 3.0,
        max_d_range: 15.0,
        filter_frames: true,
        frame_min: 5.0,
        frame_max: 35.0,
        extinct: true,
        ..FilterParams::default()
    }
}

#[test]
fn test_filter_twice_gives_same_count() {
    let space_group = SpaceGroup::parse("P 21 21 21").unwrap();
    let params = params();
    let filter = PeakFilter::new(&params, Some(&space_group));
    let mut peaks = peaks();

    let first = filter.apply(&mut peaks);
    let flags: Vec<bool> = peaks.iter().map(|p| p.caught_by_filter).collect();
    let second = filter.apply(&mut peaks);

    assert_eq!(first.total, 269);
    assert_eq!(first, second);
    assert!(first.caught > 0 && first.caught < 269);
    assert_eq!(peaks.iter().map(|p| p.caught_by_filter).collect::<Vec<_>>(), flags);
}

#[test]
fn test_stale_flags_are_cleared() {
    let params = params();
    let filter = PeakFilter::new(&params, None);
    let mut peaks = peaks();
    for peak in peaks.iter_mut() {
        peak.caught_by_filter = true;
    }
    let verdict = filter.apply(&mut peaks);
    assert_eq!(
        peaks.iter().filter(|p| p.caught_by_filter).count(),
        verdict.caught
    );
}

#[test]
fn test_extinct_reflections_rejected() {
    let space_group = SpaceGroup::parse("P 21 21 21").unwrap();
    let params = FilterParams {
        filter_strength: false,
        filter_d_range: false,
        extinct: true,
        ..FilterParams::default()
    };
    let filter = PeakFilter::new(&params, Some(&space_group));
    let mut peaks = peaks();
    filter.apply(&mut peaks);

    for peak in &peaks {
        let hkl = peak.hkl.unwrap();
        assert_eq!(peak.caught_by_filter, !space_group.is_extinct(&hkl), "{:?}", hkl);
    }
}
