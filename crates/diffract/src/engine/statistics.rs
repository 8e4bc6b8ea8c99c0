//! Merging statistics over groups of symmetry-equivalent observations.

use crate::model::QualityShell;

/// Observations of one unique reflection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeGroup {
    pub d: f64,
    pub intensities: Vec<f64>,
}

impl MergeGroup {
    pub fn mean(&self) -> f64 {
        if self.intensities.is_empty() {
            return 0.0;
        }
        self.intensities.iter().sum::<f64>() / self.intensities.len() as f64
    }

    /// Means of the two halves from an alternating split.
    fn half_means(&self) -> Option<(f64, f64)> {
        if self.intensities.len() < 2 {
            return None;
        }
        let (mut a, mut na, mut b, mut nb) = (0.0, 0, 0.0, 0);
        for (i, v) in self.intensities.iter().enumerate() {
            if i % 2 == 0 {
                a += v;
                na += 1;
            } else {
                b += v;
                nb += 1;
            }
        }
        Some((a / na as f64, b / nb as f64))
    }
}

/// Fill R-factors, CC½, CC*, redundancy and completeness of `shell`.
///
/// `expected` is the number of unique reflections the shell could hold.
pub fn shell_statistics(shell: &mut QualityShell, groups: &[&MergeGroup], expected: usize) {
    shell.n_unique = groups.len();
    shell.n_peaks = groups.iter().map(|g| g.intensities.len()).sum();
    shell.redundancy = if groups.is_empty() {
        0.0
    } else {
        shell.n_peaks as f64 / groups.len() as f64
    };
    shell.completeness = if expected == 0 {
        0.0
    } else {
        (groups.len() as f64 / expected as f64).min(1.0)
    };

    let (mut merge, mut meas, mut pim, mut total) = (0.0, 0.0, 0.0, 0.0);
    for group in groups.iter().filter(|g| g.intensities.len() >= 2) {
        let n = group.intensities.len() as f64;
        let mean = group.mean();
        let deviation: f64 = group.intensities.iter().map(|i| (i - mean).abs()).sum();
        merge += deviation;
        meas += (n / (n - 1.0)).sqrt() * deviation;
        pim += (1.0 / (n - 1.0)).sqrt() * deviation;
        total += group.intensities.iter().sum::<f64>();
    }
    if total > 0.0 {
        shell.r_merge = merge / total;
        shell.r_meas = meas / total;
        shell.r_pim = pim / total;
    }

    let halves: Vec<(f64, f64)> = groups.iter().filter_map(|g| g.half_means()).collect();
    shell.cc_half = pearson(&halves);
    shell.cc_star = if shell.cc_half > 0.0 {
        (2.0 * shell.cc_half / (1.0 + shell.cc_half)).sqrt()
    } else {
        0.0
    };
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    sxy / (sxx * syy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(values: &[f64]) -> MergeGroup {
        MergeGroup {
            d: 3.0,
            intensities: values.to_vec(),
        }
    }

    #[test]
    fn test_perfect_agreement() {
        let groups = [group(&[100.0, 100.0]), group(&[50.0, 50.0]), group(&[10.0, 10.0])];
        let refs: Vec<&MergeGroup> = groups.iter().collect();
        let mut shell = QualityShell::default();
        shell_statistics(&mut shell, &refs, 6);
        assert_eq!(shell.r_merge, 0.0);
        assert!((shell.cc_half - 1.0).abs() < 1e-12);
        assert!((shell.cc_star - 1.0).abs() < 1e-12);
        assert_eq!(shell.n_peaks, 6);
        assert_eq!(shell.n_unique, 3);
        assert!((shell.completeness - 0.5).abs() < 1e-12);
        assert!((shell.redundancy - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_r_factors() {
        let groups = [group(&[90.0, 110.0])];
        let refs: Vec<&MergeGroup> = groups.iter().collect();
        let mut shell = QualityShell::default();
        shell_statistics(&mut shell, &refs, 1);
        assert!((shell.r_merge - 0.1).abs() < 1e-12);
        assert!((shell.r_meas - 0.1 * 2f64.sqrt()).abs() < 1e-12);
        assert!((shell.r_pim - 0.1).abs() < 1e-12);
        // A single group cannot give a correlation.
        assert_eq!(shell.cc_half, 0.0);
    }

    #[test]
    fn test_empty_shell() {
        let mut shell = QualityShell::default();
        shell_statistics(&mut shell, &[], 10);
        assert_eq!(shell.n_peaks, 0);
        assert_eq!(shell.completeness, 0.0);
        assert_eq!(shell.r_merge, 0.0);
    }
}
