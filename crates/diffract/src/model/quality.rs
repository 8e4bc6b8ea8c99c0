//! Merging statistics per resolution shell.

use serde::{Deserialize, Serialize};

use crate::error::{DiffractError, Result};

/// Statistics for one resolution bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityShell {
    /// High-resolution limit (smaller d).
    pub d_min: f64,
    /// Low-resolution limit (larger d).
    pub d_max: f64,
    pub n_peaks: usize,
    pub n_unique: usize,
    pub redundancy: f64,
    pub r_merge: f64,
    pub r_meas: f64,
    pub r_pim: f64,
    pub cc_half: f64,
    pub cc_star: f64,
    pub completeness: f64,
}

/// Shells from low to high resolution plus an overall row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub shells: Vec<QualityShell>,
    pub overall: QualityShell,
}

impl QualityReport {
    /// Render as a fixed-width table.
    pub fn to_table(&self) -> String {
        let mut out = String::from(
            "   dmax    dmin   nobs  nuniq  redund  rmerge   rmeas    rpim   cc1/2     cc*  compl\n",
        );
        for shell in self.shells.iter().chain(std::iter::once(&self.overall)) {
            out.push_str(&format!(
                "{:7.2} {:7.2} {:6} {:6} {:7.2} {:7.3} {:7.3} {:7.3} {:7.3} {:7.3} {:6.3}\n",
                shell.d_max,
                shell.d_min,
                shell.n_peaks,
                shell.n_unique,
                shell.redundancy,
                shell.r_merge,
                shell.r_meas,
                shell.r_pim,
                shell.cc_half,
                shell.cc_star,
                shell.completeness,
            ));
        }
        out
    }
}

/// Resolution shells of equal reciprocal-space volume.
///
/// Boundaries are stored as d values decreasing from `d_max` to `d_min`;
/// shell `i` spans `bounds[i + 1]..bounds[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionShells {
    bounds: Vec<f64>,
}

impl ResolutionShells {
    pub fn new(d_min: f64, d_max: f64, n_shells: usize) -> Result<Self> {
        if n_shells == 0 {
            return Err(DiffractError::Config("n_shells must be at least 1".to_string()));
        }
        if !(d_min > 0.0 && d_min < d_max && d_max.is_finite()) {
            return Err(DiffractError::Config(format!(
                "invalid resolution range {}..{}",
                d_min, d_max
            )));
        }
        let q3_lo = d_max.powi(-3);
        let q3_hi = d_min.powi(-3);
        let step = (q3_hi - q3_lo) / n_shells as f64;

        let mut bounds: Vec<f64> = (0..=n_shells)
            .map(|i| 1.0 / (q3_lo + step * i as f64).cbrt())
            .collect();
        bounds[0] = d_max;
        bounds[n_shells] = d_min;
        Ok(Self { bounds })
    }

    pub fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn d_min(&self) -> f64 {
        self.bounds[self.bounds.len() - 1]
    }

    pub fn d_max(&self) -> f64 {
        self.bounds[0]
    }

    /// `(d_min, d_max)` of shell `i`.
    pub fn limits(&self, i: usize) -> Option<(f64, f64)> {
        (i < self.len()).then(|| (self.bounds[i + 1], self.bounds[i]))
    }

    /// Shell containing `d`; `None` outside `[d_min, d_max]`.
    pub fn shell_of(&self, d: f64) -> Option<usize> {
        if !(d >= self.d_min() && d <= self.d_max()) {
            return None;
        }
        (0..self.len()).find(|&i| d >= self.bounds[i + 1])
    }

    /// Empty shells carrying only their limits.
    pub fn empty_shells(&self) -> Vec<QualityShell> {
        (0..self.len())
            .filter_map(|i| self.limits(i))
            .map(|(d_min, d_max)| QualityShell {
                d_min,
                d_max,
                ..Default::default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shells_decrease_and_cover_range() {
        let shells = ResolutionShells::new(1.5, 50.0, 10).unwrap();
        assert_eq!(shells.len(), 10);
        let mut prev = f64::INFINITY;
        for i in 0..shells.len() {
            let (lo, hi) = shells.limits(i).unwrap();
            assert!(lo < hi);
            assert!(hi <= prev);
            prev = lo;
        }
        assert_eq!(shells.limits(0).unwrap().1, 50.0);
        assert_eq!(shells.limits(9).unwrap().0, 1.5);
    }

    #[test]
    fn test_equal_reciprocal_volume() {
        let shells = ResolutionShells::new(2.0, 20.0, 4).unwrap();
        let volumes: Vec<f64> = (0..4)
            .map(|i| {
                let (lo, hi) = shells.limits(i).unwrap();
                lo.powi(-3) - hi.powi(-3)
            })
            .collect();
        for v in &volumes {
            assert!((v - volumes[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_shell_of_edges() {
        let shells = ResolutionShells::new(1.5, 50.0, 10).unwrap();
        assert_eq!(shells.shell_of(50.0), Some(0));
        assert_eq!(shells.shell_of(1.5), Some(9));
        assert_eq!(shells.shell_of(1.4), None);
        assert_eq!(shells.shell_of(60.0), None);
    }

    #[test]
    fn test_invalid_range() {
        assert!(ResolutionShells::new(5.0, 2.0, 10).is_err());
        assert!(ResolutionShells::new(1.5, 50.0, 0).is_err());
    }
}
