//! Peak records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Miller index of a reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MillerIndex {
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

impl MillerIndex {
    pub fn new(h: i32, k: i32, l: i32) -> Self {
        Self { h, k, l }
    }

    pub fn as_array(&self) -> [i32; 3] {
        [self.h, self.k, self.l]
    }

    pub fn is_origin(&self) -> bool {
        self.h == 0 && self.k == 0 && self.l == 0
    }

    pub fn negated(&self) -> Self {
        Self::new(-self.h, -self.k, -self.l)
    }
}

impl fmt::Display for MillerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.h, self.k, self.l)
    }
}

/// Peak centre on the detector. `frame` is continuous along the rotation axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorPosition {
    pub x: f64,
    pub y: f64,
    pub frame: f64,
}

impl DetectorPosition {
    pub fn new(x: f64, y: f64, frame: f64) -> Self {
        Self { x, y, frame }
    }

    /// In-plane pixel distance to another position.
    pub fn pixel_distance(&self, other: &DetectorPosition) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Index of the frame the centre lies on.
    pub fn frame_index(&self) -> usize {
        if self.frame <= 0.0 {
            0
        } else {
            self.frame.floor() as usize
        }
    }
}

/// Axis-aligned ellipsoid widths in pixels and frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakShape {
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub sigma_frame: f64,
}

impl PeakShape {
    pub fn new(sigma_x: f64, sigma_y: f64, sigma_frame: f64) -> Self {
        Self {
            sigma_x,
            sigma_y,
            sigma_frame,
        }
    }

    /// True if all widths are finite and positive.
    pub fn is_valid(&self) -> bool {
        [self.sigma_x, self.sigma_y, self.sigma_frame]
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
    }
}

/// Integrated intensity with its standard uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intensity {
    pub value: f64,
    pub sigma: f64,
}

impl Intensity {
    pub fn new(value: f64, sigma: f64) -> Self {
        Self { value, sigma }
    }

    /// Non-degenerate: finite value and a finite, positive sigma.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.sigma.is_finite() && self.sigma > 0.0
    }

    /// Signal to noise, I/σ.
    pub fn strength(&self) -> f64 {
        self.value / self.sigma
    }
}

/// One reflection as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub position: DetectorPosition,
    pub shape: PeakShape,
    /// Reciprocal-space vector in Å⁻¹, `d = 1/|q|`.
    pub q: [f64; 3],
    #[serde(default)]
    pub intensity: Option<Intensity>,
    /// Tag of the unit cell this peak is indexed against.
    #[serde(default)]
    pub cell: Option<String>,
    #[serde(default)]
    pub hkl: Option<MillerIndex>,
    #[serde(default)]
    pub caught_by_filter: bool,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl Peak {
    /// Create an unintegrated, unindexed peak.
    pub fn new(position: DetectorPosition, shape: PeakShape, q: [f64; 3]) -> Self {
        Self {
            position,
            shape,
            q,
            intensity: None,
            cell: None,
            hkl: None,
            caught_by_filter: false,
            selected: true,
        }
    }

    pub fn q_norm(&self) -> f64 {
        self.q.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Resolution in Å. Infinite for a zero q vector.
    pub fn d_spacing(&self) -> f64 {
        let norm = self.q_norm();
        if norm > 0.0 { 1.0 / norm } else { f64::INFINITY }
    }

    /// I/σ, if the peak carries a valid intensity.
    pub fn strength(&self) -> Option<f64> {
        self.intensity
            .filter(Intensity::is_valid)
            .map(|i| i.strength())
    }

    /// Usable for downstream stages: valid shape and non-degenerate intensity.
    pub fn is_valid(&self) -> bool {
        self.shape.is_valid() && self.intensity.is_some_and(|i| i.is_valid())
    }

    /// Drop the cell assignment and Miller index.
    pub fn clear_index(&mut self) {
        self.cell = None;
        self.hkl = None;
    }
}
