//! Shape models: reference profiles used to shape predicted peaks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::peak::{DetectorPosition, PeakShape};
use crate::config::ShapeModelParams;
use crate::error::{DiffractError, Result};

/// How neighbouring profiles are weighted when interpolating a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Unweighted mean.
    None,
    InverseDistance,
    Intensity,
}

impl FromStr for Interpolation {
    type Err = DiffractError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Interpolation::None),
            "inverse_distance" => Ok(Interpolation::InverseDistance),
            "intensity" => Ok(Interpolation::Intensity),
            other => Err(DiffractError::Config(format!(
                "unknown interpolation '{}' (expected none, inverse_distance or intensity)",
                other
            ))),
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Interpolation::None => "none",
            Interpolation::InverseDistance => "inverse_distance",
            Interpolation::Intensity => "intensity",
        })
    }
}

/// One strong, well-fit peak contributing to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeProfile {
    pub position: DetectorPosition,
    pub shape: PeakShape,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeModel {
    /// Collection the profiles were taken from.
    pub source: String,
    pub profiles: Vec<ShapeProfile>,
    pub nbins: [usize; 3],
    pub peak_end: f64,
    pub bkg_begin: f64,
    pub bkg_end: f64,
    pub kabsch: bool,
}

impl ShapeModel {
    pub fn new(source: impl Into<String>, params: &ShapeModelParams) -> Self {
        Self {
            source: source.into(),
            profiles: Vec::new(),
            nbins: [params.nx, params.ny, params.nz],
            peak_end: params.shape_peak_end,
            bkg_begin: params.bkg_begin,
            bkg_end: params.bkg_end,
            kabsch: params.kabsch,
        }
    }

    pub fn add_profile(&mut self, profile: ShapeProfile) {
        self.profiles.push(profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Unweighted mean over all profiles.
    pub fn mean_shape(&self) -> Option<PeakShape> {
        weighted_mean(self.profiles.iter().map(|p| (p.shape, 1.0)))
    }

    /// Shape at `position` from profiles within `radius` pixels and `frames` frames.
    ///
    /// Returns `None` when fewer than `min_neighbours` profiles are in range.
    pub fn interpolate(
        &self,
        position: &DetectorPosition,
        radius: f64,
        frames: f64,
        min_neighbours: usize,
        mode: Interpolation,
    ) -> Option<PeakShape> {
        let neighbours: Vec<(&ShapeProfile, f64)> = self
            .profiles
            .iter()
            .filter_map(|p| {
                let distance = p.position.pixel_distance(position);
                let in_range =
                    distance <= radius && (p.position.frame - position.frame).abs() <= frames;
                in_range.then_some((p, distance))
            })
            .collect();
        if neighbours.is_empty() || neighbours.len() < min_neighbours {
            return None;
        }
        weighted_mean(neighbours.into_iter().map(|(p, distance)| {
            let weight = match mode {
                Interpolation::None => 1.0,
                Interpolation::InverseDistance => 1.0 / (1.0 + distance),
                Interpolation::Intensity => p.intensity.max(0.0),
            };
            (p.shape, weight)
        }))
    }
}

fn weighted_mean(items: impl Iterator<Item = (PeakShape, f64)>) -> Option<PeakShape> {
    let (mut sx, mut sy, mut sf, mut total) = (0.0, 0.0, 0.0, 0.0);
    for (shape, w) in items {
        sx += w * shape.sigma_x;
        sy += w * shape.sigma_y;
        sf += w * shape.sigma_frame;
        total += w;
    }
    (total > 0.0).then(|| PeakShape::new(sx / total, sy / total, sf / total))
}
