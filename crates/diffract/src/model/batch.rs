//! Refinement batches.

use serde::{Deserialize, Serialize};

use super::cell::{CellProvenance, UnitCell};
use super::dataset::FrameRange;

/// A contiguous frame range refined with its own copy of the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementBatch {
    pub index: usize,
    pub frames: FrameRange,
    pub cell: UnitCell,
    /// Indexed peaks that fell into the batch.
    pub n_peaks: usize,
    /// RMS |q_obs − q_calc| before the last refinement step.
    #[serde(default)]
    pub residual_before: Option<f64>,
    #[serde(default)]
    pub residual_after: Option<f64>,
    #[serde(default)]
    pub refined: bool,
}

impl RefinementBatch {
    /// Start a batch from a copy of the accepted cell.
    pub fn new(index: usize, frames: FrameRange, accepted: &UnitCell) -> Self {
        Self {
            index,
            frames,
            cell: accepted.clone().with_provenance(CellProvenance::Batch),
            n_peaks: 0,
            residual_before: None,
            residual_after: None,
            refined: false,
        }
    }

    pub fn contains(&self, frame: f64) -> bool {
        self.frames.contains(frame)
    }
}
