//! The reduction engine boundary.
//!
//! The numerical work (peak search, integration, lattice search, refinement,
//! merging statistics) lives behind [`ReductionEngine`]. The pipeline only
//! sequences calls and manages the registry. [`SyntheticEngine`] is a
//! deterministic simulated diffractometer implementing the whole trait.

mod filter;
mod statistics;
mod synthetic;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{
    AutoindexParams, FilterParams, FinderParams, IntegrationParams, MergeParams,
    PredictionParams, RefinerParams, ShapeModelParams,
};
use crate::error::{DiffractError, Result};
use crate::model::{
    Dataset, FrameRange, Peak, PeakCollection, QualityReport, RefinementBatch, ResolutionShells,
    ShapeModel, SpaceGroup, UnitCell,
};

pub use filter::{FilterVerdict, PeakFilter};
pub use statistics::{MergeGroup, shell_statistics};
pub use synthetic::{SyntheticConfig, SyntheticEngine};

/// One candidate cell from autoindexing.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSolution {
    pub cell: UnitCell,
    /// Higher is better; engine-defined scale.
    pub quality: f64,
}

/// Result of a single autoindexing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    /// Candidate solutions in the engine's preferred order.
    Indexed(Vec<IndexSolution>),
    /// Too few peaks; a wider frame window may help.
    InsufficientData(String),
    /// The lattice search itself failed; retrying will not help.
    Fatal(String),
}

/// Merged reflections and their statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub merged: Vec<Peak>,
    pub report: QualityReport,
}

/// Residual minimized during refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualType {
    /// Detector-space distance between observed and calculated centres.
    RealSpace,
    /// |q_obs − q_calc|.
    QSpace,
}

impl FromStr for ResidualType {
    type Err = DiffractError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "real_space" => Ok(ResidualType::RealSpace),
            "q_space" => Ok(ResidualType::QSpace),
            other => Err(DiffractError::Config(format!(
                "unknown residual type '{}' (expected real_space or q_space)",
                other
            ))),
        }
    }
}

impl fmt::Display for ResidualType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResidualType::RealSpace => "real_space",
            ResidualType::QSpace => "q_space",
        })
    }
}

/// Numerical collaborator driven by the pipeline.
///
/// Implementations must be deterministic: the same inputs give the same output.
pub trait ReductionEngine: Send + Sync {
    /// Engine name for logging.
    fn name(&self) -> &str;

    /// Search `frames` of `dataset` for peaks. Returned peaks are unintegrated.
    fn find(&self, dataset: &Dataset, frames: FrameRange, params: &FinderParams)
    -> Result<Vec<Peak>>;

    /// Set intensity and sigma on every peak.
    ///
    /// Predicted peaks are integrated with the shape model they were predicted from.
    fn integrate(
        &self,
        peaks: &mut [Peak],
        dataset: &Dataset,
        params: &IntegrationParams,
        shape_model: Option<&ShapeModel>,
    ) -> Result<()>;

    /// Flag peaks caught by the filter criteria.
    fn filter(
        &self,
        peaks: &mut [Peak],
        params: &FilterParams,
        space_group: Option<&SpaceGroup>,
    ) -> FilterVerdict {
        PeakFilter::new(params, space_group).apply(peaks)
    }

    /// One lattice search. No retries at this level.
    fn autoindex(&self, peaks: &[Peak], params: &AutoindexParams) -> IndexOutcome;

    /// Build reference profiles from strong, indexed peaks.
    fn build_shape_model(
        &self,
        source: &str,
        peaks: &[Peak],
        dataset: &Dataset,
        params: &ShapeModelParams,
    ) -> Result<ShapeModel>;

    /// Every reflection expected from `cell` over the dataset, shaped by the model.
    fn predict(
        &self,
        cell: &UnitCell,
        dataset: &Dataset,
        shape_model: &ShapeModel,
        params: &PredictionParams,
    ) -> Result<Vec<Peak>>;

    /// Refine each batch against the indexed peaks that fall into it.
    ///
    /// Returns `Ok(false)` when the data cannot support refinement. Batches
    /// are copies owned by the caller; they are only committed on success.
    fn refine(
        &self,
        batches: &mut [RefinementBatch],
        peaks: &[Peak],
        params: &RefinerParams,
        residual: ResidualType,
    ) -> Result<bool>;

    /// Recompute a predicted peak from its batch's geometry.
    fn update_prediction(&self, peak: &mut Peak, batch: &RefinementBatch) -> bool;

    /// Merge symmetry-equivalent observations and compute shell statistics.
    fn merge(
        &self,
        collections: &[&PeakCollection],
        space_group: &SpaceGroup,
        shells: &ResolutionShells,
        params: &MergeParams,
    ) -> Result<MergeResult>;
}
