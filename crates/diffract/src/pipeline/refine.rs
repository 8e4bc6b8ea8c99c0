//! Batched refinement with transactional commit of prediction updates.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Stage;
use crate::config::RefinerParams;
use crate::engine::{ReductionEngine, ResidualType};
use crate::error::{DiffractError, Result};
use crate::experiment::Experiment;
use crate::model::{FrameRange, Peak, RefinementBatch};

/// Split `[0, n_frames)` into `n_batches` contiguous ranges.
///
/// Widths differ by at most one; the first `n_frames % n_batches` batches
/// take the extra frame.
pub fn partition_frames(n_frames: usize, n_batches: usize) -> Result<Vec<FrameRange>> {
    if n_batches == 0 || n_batches > n_frames {
        return Err(DiffractError::Config(format!(
            "cannot split {} frames into {} batches",
            n_frames, n_batches
        )));
    }
    let base = n_frames / n_batches;
    let extra = n_frames % n_batches;
    let mut start = 0;
    Ok((0..n_batches)
        .map(|i| {
            let width = base + usize::from(i < extra);
            let range = FrameRange::new(start, start + width);
            start += width;
            range
        })
        .collect())
}

/// Result of a refinement step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefineOutcome {
    Refined {
        cycles: usize,
        batches: usize,
        /// Predicted peaks recomputed from their batch geometry.
        updated: usize,
        total: usize,
    },
    /// Nothing was committed.
    Failed { reason: String },
}

impl RefineOutcome {
    pub fn is_refined(&self) -> bool {
        matches!(self, RefineOutcome::Refined { .. })
    }
}

/// Partitions frames, drives the engine and commits the result in one step.
pub struct RefinementBatcher<'a> {
    engine: &'a dyn ReductionEngine,
}

impl<'a> RefinementBatcher<'a> {
    pub fn new(engine: &'a dyn ReductionEngine) -> Self {
        Self { engine }
    }

    /// Refine against the indexed peaks of `source` and update `predicted`.
    ///
    /// All work happens on copies; the registry only changes on success.
    pub fn run(
        &self,
        exp: &mut Experiment,
        dataset: &str,
        source: &str,
        predicted: &str,
    ) -> Result<RefineOutcome> {
        let params: RefinerParams = exp.config.refiner.clone();
        let residual: ResidualType = params.residual_type.parse()?;
        let n_frames = exp.dataset(dataset)?.n_frames();
        let ranges = partition_frames(n_frames, params.n_batches)?;

        let accepted = exp
            .accepted_cell()
            .cloned()
            .ok_or_else(|| DiffractError::UnassignedCell {
                stage: Stage::Refine,
                collection: source.to_string(),
            })?;
        let source_collection = exp.get_collection(source)?;
        if !source_collection.has_assigned_cell() {
            return Err(DiffractError::UnassignedCell {
                stage: Stage::Refine,
                collection: source.to_string(),
            });
        }
        let peaks: Vec<Peak> = source_collection.peaks.clone();
        let mut predictions: Vec<Peak> = exp.get_collection(predicted)?.peaks.clone();

        let mut batches: Vec<RefinementBatch> = ranges
            .into_iter()
            .enumerate()
            .map(|(i, frames)| RefinementBatch::new(i, frames, &accepted))
            .collect();

        let cycles = params.refine_cycles.max(1);
        let mut updated = 0;
        for cycle in 0..cycles {
            let mut trial = batches.clone();
            if !self.engine.refine(&mut trial, &peaks, &params, residual)? {
                let reason = format!("refinement failed in cycle {} of {}", cycle + 1, cycles);
                warn!(%reason, batches = trial.len(), "refinement not committed");
                return Ok(RefineOutcome::Failed { reason });
            }

            let mut trial_predictions = predictions.clone();
            updated = 0;
            for peak in trial_predictions.iter_mut() {
                let frame = peak.position.frame;
                if let Some(batch) = trial.iter().find(|b| b.contains(frame)) {
                    if self.engine.update_prediction(peak, batch) {
                        updated += 1;
                    }
                }
            }
            batches = trial;
            predictions = trial_predictions;
        }

        let total = predictions.len();
        exp.collection_mut(predicted)?.peaks = predictions;
        let n_batches = batches.len();
        exp.set_batches(batches);
        info!(cycles, batches = n_batches, updated, total, "refinement committed");

        Ok(RefineOutcome::Refined {
            cycles,
            batches: n_batches,
            updated,
            total,
        })
    }
}
