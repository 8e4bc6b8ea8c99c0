//! The pipeline orchestrator.
//!
//! A [`Pipeline`] sequences engine calls over an [`Experiment`]:
//!
//! ```text
//! load → find → integrate → filter → index → shape model → predict
//!      → integrate(predicted) → refine → merge → quality
//! ```
//!
//! Stages read their inputs from the registry and register their outputs
//! under fixed names. A stage that produces nothing usable returns a
//! [`StageOutcome`] with `count == 0`; [`Pipeline::run`] aborts with
//! [`DiffractError::StageAborted`] when the next stage cannot work with that.

mod autoindex;
mod progress;
mod refine;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FilterParams;
use crate::engine::{IndexOutcome, ReductionEngine};
use crate::error::{DiffractError, Result};
use crate::experiment::{ACCEPTED_CELL, Experiment};
use crate::observability::reduction_span;
use crate::model::{
    CollectionKind, FrameRange, PeakCollection, QualityReport, ResolutionShells, SpaceGroup,
    UnitCell,
};

pub use autoindex::{
    AcceptPolicy, AttemptResult, AutoindexAttempt, AutoindexController, AutoindexReport,
    INDEXING, INDEXING_FOUND, autoindex_windows,
};
pub use progress::{CancelToken, ProgressObserver};
pub use refine::{RefineOutcome, RefinementBatcher, partition_frames};

/// Peaks found over the whole dataset.
pub const FOUND: &str = "found";
/// Found peaks that passed the filter.
pub const FILTERED: &str = "filtered";
/// Strong peaks used to build the shape model.
pub const FIT: &str = "fit";
pub const PREDICTED: &str = "predicted";
pub const MERGED: &str = "merged";

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Find,
    Integrate,
    Filter,
    Index,
    ShapeModel,
    Predict,
    IntegratePredicted,
    Refine,
    Merge,
    Quality,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Find => "find",
            Stage::Integrate => "integrate",
            Stage::Filter => "filter",
            Stage::Index => "index",
            Stage::ShapeModel => "shape-model",
            Stage::Predict => "predict",
            Stage::IntegratePredicted => "integrate-predicted",
            Stage::Refine => "refine",
            Stage::Merge => "merge",
            Stage::Quality => "quality",
        }
    }

    /// Whether this stage may consume a collection of `kind`.
    pub fn accepts(&self, kind: CollectionKind) -> bool {
        use CollectionKind::*;
        match self {
            Stage::Integrate => matches!(kind, Found | Predicted),
            Stage::IntegratePredicted => kind == Predicted,
            Stage::Filter => matches!(kind, Found | Predicted),
            Stage::Index => matches!(kind, Indexing | Filtered),
            Stage::ShapeModel | Stage::Predict | Stage::Refine => matches!(kind, Found | Filtered),
            Stage::Merge => matches!(kind, Found | Filtered | Predicted),
            Stage::Load | Stage::Find | Stage::Quality => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counted result of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub collection: String,
    /// Stage-specific count: found, valid, caught, profiles, predicted, merged.
    pub count: usize,
    pub total: usize,
}

impl StageOutcome {
    fn new(stage: Stage, collection: &str, count: usize, total: usize) -> Self {
        Self {
            stage,
            collection: collection.to_string(),
            count,
            total,
        }
    }

    /// Fail unless the stage produced something.
    pub fn require_nonempty(&self) -> Result<()> {
        if self.count == 0 {
            return Err(DiffractError::StageAborted {
                stage: self.stage,
                collection: self.collection.clone(),
                count: self.count,
                total: self.total,
                reason: "no usable peaks".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}': {} of {}",
            self.stage, self.collection, self.count, self.total
        )
    }
}

/// Summary of a full [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub outcomes: Vec<StageOutcome>,
    pub skipped: Vec<Stage>,
    pub autoindex_attempts: Vec<AutoindexAttempt>,
    pub accepted_cell: Option<UnitCell>,
    pub refinement: Option<RefineOutcome>,
    pub quality: Option<QualityReport>,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            outcomes: Vec::new(),
            skipped: Vec::new(),
            autoindex_attempts: Vec::new(),
            accepted_cell: None,
            refinement: None,
            quality: None,
        }
    }

    /// Outcome of the last run of `stage`, if it ran.
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().rev().find(|o| o.stage == stage)
    }
}

/// Sequences the reduction stages over one experiment at a time.
pub struct Pipeline {
    engine: Arc<dyn ReductionEngine>,
    observers: Vec<Box<dyn ProgressObserver>>,
    cancel: CancelToken,
    resume: bool,
    merge_collections: Vec<String>,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn ReductionEngine>) -> Self {
        Self {
            engine,
            observers: Vec::new(),
            cancel: CancelToken::new(),
            resume: false,
            merge_collections: vec![PREDICTED.to_string()],
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Skip stages whose artifacts already exist in the registry.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Collections merged at the end of a run (default: `predicted`).
    pub fn with_merge_collections(mut self, names: Vec<String>) -> Self {
        self.merge_collections = names;
        self
    }

    pub fn engine(&self) -> &dyn ReductionEngine {
        self.engine.as_ref()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn check_cancelled(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(%stage, "run cancelled");
            return Err(DiffractError::Cancelled { stage });
        }
        Ok(())
    }

    fn started(&self, stage: Stage) -> Result<()> {
        self.check_cancelled(stage)?;
        debug!(%stage, "stage started");
        for observer in &self.observers {
            observer.stage_started(stage);
        }
        Ok(())
    }

    fn finished(&self, outcome: &StageOutcome) {
        info!(stage = %outcome.stage, collection = %outcome.collection, count = outcome.count, total = outcome.total, "stage finished");
        for observer in &self.observers {
            observer.stage_finished(outcome);
        }
    }

    fn skipped(&self, stage: Stage, report: &mut PipelineReport) {
        info!(%stage, "artifact present, skipping stage");
        for observer in &self.observers {
            observer.stage_skipped(stage);
        }
        report.skipped.push(stage);
    }

    pub(crate) fn notify_attempt(&self, attempt: &AutoindexAttempt) {
        for observer in &self.observers {
            observer.autoindex_attempt(attempt);
        }
    }

    fn require_kind(stage: Stage, collection: &PeakCollection) -> Result<()> {
        if !stage.accepts(collection.kind) {
            return Err(DiffractError::InvalidCollectionKind {
                collection: collection.name.clone(),
                kind: collection.kind.to_string(),
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// Space group of the cell assigned to `collection`, if any.
    fn assigned_space_group(exp: &Experiment, collection: &PeakCollection) -> Result<Option<SpaceGroup>> {
        match collection.assigned_cell() {
            Some(tag) => Ok(Some(exp.cell(tag)?.space_group()?)),
            None => Ok(None),
        }
    }

    // ---- stages ----

    /// Find peaks in `frames` and register them as `dest` (kind found, unintegrated).
    pub fn find_peaks(
        &self,
        exp: &mut Experiment,
        dataset: &str,
        frames: FrameRange,
        dest: &str,
    ) -> Result<StageOutcome> {
        let ds = exp.dataset(dataset)?;
        let peaks = self.engine.find(ds, frames, &exp.config.finder)?;
        let outcome = StageOutcome::new(Stage::Find, dest, peaks.len(), peaks.len());
        exp.register_collection(PeakCollection::new(dest, CollectionKind::Found).with_peaks(peaks))?;
        Ok(outcome)
    }

    /// Integrate `collection` in place. Count is the number of valid intensities.
    ///
    /// Predicted collections use the shape model of the collection they came from.
    pub fn integrate(
        &self,
        exp: &mut Experiment,
        dataset: &str,
        collection: &str,
    ) -> Result<StageOutcome> {
        let source = exp.get_collection(collection)?;
        Self::require_kind(Stage::Integrate, source)?;
        let stage = match source.kind {
            CollectionKind::Predicted => Stage::IntegratePredicted,
            _ => Stage::Integrate,
        };
        let shape_model = source
            .shape_source
            .as_deref()
            .and_then(|name| exp.shape_model(name));
        if stage == Stage::IntegratePredicted && shape_model.is_none() {
            return Err(DiffractError::StageAborted {
                stage,
                collection: collection.to_string(),
                count: 0,
                total: source.len(),
                reason: "no shape model for predicted peaks".to_string(),
            });
        }

        let mut peaks = source.peaks.clone();
        self.engine.integrate(
            &mut peaks,
            exp.dataset(dataset)?,
            &exp.config.integration,
            shape_model,
        )?;

        let target = exp.collection_mut(collection)?;
        target.peaks = peaks;
        Ok(StageOutcome::new(stage, collection, target.number_valid(), target.len()))
    }

    /// Flag `source` with `params` and register the caught peaks as `dest`.
    ///
    /// Extinction filtering applies once the source has an assigned cell.
    pub fn filter_peaks(
        &self,
        exp: &mut Experiment,
        source: &str,
        params: &FilterParams,
        dest: &str,
        kind: CollectionKind,
    ) -> Result<StageOutcome> {
        let collection = exp.get_collection(source)?;
        Self::require_kind(Stage::Filter, collection)?;
        let space_group = Self::assigned_space_group(exp, collection)?;

        let mut peaks = collection.peaks.clone();
        let verdict = self.engine.filter(&mut peaks, params, space_group.as_ref());
        let caught: Vec<_> = peaks.iter().filter(|p| p.caught_by_filter).cloned().collect();

        exp.collection_mut(source)?.peaks = peaks;
        exp.register_collection(PeakCollection::new(dest, kind).with_peaks(caught))?;
        Ok(StageOutcome::new(Stage::Filter, dest, verdict.caught, verdict.total))
    }

    /// One lattice search on `collection`. No retries.
    pub fn autoindex(&self, exp: &Experiment, collection: &str) -> Result<IndexOutcome> {
        let peaks = exp.get_collection(collection)?;
        Self::require_kind(Stage::Index, peaks)?;
        Ok(self.engine.autoindex(&peaks.peaks, &exp.config.autoindexer))
    }

    /// Build the shape model of `collection` from its strong peaks.
    ///
    /// The peaks used are registered as `fit`; the model is stored under `collection`.
    pub fn build_shape_model(
        &self,
        exp: &mut Experiment,
        dataset: &str,
        collection: &str,
    ) -> Result<StageOutcome> {
        let source = exp.get_collection(collection)?;
        Self::require_kind(Stage::ShapeModel, source)?;
        if !source.has_assigned_cell() {
            return Err(DiffractError::UnassignedCell {
                stage: Stage::ShapeModel,
                collection: collection.to_string(),
            });
        }

        let shapes = &exp.config.shapes;
        let fit_params = FilterParams {
            filter_strength: true,
            min_strength: shapes.shape_min_strength,
            max_strength: shapes.shape_max_strength,
            filter_d_range: true,
            min_d_range: shapes.shapelib_d_min,
            max_d_range: shapes.shapelib_d_max,
            filter_frames: false,
            extinct: false,
            ..FilterParams::default()
        };
        let mut peaks = source.peaks.clone();
        let verdict = self.engine.filter(&mut peaks, &fit_params, None);
        let fit: Vec<_> = peaks.into_iter().filter(|p| p.caught_by_filter).collect();
        if fit.is_empty() {
            return Err(DiffractError::StageAborted {
                stage: Stage::ShapeModel,
                collection: FIT.to_string(),
                count: 0,
                total: verdict.total,
                reason: "no peaks within the shape-model strength and resolution limits"
                    .to_string(),
            });
        }

        let model = self.engine.build_shape_model(
            collection,
            &fit,
            exp.dataset(dataset)?,
            &exp.config.shapes,
        )?;
        let outcome = StageOutcome::new(Stage::ShapeModel, collection, model.len(), verdict.total);
        exp.register_collection(PeakCollection::new(FIT, CollectionKind::Filtered).with_peaks(fit))?;
        exp.set_shape_model(collection, model);
        Ok(outcome)
    }

    /// Predict every reflection of the cell assigned to `source`, as `predicted`.
    ///
    /// Fails before calling the engine if `source` has no assigned cell.
    pub fn predict(&self, exp: &mut Experiment, dataset: &str, source: &str) -> Result<StageOutcome> {
        let collection = exp.get_collection(source)?;
        Self::require_kind(Stage::Predict, collection)?;
        let Some(tag) = collection.assigned_cell().map(str::to_string) else {
            return Err(DiffractError::UnassignedCell {
                stage: Stage::Predict,
                collection: source.to_string(),
            });
        };
        let cell = exp.cell(&tag)?;
        let model = exp.shape_model(source).ok_or_else(|| DiffractError::StageAborted {
            stage: Stage::Predict,
            collection: source.to_string(),
            count: 0,
            total: 0,
            reason: "no shape model built for this collection".to_string(),
        })?;

        let peaks = self
            .engine
            .predict(cell, exp.dataset(dataset)?, model, &exp.config.prediction)?;
        let total = peaks.len();
        exp.register_collection(
            PeakCollection::new(PREDICTED, CollectionKind::Predicted)
                .with_peaks(peaks)
                .with_shape_source(source),
        )?;
        let indexed = exp.assign_unit_cell(PREDICTED, &tag)?;
        Ok(StageOutcome::new(Stage::Predict, PREDICTED, indexed, total))
    }

    /// Refine in batches against `source`; on success re-integrate `found` and `predicted`.
    pub fn refine(
        &self,
        exp: &mut Experiment,
        dataset: &str,
        source: &str,
    ) -> Result<RefineOutcome> {
        let collection = exp.get_collection(source)?;
        Self::require_kind(Stage::Refine, collection)?;

        let outcome = RefinementBatcher::new(self.engine.as_ref()).run(exp, dataset, source, PREDICTED)?;
        if outcome.is_refined() {
            if exp.has_collection(FOUND) {
                if exp.shape_model(source).is_some() {
                    exp.collection_mut(FOUND)?.shape_source = Some(source.to_string());
                }
                self.integrate(exp, dataset, FOUND)?;
            }
            self.integrate(exp, dataset, PREDICTED)?;
        }
        Ok(outcome)
    }

    /// Merge `collections` in the accepted cell's space group and store the quality report.
    pub fn merge(&self, exp: &mut Experiment, collections: &[&str]) -> Result<StageOutcome> {
        let symbol = match exp.accepted_cell() {
            Some(cell) => cell.space_group.clone(),
            None => exp.config.cell.space_group_symbol(),
        };
        let space_group = SpaceGroup::parse(&symbol)?;
        let m = &exp.config.merging;
        let shells = ResolutionShells::new(m.merging_d_min, m.merging_d_max, m.n_shells)?;

        let mut sources = Vec::with_capacity(collections.len());
        for name in collections {
            let collection = exp.get_collection(name)?;
            Self::require_kind(Stage::Merge, collection)?;
            sources.push(collection);
        }
        let total = sources.iter().map(|c| c.len()).sum();
        let result = self.engine.merge(&sources, &space_group, &shells, m)?;

        let outcome = StageOutcome::new(Stage::Merge, MERGED, result.merged.len(), total);
        exp.register_collection(
            PeakCollection::new(MERGED, CollectionKind::Merged).with_peaks(result.merged),
        )?;
        exp.set_quality(result.report);
        Ok(outcome)
    }

    // ---- full run ----

    /// Drive every stage over `dataset`.
    ///
    /// The configuration is validated first, so a configuration error never
    /// leaves a partially reduced experiment. After a failure or cancellation the
    /// registry holds everything committed by the stages that completed.
    pub fn run(&self, exp: &mut Experiment, dataset: &str) -> Result<PipelineReport> {
        exp.config.validate()?;
        let _span = reduction_span(&exp.name, dataset).entered();
        info!(engine = self.engine.name(), resume = self.resume, "starting reduction");

        let mut report = PipelineReport::new();

        self.started(Stage::Load)?;
        let n_frames = exp.dataset(dataset)?.n_frames();
        let load = StageOutcome::new(Stage::Load, dataset, n_frames, n_frames);
        self.finished(&load);
        report.outcomes.push(load);

        // find + integrate
        if self.resume && exp.has_collection(FOUND) {
            self.skipped(Stage::Find, &mut report);
        } else {
            self.started(Stage::Find)?;
            let range = exp.dataset(dataset)?.frame_range();
            let found = self.find_peaks(exp, dataset, range, FOUND)?;
            self.record(found.clone(), &mut report);
            found.require_nonempty()?;
        }
        if self.resume && is_integrated(exp, FOUND) {
            self.skipped(Stage::Integrate, &mut report);
        } else {
            self.started(Stage::Integrate)?;
            let integrated = self.integrate(exp, dataset, FOUND)?;
            self.record(integrated.clone(), &mut report);
            integrated.require_nonempty()?;
        }

        // filter
        if self.resume && exp.has_collection(FILTERED) {
            self.skipped(Stage::Filter, &mut report);
        } else {
            self.started(Stage::Filter)?;
            let params = exp.config.filter.clone();
            let filtered =
                self.filter_peaks(exp, FOUND, &params, FILTERED, CollectionKind::Filtered)?;
            self.record(filtered.clone(), &mut report);
            filtered.require_nonempty()?;
        }

        // index
        if exp.accepted_cell().is_some() && self.resume {
            self.skipped(Stage::Index, &mut report);
        } else {
            self.started(Stage::Index)?;
            let indexing = AutoindexController::new(self).run(exp, dataset)?;
            let attempts = indexing.attempts.len();
            report.autoindex_attempts = indexing.attempts;
            self.record(
                StageOutcome::new(Stage::Index, INDEXING, attempts, attempts),
                &mut report,
            );
        }
        exp.assign_unit_cell(FOUND, ACCEPTED_CELL)?;
        exp.assign_unit_cell(FILTERED, ACCEPTED_CELL)?;
        report.accepted_cell = exp.accepted_cell().cloned();

        // shape model
        if self.resume && exp.shape_model(FILTERED).is_some() {
            self.skipped(Stage::ShapeModel, &mut report);
        } else {
            self.started(Stage::ShapeModel)?;
            let shapes = self.build_shape_model(exp, dataset, FILTERED)?;
            self.record(shapes, &mut report);
        }

        // predict + integrate predicted
        if self.resume && exp.has_collection(PREDICTED) {
            self.skipped(Stage::Predict, &mut report);
        } else {
            self.started(Stage::Predict)?;
            let predicted = self.predict(exp, dataset, FILTERED)?;
            self.record(predicted.clone(), &mut report);
            predicted.require_nonempty()?;
        }
        if self.resume && is_integrated(exp, PREDICTED) {
            self.skipped(Stage::IntegratePredicted, &mut report);
        } else {
            self.started(Stage::IntegratePredicted)?;
            let integrated = self.integrate(exp, dataset, PREDICTED)?;
            self.record(integrated.clone(), &mut report);
            integrated.require_nonempty()?;
        }

        // refine: a failed refinement keeps the unrefined predictions
        self.started(Stage::Refine)?;
        let refined = self.refine(exp, dataset, FILTERED)?;
        let refine_outcome = match &refined {
            RefineOutcome::Refined { updated, total, .. } => {
                StageOutcome::new(Stage::Refine, PREDICTED, *updated, *total)
            }
            RefineOutcome::Failed { reason } => {
                warn!(%reason, "continuing with unrefined predictions");
                StageOutcome::new(Stage::Refine, PREDICTED, 0, exp.get_collection(PREDICTED)?.len())
            }
        };
        self.record(refine_outcome, &mut report);
        report.refinement = Some(refined);

        // merge
        self.started(Stage::Merge)?;
        let names: Vec<&str> = self.merge_collections.iter().map(String::as_str).collect();
        let merged = self.merge(exp, &names)?;
        self.record(merged.clone(), &mut report);
        merged.require_nonempty()?;

        // quality
        self.started(Stage::Quality)?;
        let quality = exp.quality().cloned().unwrap_or_default();
        let shells = quality.shells.len();
        self.record_metadata(exp, dataset, &quality)?;
        self.record(StageOutcome::new(Stage::Quality, MERGED, shells, shells), &mut report);
        report.quality = Some(quality);

        exp.check_peak_collections()?;
        info!(stages = report.outcomes.len(), "reduction finished");
        Ok(report)
    }

    fn record(&self, outcome: StageOutcome, report: &mut PipelineReport) {
        self.finished(&outcome);
        report.outcomes.push(outcome);
    }

    fn record_metadata(&self, exp: &mut Experiment, dataset: &str, quality: &QualityReport) -> Result<()> {
        let n_frames = exp.dataset(dataset)?.n_frames();
        let counts: Vec<(String, usize)> = [FOUND, FILTERED, PREDICTED, MERGED]
            .into_iter()
            .filter_map(|name| exp.get_collection(name).ok().map(|c| (format!("n_{}", name), c.len())))
            .collect();
        let cell = exp.accepted_cell().map(|c| c.to_string());

        exp.add_metadata("dataset", dataset);
        exp.add_metadata("n_frames", n_frames);
        exp.add_metadata("engine", self.engine.name());
        for (key, count) in counts {
            exp.add_metadata(key, count);
        }
        if let Some(cell) = cell {
            exp.add_metadata("accepted_cell", cell);
        }
        exp.add_metadata("completeness", format!("{:.4}", quality.overall.completeness));
        exp.add_metadata("cc_half", format!("{:.4}", quality.overall.cc_half));
        exp.add_metadata("finished", chrono::Utc::now().to_rfc3339());
        Ok(())
    }
}

/// Whether `name` holds integrated peaks. A run cancelled between finding and
/// integrating leaves the collection registered with no valid intensities.
fn is_integrated(exp: &Experiment, name: &str) -> bool {
    exp.get_collection(name)
        .is_ok_and(|collection| collection.number_valid() > 0)
}
