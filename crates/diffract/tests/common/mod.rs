//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use diffract::config::{
    AutoindexParams, FinderParams, IntegrationParams, MergeParams, PredictionParams,
    RefinerParams, ShapeModelParams,
};
use diffract::engine::{IndexOutcome, IndexSolution, MergeResult, ReductionEngine, ResidualType};
use diffract::model::{
    Dataset, DatasetBuilder, DetectorPosition, Intensity, MillerIndex, Peak, PeakCollection,
    PeakShape, QualityReport, RefinementBatch, ResolutionShells, ShapeModel, ShapeProfile,
    SpaceGroup, UnitCell,
};
use diffract::{Experiment, FrameRange, ReductionConfig, Result};

pub const DATASET: &str = "scan";

/// General reflection for the n-th peak; never systematically absent.
pub fn hkl_for(n: usize) -> MillerIndex {
    MillerIndex::new(
        (n % 7) as i32 + 1,
        (n / 7 % 7) as i32 + 1,
        (n / 49 % 7) as i32 + 1,
    )
}

/// Cell returned by the scripted lattice search.
pub fn solution_cell() -> UnitCell {
    UnitCell::new([24.6, 28.6, 37.8], [90.0, 90.0, 90.0], "P 1")
}

/// Engine with scripted behaviour that records every call.
pub struct ScriptedEngine {
    pub peaks_per_frame: usize,
    /// Autoindexing succeeds once it sees at least this many peaks.
    pub index_threshold: usize,
    pub refine_succeeds: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            peaks_per_frame: 5,
            index_threshold: 1,
            refine_succeeds: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_peaks_per_frame(mut self, n: usize) -> Self {
        self.peaks_per_frame = n;
        self
    }

    pub fn with_index_threshold(mut self, n: usize) -> Self {
        self.index_threshold = n;
        self
    }

    pub fn with_refine_succeeds(mut self, succeeds: bool) -> Self {
        self.refine_succeeds = succeeds;
        self
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn peaks(&self, cell: &UnitCell, frames: FrameRange) -> Vec<Peak> {
        let mut peaks = Vec::new();
        for frame in frames.start..frames.end {
            for j in 0..self.peaks_per_frame {
                let hkl = hkl_for(frame * self.peaks_per_frame + j);
                let position = DetectorPosition::new(100.0 + j as f64, 200.0, frame as f64 + 0.5);
                peaks.push(Peak::new(position, PeakShape::new(2.0, 2.0, 1.0), cell.q_vector(&hkl)));
            }
        }
        peaks
    }
}

impl ReductionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn find(&self, dataset: &Dataset, frames: FrameRange, _params: &FinderParams) -> Result<Vec<Peak>> {
        self.record("find");
        let reference = ReductionConfig::default().cell.reference_cell();
        assert!(frames.end <= dataset.n_frames());
        Ok(self.peaks(&reference, frames))
    }

    fn integrate(
        &self,
        peaks: &mut [Peak],
        _dataset: &Dataset,
        _params: &IntegrationParams,
        shape_model: Option<&ShapeModel>,
    ) -> Result<()> {
        self.record("integrate");
        if shape_model.is_some() {
            self.record("integrate_with_shapes");
        }
        for peak in peaks.iter_mut() {
            peak.intensity = Some(Intensity::new(100.0, 10.0));
        }
        Ok(())
    }

    fn autoindex(&self, peaks: &[Peak], _params: &AutoindexParams) -> IndexOutcome {
        self.record("autoindex");
        if peaks.len() < self.index_threshold {
            return IndexOutcome::InsufficientData(format!("{} peaks", peaks.len()));
        }
        IndexOutcome::Indexed(vec![IndexSolution {
            cell: solution_cell(),
            quality: 0.9,
        }])
    }

    fn build_shape_model(
        &self,
        source: &str,
        peaks: &[Peak],
        _dataset: &Dataset,
        params: &ShapeModelParams,
    ) -> Result<ShapeModel> {
        self.record("build_shape_model");
        let mut model = ShapeModel::new(source, params);
        for peak in peaks {
            model.add_profile(ShapeProfile {
                position: peak.position,
                shape: peak.shape,
                intensity: 100.0,
            });
        }
        Ok(model)
    }

    fn predict(
        &self,
        cell: &UnitCell,
        dataset: &Dataset,
        _shape_model: &ShapeModel,
        _params: &PredictionParams,
    ) -> Result<Vec<Peak>> {
        self.record("predict");
        Ok(self.peaks(cell, dataset.frame_range()))
    }

    fn refine(
        &self,
        batches: &mut [RefinementBatch],
        _peaks: &[Peak],
        _params: &RefinerParams,
        _residual: ResidualType,
    ) -> Result<bool> {
        self.record("refine");
        for batch in batches.iter_mut() {
            batch.refined = true;
        }
        Ok(self.refine_succeeds)
    }

    fn update_prediction(&self, peak: &mut Peak, batch: &RefinementBatch) -> bool {
        if !batch.contains(peak.position.frame) {
            return false;
        }
        peak.position.x += 1.0;
        true
    }

    fn merge(
        &self,
        collections: &[&PeakCollection],
        _space_group: &SpaceGroup,
        shells: &ResolutionShells,
        _params: &MergeParams,
    ) -> Result<MergeResult> {
        self.record("merge");
        let merged = collections
            .iter()
            .flat_map(|c| c.peaks.iter())
            .filter(|p| p.is_valid())
            .cloned()
            .collect();
        Ok(MergeResult {
            merged,
            report: QualityReport {
                shells: shells.empty_shells(),
                overall: Default::default(),
            },
        })
    }
}

pub fn config() -> ReductionConfig {
    let mut config = ReductionConfig::default();
    config.autoindexer.min_autoindex_frames = 10;
    config.autoindexer.max_autoindex_frames = 20;
    config.autoindexer.autoindex_step = 1;
    config.refiner.n_batches = 3;
    config
}

pub fn dataset(n_frames: usize) -> Dataset {
    DatasetBuilder::new(DATASET, &ReductionConfig::default().detector)
        .with_frames(n_frames)
        .finish()
        .unwrap()
}

pub fn experiment(n_frames: usize) -> Experiment {
    let mut exp = Experiment::new("test", config());
    exp.add_dataset(dataset(n_frames)).unwrap();
    exp
}
