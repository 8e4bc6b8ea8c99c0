//! A deterministic simulated diffractometer.
//!
//! Reflections of a true cell are scattered over the frames of a dataset with
//! a per-reflection seeded RNG; detector x/y follow from q. Every engine call
//! is a pure function of its inputs and the seed, so pipelines driven by this
//! engine are reproducible.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::{
    IndexOutcome, IndexSolution, MergeGroup, MergeResult, ReductionEngine, ResidualType,
    shell_statistics,
};
use crate::config::{
    AutoindexParams, FinderParams, IntegrationParams, MergeParams, PredictionParams,
    RefinerParams, ShapeModelParams,
};
use crate::error::{DiffractError, Result};
use crate::model::{
    Dataset, DetectorPosition, FrameRange, Intensity, Interpolation, MillerIndex, Peak,
    PeakCollection, PeakShape, QualityReport, QualityShell, RefinementBatch, ResolutionShells,
    ShapeModel, ShapeProfile, SpaceGroup, UnitCell,
};
use crate::pipeline::Stage;

const FRAME_SALT: u64 = 1;
const INTENSITY_SALT: u64 = 2;
const NOISE_SALT: u64 = 3;
const Q_SALT: u64 = 4;
const INDEX_SALT: u64 = 5;

/// Highest resolution the simulated detector reaches, in Å.
const DETECTOR_D_MIN: f64 = 1.0;

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    /// The crystal's true cell; autoindexing recovers it with noise.
    pub cell: UnitCell,
    pub seed: u64,
    /// Reflections are generated for |h|, |k|, |l| up to this value.
    pub max_index: i32,
    /// Below this many peaks autoindexing reports insufficient data.
    pub min_index_peaks: usize,
    pub intensity_scale: f64,
    pub b_factor: f64,
    pub background: f64,
    /// Uniform noise added to each q component of found peaks.
    pub q_noise: f64,
    /// Relative noise on measured intensities.
    pub measurement_noise: f64,
    pub image_rows: usize,
    pub image_cols: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            cell: UnitCell::new([24.6, 28.6, 37.8], [90.0, 90.0, 90.0], "P 21 21 21"),
            seed: 42,
            max_index: 6,
            min_index_peaks: 100,
            intensity_scale: 2000.0,
            b_factor: 20.0,
            background: 25.0,
            q_noise: 2e-4,
            measurement_noise: 0.05,
            image_rows: 900,
            image_cols: 2500,
        }
    }
}

impl SyntheticConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cell(mut self, cell: UnitCell) -> Self {
        self.cell = cell;
        self
    }

    pub fn with_min_index_peaks(mut self, n: usize) -> Self {
        self.min_index_peaks = n;
        self
    }

    pub fn with_max_index(mut self, max_index: i32) -> Self {
        self.max_index = max_index;
        self
    }

    pub fn with_detector(mut self, rows: usize, cols: usize) -> Self {
        self.image_rows = rows;
        self.image_cols = cols;
        self
    }
}

/// Simulated engine. See the module docs.
#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    config: SyntheticConfig,
    space_group: SpaceGroup,
}

impl SyntheticEngine {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        let space_group = config.cell.space_group()?;
        Ok(Self {
            config,
            space_group,
        })
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn rng(&self, salt: u64, hkl: &MillerIndex) -> fastrand::Rng {
        let key = ((hkl.h + 512) as u64) << 20 | ((hkl.k + 512) as u64) << 10 | (hkl.l + 512) as u64;
        fastrand::Rng::with_seed(
            self.config.seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ key,
        )
    }

    /// True if the simulated crystal produces this reflection.
    fn is_reflection(&self, hkl: &MillerIndex) -> bool {
        let m = self.config.max_index;
        !hkl.is_origin()
            && hkl.as_array().iter().all(|v| v.abs() <= m)
            && !self.space_group.is_extinct(hkl)
    }

    fn index_box(&self) -> impl Iterator<Item = MillerIndex> + '_ {
        let m = self.config.max_index;
        (-m..=m).flat_map(move |h| {
            (-m..=m).flat_map(move |k| (-m..=m).map(move |l| MillerIndex::new(h, k, l)))
        })
    }

    fn frame_of(&self, hkl: &MillerIndex, n_frames: usize) -> f64 {
        self.rng(FRAME_SALT, hkl).f64() * n_frames as f64
    }

    fn true_intensity(&self, hkl: &MillerIndex) -> f64 {
        let unique = self.space_group.unique_index(hkl, true);
        let d = self.config.cell.d_spacing(hkl);
        let u = self.rng(INTENSITY_SALT, &unique).f64();
        self.config.intensity_scale * (-self.config.b_factor / (4.0 * d * d)).exp() * (0.2 + u)
    }

    fn measured_intensity(&self, hkl: &MillerIndex) -> f64 {
        let u = self.rng(NOISE_SALT, hkl).f64();
        self.true_intensity(hkl) * (1.0 + self.config.measurement_noise * (2.0 * u - 1.0))
    }

    fn detector_xy(&self, q: [f64; 3]) -> (f64, f64) {
        let q_max = 1.0 / DETECTOR_D_MIN;
        let cols = self.config.image_cols as f64;
        let rows = self.config.image_rows as f64;
        (
            0.5 * cols * (1.0 + 0.9 * q[0] / q_max),
            0.5 * rows * (1.0 + 0.9 * q[1] / q_max),
        )
    }

    fn true_shape(&self, x: f64, y: f64, frame: f64, n_frames: usize) -> PeakShape {
        PeakShape::new(
            1.5 + x / self.config.image_cols as f64,
            1.5 + y / self.config.image_rows as f64,
            0.8 + 0.4 * frame / n_frames.max(1) as f64,
        )
    }

    fn position_of(&self, q: [f64; 3], hkl: &MillerIndex, n_frames: usize) -> DetectorPosition {
        let (x, y) = self.detector_xy(q);
        DetectorPosition::new(x, y, self.frame_of(hkl, n_frames))
    }

    fn jitter(&self, rng: &mut fastrand::Rng, lengths: f64, angles: f64) -> UnitCell {
        let truth = &self.config.cell;
        UnitCell::new(
            truth.lengths.map(|v| v + lengths * (2.0 * rng.f64() - 1.0)),
            truth.angles.map(|v| v + angles * (2.0 * rng.f64() - 1.0)),
            "P 1",
        )
    }

    fn residual(
        &self,
        cell: &UnitCell,
        members: &[(&Peak, MillerIndex)],
        residual: ResidualType,
    ) -> f64 {
        if members.is_empty() {
            return 0.0;
        }
        let sum: f64 = members
            .iter()
            .map(|(peak, hkl)| {
                let q = cell.q_vector(hkl);
                match residual {
                    ResidualType::QSpace => {
                        (0..3).map(|i| (peak.q[i] - q[i]).powi(2)).sum::<f64>()
                    }
                    ResidualType::RealSpace => {
                        let (x, y) = self.detector_xy(q);
                        (peak.position.x - x).powi(2) + (peak.position.y - y).powi(2)
                    }
                }
            })
            .sum();
        (sum / members.len() as f64).sqrt()
    }
}

fn engine_error(stage: Stage, message: impl Into<String>) -> DiffractError {
    DiffractError::Engine {
        stage,
        message: message.into(),
    }
}

impl ReductionEngine for SyntheticEngine {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn find(
        &self,
        dataset: &Dataset,
        frames: FrameRange,
        params: &FinderParams,
    ) -> Result<Vec<Peak>> {
        let n = dataset.n_frames();
        if frames.end > n || frames.is_empty() {
            return Err(engine_error(
                Stage::Find,
                format!("frame range {} outside dataset of {} frames", frames, n),
            ));
        }

        let mut peaks = Vec::new();
        for hkl in self.index_box().filter(|hkl| self.is_reflection(hkl)) {
            let frame = self.frame_of(&hkl, n);
            if !frames.contains(frame) {
                continue;
            }
            let q_true = self.config.cell.q_vector(&hkl);
            if 1.0 / norm(q_true) < DETECTOR_D_MIN {
                continue;
            }
            if self.measured_intensity(&hkl) < params.threshold {
                continue;
            }
            let mut rng = self.rng(Q_SALT, &hkl);
            let q = q_true.map(|v| v + self.config.q_noise * (2.0 * rng.f64() - 1.0));
            let (x, y) = self.detector_xy(q_true);
            let shape = self.true_shape(x, y, frame, n);
            peaks.push(Peak::new(DetectorPosition::new(x, y, frame), shape, q));
        }
        debug!(frames = %frames, found = peaks.len(), "synthetic find");
        Ok(peaks)
    }

    fn integrate(
        &self,
        peaks: &mut [Peak],
        dataset: &Dataset,
        params: &IntegrationParams,
        shape_model: Option<&ShapeModel>,
    ) -> Result<()> {
        if params.peak_area <= 0.0 || params.background_upper <= params.background_lower {
            return Err(engine_error(
                Stage::Integrate,
                "peak_area must be positive and background_upper above background_lower",
            ));
        }
        let n = dataset.n_frames();
        let coverage = 1.0 - (-0.5 * params.peak_area * params.peak_area).exp();
        let fallback = shape_model.and_then(ShapeModel::mean_shape);

        for peak in peaks.iter_mut() {
            if !peak.shape.is_valid() {
                match fallback {
                    Some(shape) => peak.shape = shape,
                    None => {
                        peak.intensity = Some(Intensity::new(0.0, 0.0));
                        continue;
                    }
                }
            }
            let hkl = self
                .config
                .cell
                .index(peak.q, 0.3)
                .filter(|hkl| self.is_reflection(hkl));
            let Some(hkl) = hkl else {
                peak.intensity = Some(Intensity::new(0.0, self.config.background.sqrt()));
                continue;
            };

            let truth = self.position_of(self.config.cell.q_vector(&hkl), &hkl, n);
            let s = peak.shape;
            let offset = ((peak.position.x - truth.x) / s.sigma_x).powi(2)
                + ((peak.position.y - truth.y) / s.sigma_y).powi(2)
                + ((peak.position.frame - truth.frame) / s.sigma_frame).powi(2);
            let value = self.measured_intensity(&hkl) * (-0.5 * offset).exp() * coverage;
            let sigma = (value.max(0.0) + self.config.background).sqrt();
            peak.intensity = Some(Intensity::new(value, sigma));
        }
        Ok(())
    }

    fn autoindex(&self, peaks: &[Peak], params: &AutoindexParams) -> IndexOutcome {
        if params.max_dim <= 0.0 || params.n_solutions == 0 {
            return IndexOutcome::Fatal("max_dim and n_solutions must be positive".to_string());
        }
        let n = peaks.len();
        if n < self.config.min_index_peaks {
            return IndexOutcome::InsufficientData(format!(
                "{} peaks, need at least {}",
                n, self.config.min_index_peaks
            ));
        }

        let mut rng = fastrand::Rng::with_seed(
            self.config.seed ^ INDEX_SALT.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ n as u64,
        );
        let scale = 1.0 / (n as f64).sqrt();
        let main = self.jitter(&mut rng, 3.0 * scale, 0.5 * scale);
        let mut alternative = self.jitter(&mut rng, 6.0 * scale, 0.0);
        alternative.angles = main.angles;
        let mut decoy = self.config.cell.clone().with_space_group("P 1");
        decoy.lengths[2] *= 2.0;

        let candidates = [(main, 1.0), (alternative, 0.9), (decoy, 1.0)];
        let v_min = candidates
            .iter()
            .map(|(cell, _)| cell.volume())
            .fold(f64::INFINITY, f64::min);

        let mut solutions: Vec<IndexSolution> = candidates
            .into_iter()
            .filter(|(cell, _)| cell.volume() >= params.min_vol)
            .filter(|(cell, _)| cell.lengths.iter().all(|l| *l <= params.max_dim))
            .map(|(cell, weight)| {
                let indexed = peaks
                    .iter()
                    .filter(|p| cell.index(p.q, params.indexing_tol).is_some())
                    .count();
                let quality = indexed as f64 / n as f64 * (v_min / cell.volume()) * weight;
                IndexSolution { cell, quality }
            })
            .collect();
        solutions.sort_by(|a, b| b.quality.total_cmp(&a.quality));
        solutions.truncate(params.n_solutions);

        debug!(peaks = n, solutions = solutions.len(), "synthetic autoindex");
        IndexOutcome::Indexed(solutions)
    }

    fn build_shape_model(
        &self,
        source: &str,
        peaks: &[Peak],
        _dataset: &Dataset,
        params: &ShapeModelParams,
    ) -> Result<ShapeModel> {
        let mut model = ShapeModel::new(source, params);
        for peak in peaks.iter().filter(|p| p.is_valid()) {
            model.add_profile(ShapeProfile {
                position: peak.position,
                shape: peak.shape,
                intensity: peak.intensity.map_or(0.0, |i| i.value),
            });
        }
        if model.is_empty() {
            return Err(engine_error(
                Stage::ShapeModel,
                format!("no valid peaks in '{}' to build profiles from", source),
            ));
        }
        Ok(model)
    }

    fn predict(
        &self,
        cell: &UnitCell,
        dataset: &Dataset,
        shape_model: &ShapeModel,
        params: &PredictionParams,
    ) -> Result<Vec<Peak>> {
        let space_group = cell.space_group()?;
        let interpolation: Interpolation = params.interpolation.parse()?;
        let n = dataset.n_frames();
        let fallback = shape_model.mean_shape().ok_or_else(|| {
            engine_error(Stage::Predict, "shape model has no profiles")
        })?;

        let mut peaks = Vec::new();
        for hkl in self.index_box() {
            if hkl.is_origin() || space_group.is_extinct(&hkl) {
                continue;
            }
            let d = cell.d_spacing(&hkl);
            if d < params.prediction_d_min || d > params.prediction_d_max {
                continue;
            }
            let q = cell.q_vector(&hkl);
            let position = self.position_of(q, &hkl, n);
            let shape = shape_model
                .interpolate(
                    &position,
                    params.radius,
                    params.frames,
                    params.neighbours,
                    interpolation,
                )
                .unwrap_or(fallback);
            let mut peak = Peak::new(position, shape, q);
            peak.hkl = Some(hkl);
            peaks.push(peak);
        }
        debug!(predicted = peaks.len(), "synthetic predict");
        Ok(peaks)
    }

    fn refine(
        &self,
        batches: &mut [RefinementBatch],
        peaks: &[Peak],
        params: &RefinerParams,
        residual: ResidualType,
    ) -> Result<bool> {
        if params.max_iterations == 0 {
            warn!("refinement with max_iterations = 0");
            return Ok(false);
        }
        for batch in batches.iter_mut() {
            let members: Vec<(&Peak, MillerIndex)> = peaks
                .iter()
                .filter(|p| batch.contains(p.position.frame))
                .filter_map(|p| p.hkl.map(|hkl| (p, hkl)))
                .collect();
            batch.n_peaks = members.len();
            if members.len() < params.min_peaks_per_batch {
                warn!(
                    batch = batch.index,
                    peaks = members.len(),
                    required = params.min_peaks_per_batch,
                    "too few peaks to refine batch"
                );
                return Ok(false);
            }

            batch.residual_before = Some(self.residual(&batch.cell, &members, residual));
            if params.refine_ub {
                batch.cell.lengths = self.config.cell.lengths;
                batch.cell.angles = self.config.cell.angles;
            }
            batch.residual_after = Some(self.residual(&batch.cell, &members, residual));
            batch.refined = true;
            debug!(
                batch = batch.index,
                peaks = batch.n_peaks,
                before = batch.residual_before,
                after = batch.residual_after,
                "refined batch"
            );
        }
        Ok(true)
    }

    fn update_prediction(&self, peak: &mut Peak, batch: &RefinementBatch) -> bool {
        if !batch.contains(peak.position.frame) {
            return false;
        }
        let Some(hkl) = peak.hkl else {
            return false;
        };
        let q = batch.cell.q_vector(&hkl);
        let (x, y) = self.detector_xy(q);
        peak.q = q;
        peak.position.x = x;
        peak.position.y = y;
        true
    }

    fn merge(
        &self,
        collections: &[&PeakCollection],
        space_group: &SpaceGroup,
        shells: &ResolutionShells,
        params: &MergeParams,
    ) -> Result<MergeResult> {
        struct Merged {
            group: MergeGroup,
            template: Peak,
            variance: f64,
        }

        let mut merged: BTreeMap<MillerIndex, Merged> = BTreeMap::new();
        for collection in collections {
            for peak in collection.peaks.iter().filter(|p| p.selected && p.is_valid()) {
                let (Some(hkl), Some(intensity)) = (peak.hkl, peak.intensity) else {
                    continue;
                };
                let d = peak.d_spacing();
                if shells.shell_of(d).is_none() {
                    continue;
                }
                let key = space_group.unique_index(&hkl, params.friedel);
                let entry = merged.entry(key).or_insert_with(|| Merged {
                    group: MergeGroup {
                        d,
                        intensities: Vec::new(),
                    },
                    template: peak.clone(),
                    variance: 0.0,
                });
                entry.group.intensities.push(intensity.value);
                entry.variance += intensity.sigma * intensity.sigma;
            }
        }

        // Unique reflections each shell could hold.
        let mut expected = vec![0usize; shells.len()];
        let uniques: BTreeSet<MillerIndex> = self
            .index_box()
            .filter(|hkl| !hkl.is_origin() && !space_group.is_extinct(hkl))
            .map(|hkl| space_group.unique_index(&hkl, params.friedel))
            .collect();
        for hkl in &uniques {
            if let Some(i) = shells.shell_of(self.config.cell.d_spacing(hkl)) {
                expected[i] += 1;
            }
        }

        let mut report = QualityReport {
            shells: shells.empty_shells(),
            overall: QualityShell {
                d_min: shells.d_min(),
                d_max: shells.d_max(),
                ..Default::default()
            },
        };
        for (i, shell) in report.shells.iter_mut().enumerate() {
            let groups: Vec<&MergeGroup> = merged
                .values()
                .map(|m| &m.group)
                .filter(|g| shells.shell_of(g.d) == Some(i))
                .collect();
            shell_statistics(shell, &groups, expected[i]);
        }
        let all: Vec<&MergeGroup> = merged.values().map(|m| &m.group).collect();
        shell_statistics(&mut report.overall, &all, expected.iter().sum());

        let merged_peaks = merged
            .into_iter()
            .map(|(key, m)| {
                let n = m.group.intensities.len() as f64;
                let mut peak = m.template;
                peak.hkl = Some(key);
                peak.intensity = Some(Intensity::new(m.group.mean(), m.variance.sqrt() / n));
                peak.caught_by_filter = false;
                peak
            })
            .collect();

        Ok(MergeResult {
            merged: merged_peaks,
            report,
        })
    }
}

fn norm(q: [f64; 3]) -> f64 {
    (q[0] * q[0] + q[1] * q[1] + q[2] * q[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorParams, ReductionConfig};
    use crate::model::DatasetBuilder;

    fn dataset(frames: usize) -> Dataset {
        DatasetBuilder::new("synthetic", &DetectorParams::default())
            .with_frames(frames)
            .finish()
            .unwrap()
    }

    fn engine() -> SyntheticEngine {
        SyntheticEngine::new(SyntheticConfig::default()).unwrap()
    }

    #[test]
    fn test_find_is_deterministic_and_windowed() {
        let engine = engine();
        let ds = dataset(60);
        let params = FinderParams::default();
        let a = engine.find(&ds, FrameRange::new(0, 10), &params).unwrap();
        let b = engine.find(&ds, FrameRange::new(0, 10), &params).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(a.iter().all(|p| p.position.frame < 10.0));

        let wider = engine.find(&ds, FrameRange::new(0, 20), &params).unwrap();
        assert!(wider.len() > a.len());
    }

    #[test]
    fn test_find_rejects_out_of_range_window() {
        let engine = engine();
        let ds = dataset(10);
        let err = engine
            .find(&ds, FrameRange::new(5, 15), &FinderParams::default())
            .unwrap_err();
        assert!(matches!(err, DiffractError::Engine { stage: Stage::Find, .. }));
    }

    #[test]
    fn test_integration_sets_valid_intensities() {
        let engine = engine();
        let ds = dataset(30);
        let mut peaks = engine
            .find(&ds, ds.frame_range(), &FinderParams::default())
            .unwrap();
        engine
            .integrate(&mut peaks, &ds, &IntegrationParams::default(), None)
            .unwrap();
        assert!(peaks.iter().all(|p| p.is_valid()));
    }

    #[test]
    fn test_autoindex_insufficient_data() {
        let engine = engine();
        let outcome = engine.autoindex(&[], &AutoindexParams::default());
        assert!(matches!(outcome, IndexOutcome::InsufficientData(_)));
    }

    #[test]
    fn test_autoindex_recovers_reference_cell() {
        let engine = engine();
        let ds = dataset(60);
        let peaks = engine
            .find(&ds, ds.frame_range(), &FinderParams::default())
            .unwrap();
        assert!(peaks.len() >= engine.config().min_index_peaks);

        let params = AutoindexParams::default();
        let IndexOutcome::Indexed(solutions) = engine.autoindex(&peaks, &params) else {
            panic!("expected solutions");
        };
        let reference = ReductionConfig::default().cell.reference_cell();
        assert!(solutions.windows(2).all(|w| w[0].quality >= w[1].quality));
        assert!(
            solutions
                .iter()
                .any(|s| s.cell.is_similar(&reference, params.length_tol, params.angle_tol))
        );
    }
}
