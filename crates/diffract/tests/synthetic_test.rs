//! End-to-end reductions driven by the synthetic engine.

use std::sync::Arc;

use diffract::pipeline::{MERGED, PREDICTED};
use diffract::{
    DatasetBuilder, DiffractError, Experiment, Pipeline, PipelineReport, ReductionConfig,
    SyntheticConfig, SyntheticEngine,
};

fn reduce(config: ReductionConfig, engine: SyntheticConfig) -> (Experiment, diffract::Result<PipelineReport>) {
    let dataset = DatasetBuilder::new("scan", &config.detector)
        .with_frames(60)
        .finish()
        .unwrap();
    let mut exp = Experiment::new("lysozyme", config);
    exp.add_dataset(dataset).unwrap();
    let engine = SyntheticEngine::new(engine).unwrap();
    let result = Pipeline::new(Arc::new(engine)).run(&mut exp, "scan");
    (exp, result)
}

#[test]
fn test_synthetic_reduction_recovers_cell() {
    let truth = SyntheticConfig::default();
    let (exp, result) = reduce(ReductionConfig::default(), truth.clone());
    let report = result.unwrap();

    assert!(!report.autoindex_attempts.is_empty());
    let accepted = report.accepted_cell.unwrap();
    assert!(accepted.is_similar(&truth.cell, 0.5, 0.1));
    assert_eq!(accepted.space_group, "P 21 21 21");

    assert!(report.refinement.unwrap().is_refined());
    let batch = &exp.batches()[0];
    assert_eq!(batch.cell.lengths, truth.cell.lengths);
    assert!(batch.residual_after.unwrap() <= batch.residual_before.unwrap());
}

#[test]
fn test_synthetic_merging_statistics() {
    let (exp, result) = reduce(ReductionConfig::default(), SyntheticConfig::default());
    let report = result.unwrap();
    let quality = report.quality.unwrap();

    assert_eq!(quality.shells.len(), 10);
    assert!(quality.overall.completeness > 0.9);
    assert!(quality.overall.cc_half > 0.9);
    assert!(quality.overall.r_merge < 0.1);
    assert!(quality.overall.redundancy > 1.0);
    assert!(exp.get_collection(MERGED).unwrap().len() < exp.get_collection(PREDICTED).unwrap().len());
}

#[test]
fn test_synthetic_reduction_is_deterministic() {
    let (a, ra) = reduce(ReductionConfig::default(), SyntheticConfig::default().with_seed(7));
    let (b, rb) = reduce(ReductionConfig::default(), SyntheticConfig::default().with_seed(7));
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a.get_collection(MERGED).unwrap(), b.get_collection(MERGED).unwrap());
    assert_eq!(a.accepted_cell(), b.accepted_cell());
}

#[test]
fn test_synthetic_insufficient_peaks_exhausts_windows() {
    let engine = SyntheticConfig::default().with_min_index_peaks(100_000);
    let (exp, result) = reduce(ReductionConfig::default(), engine);

    let err = result.unwrap_err();
    assert!(matches!(err, DiffractError::AutoindexFailed { attempts: 10, .. }));
    assert!(exp.accepted_cell().is_none());
}

#[test]
fn test_synthetic_refinement_failure_is_recoverable() {
    let mut config = ReductionConfig::default();
    config.refiner.min_peaks_per_batch = 1_000_000;
    let (exp, result) = reduce(config, SyntheticConfig::default());

    let report = result.unwrap();
    assert!(!report.refinement.unwrap().is_refined());
    assert!(exp.batches().is_empty());
    assert!(exp.quality().is_some());
}
