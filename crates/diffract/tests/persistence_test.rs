//! Integration tests for experiment archives and the reduction facade.

mod common;

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use common::{DATASET, ScriptedEngine, experiment};
use diffract::experiment::archive_path;
use diffract::pipeline::{FILTERED, FOUND, PREDICTED};
use diffract::{DiffractError, Experiment, Pipeline, Reduction, ReductionOptions};

fn reduced() -> Experiment {
    let mut exp = experiment(60);
    Pipeline::new(Arc::new(ScriptedEngine::new()))
        .run(&mut exp, DATASET)
        .unwrap();
    exp
}

// =============================================================================
// Save / load
// =============================================================================

#[test]
fn test_archive_round_trip_keeps_counts() {
    let dir = TempDir::new().unwrap();
    let exp = reduced();
    let path = archive_path(dir.path(), &exp.name);

    exp.save(&path).unwrap();
    let loaded = Experiment::load(&path).unwrap();

    for name in [FOUND, FILTERED, PREDICTED] {
        assert_eq!(
            loaded.get_collection(name).unwrap().len(),
            exp.get_collection(name).unwrap().len()
        );
        assert_eq!(
            loaded.get_collection(name).unwrap().number_caught(),
            exp.get_collection(name).unwrap().number_caught()
        );
    }
    assert_eq!(loaded.accepted_cell(), exp.accepted_cell());
    assert_eq!(loaded.batches(), exp.batches());
    assert_eq!(loaded.quality(), exp.quality());
    assert_eq!(loaded, exp);
}

#[test]
fn test_load_missing_archive() {
    let dir = TempDir::new().unwrap();
    let err = Experiment::load(dir.path().join("missing.dfx")).unwrap_err();
    assert!(matches!(err, DiffractError::Persistence(_)));
}

#[test]
fn test_load_rejects_newer_format() {
    let dir = TempDir::new().unwrap();
    let mut exp = experiment(10);
    exp.format_version = 99;
    let path = dir.path().join("future.dfx");
    exp.save(&path).unwrap();

    let err = Experiment::load(&path).unwrap_err();
    assert!(err.to_string().contains("format version 99"));
}

#[test]
fn test_load_detects_edited_frames() {
    let dir = TempDir::new().unwrap();
    let exp = experiment(10);
    let path = dir.path().join("edited.dfx");
    exp.save(&path).unwrap();

    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    value["datasets"][DATASET]["frames"][3]["omega"] = serde_json::json!(42.0);
    fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    let err = Experiment::load(&path).unwrap_err();
    assert!(err.to_string().contains("fingerprint"));
}

/// Advance `updated_at` so consecutive saves get distinct history names.
fn touch(exp: &mut Experiment) {
    std::thread::sleep(std::time::Duration::from_millis(5));
    let reference = exp.reference_cell().unwrap().clone();
    exp.set_reference_cell(reference);
}

#[test]
fn test_history_keeps_previous_versions() {
    let dir = TempDir::new().unwrap();
    let mut exp = experiment(10);
    let path = archive_path(dir.path(), &exp.name);

    exp.save_with_history(&path).unwrap();
    assert!(Experiment::list_history(&path).unwrap().is_empty());

    exp.add_metadata("note", "first");
    touch(&mut exp);
    exp.save_with_history(&path).unwrap();

    exp.add_metadata("note", "second");
    touch(&mut exp);
    exp.save_with_history(&path).unwrap();

    let history = Experiment::list_history(&path).unwrap();
    assert_eq!(history.len(), 2);

    let newest = Experiment::load_history(&path, 0).unwrap();
    assert_eq!(newest.metadata()["note"], "first");
    let oldest = Experiment::load_history(&path, 1).unwrap();
    assert!(!oldest.metadata().contains_key("note"));
    assert!(Experiment::load_history(&path, 5).is_err());
    assert_eq!(Experiment::load(&path).unwrap().metadata()["note"], "second");
}

// =============================================================================
// Reduction facade
// =============================================================================

#[test]
fn test_reduction_saves_archive_and_metadata() {
    let dir = TempDir::new().unwrap();
    let options = ReductionOptions::new("lysozyme").with_output_dir(dir.path());
    let reduction = Reduction::new(ScriptedEngine::new(), options);

    let mut exp = reduction.open(common::config()).unwrap();
    exp.add_dataset(common::dataset(60)).unwrap();
    reduction.run(&mut exp, DATASET).unwrap();

    let archive = dir.path().join("lysozyme.dfx");
    assert!(archive.exists());
    let meta = fs::read_to_string(dir.path().join("lysozyme.meta")).unwrap();
    assert!(meta.starts_with("name lysozyme\n"));
    assert!(meta.contains("n_found 300"));

    let loaded = Experiment::load(&archive).unwrap();
    assert_eq!(loaded.get_collection(FOUND).unwrap().len(), 300);
}

#[test]
fn test_reduction_saves_state_after_failure() {
    let dir = TempDir::new().unwrap();
    let options = ReductionOptions::new("failing").with_output_dir(dir.path());
    let reduction = Reduction::new(ScriptedEngine::new().with_index_threshold(10_000), options);

    let mut exp = reduction.open(common::config()).unwrap();
    exp.add_dataset(common::dataset(60)).unwrap();
    let err = reduction.run(&mut exp, DATASET).unwrap_err();
    assert!(matches!(err, DiffractError::AutoindexFailed { .. }));

    let loaded = Experiment::load(dir.path().join("failing.dfx")).unwrap();
    assert!(loaded.has_collection(FOUND));
    assert!(loaded.has_collection(FILTERED));
    assert!(loaded.accepted_cell().is_none());
}

#[test]
fn test_reduction_resumes_from_archive() {
    let dir = TempDir::new().unwrap();
    let first = Reduction::new(
        ScriptedEngine::new(),
        ReductionOptions::new("resumed").with_output_dir(dir.path()),
    );
    let mut exp = first.open(common::config()).unwrap();
    exp.add_dataset(common::dataset(60)).unwrap();
    first.run(&mut exp, DATASET).unwrap();

    let second = Reduction::new(
        ScriptedEngine::new(),
        ReductionOptions::new("resumed")
            .with_output_dir(dir.path())
            .with_resume(true),
    );
    let mut resumed = second.open(common::config()).unwrap();
    assert!(resumed.has_dataset(DATASET));
    assert!(resumed.has_collection(PREDICTED));

    let report = second.run(&mut resumed, DATASET).unwrap();
    assert!(!report.skipped.is_empty());
    assert_eq!(Experiment::list_history(second.options().archive_path()).unwrap().len(), 1);
}

#[test]
fn test_resume_takes_reference_cell_from_new_config() {
    let dir = TempDir::new().unwrap();
    let first = Reduction::new(
        ScriptedEngine::new(),
        ReductionOptions::new("recell").with_output_dir(dir.path()),
    );
    let mut exp = first.open(common::config()).unwrap();
    exp.add_dataset(common::dataset(60)).unwrap();
    first.run(&mut exp, DATASET).unwrap();
    assert_eq!(exp.reference_cell().unwrap().lengths[0], 24.5);

    let mut config = common::config();
    config.set_parameter("a", "50.0").unwrap();
    config.set_parameter("space_group", "P_1_21_1").unwrap();
    let second = Reduction::new(
        ScriptedEngine::new(),
        ReductionOptions::new("recell")
            .with_output_dir(dir.path())
            .with_resume(true),
    );
    let resumed = second.open(config).unwrap();

    let reference = resumed.reference_cell().unwrap();
    assert_eq!(reference.lengths[0], 50.0);
    assert_eq!(reference.space_group, "P 1 21 1");
    assert_eq!(resumed.config.cell.a, 50.0);
}
