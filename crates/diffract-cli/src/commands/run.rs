//! Run command - reduce a dataset end to end and save the experiment.

use colored::Colorize;
use diffract::engine::SyntheticConfig;
use diffract::pipeline::AutoindexAttempt;
use diffract::{
    CancelToken, DatasetBuilder, DiffractError, ProgressObserver, Reduction, ReductionConfig,
    ReductionOptions, Stage, StageOutcome, SyntheticEngine,
};
use tracing::warn;

use crate::cli::{InputFormat, RunArgs};

const DATASET: &str = "scan";

/// Prints stage progress as it happens.
struct ConsoleObserver {
    verbose: bool,
}

impl ProgressObserver for ConsoleObserver {
    fn stage_started(&self, stage: Stage) {
        if self.verbose {
            println!("{} {}", "Starting".cyan(), stage);
        }
    }

    fn stage_finished(&self, outcome: &StageOutcome) {
        let count = if outcome.count == 0 {
            outcome.count.to_string().red()
        } else {
            outcome.count.to_string().white().bold()
        };
        println!(
            "  {:20} {:12} {} of {}",
            outcome.stage.to_string().green(),
            outcome.collection,
            count,
            outcome.total
        );
    }

    fn stage_skipped(&self, stage: Stage) {
        println!("  {:20} {}", stage.to_string().yellow(), "skipped (resumed)".dimmed());
    }

    fn autoindex_attempt(&self, attempt: &AutoindexAttempt) {
        println!("    {}", attempt);
    }
}

/// Parameter file, then command-line overrides.
fn build_config(args: &RunArgs) -> Result<ReductionConfig, DiffractError> {
    let mut config = match &args.params {
        Some(path) => ReductionConfig::load(path)?,
        None => ReductionConfig::default(),
    };

    if let Some(detector) = &args.detector {
        config.detector.detector = detector.clone();
    }
    let ai = &mut config.autoindexer;
    if let Some(v) = args.min_autoindex_frames {
        ai.min_autoindex_frames = v;
    }
    if let Some(v) = args.max_autoindex_frames {
        ai.max_autoindex_frames = v;
    }
    if let Some(v) = args.length_tol {
        ai.length_tol = v;
    }
    if let Some(v) = args.angle_tol {
        ai.angle_tol = v;
    }
    if let Some(v) = args.batches {
        config.refiner.n_batches = v;
    }

    config.validate()?;
    Ok(config)
}

fn build_dataset(args: &RunArgs, config: &ReductionConfig) -> Result<diffract::Dataset, DiffractError> {
    let mut builder = DatasetBuilder::new(DATASET, &config.detector);
    match args.format {
        InputFormat::Raw => {
            if args.files.is_empty() {
                return Err(DiffractError::Dataset(
                    "raw format requires at least one --files entry".to_string(),
                ));
            }
            for file in &args.files {
                if !file.exists() {
                    return Err(DiffractError::Dataset(format!(
                        "frame file not found: {}",
                        file.display()
                    )));
                }
                builder.add_frame(Some(file.clone()));
            }
        }
        InputFormat::Synthetic => builder = builder.with_frames(args.frames),
    }
    builder.finish()
}

/// The simulated crystal follows the configured reference cell and space group.
fn engine_config(args: &RunArgs, config: &ReductionConfig) -> SyntheticConfig {
    SyntheticConfig::default()
        .with_cell(config.cell.reference_cell())
        .with_seed(args.seed)
        .with_detector(config.detector.image_rows, config.detector.image_cols)
}

pub fn run(args: RunArgs, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    // Configuration errors stop us before any stage runs.
    let config = build_config(&args)?;
    let dataset = build_dataset(&args, &config)?;

    std::fs::create_dir_all(&args.output_dir).map_err(|e| DiffractError::Io {
        path: args.output_dir.clone(),
        source: e,
    })?;

    println!(
        "{} {} ({} frames, {})",
        "Reducing".cyan().bold(),
        args.name.white(),
        dataset.n_frames(),
        args.format
    );

    let engine = SyntheticEngine::new(engine_config(&args, &config))?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Cancelling after the current stage...");
        handler_token.cancel();
    })?;

    let options = ReductionOptions::new(&args.name)
        .with_output_dir(&args.output_dir)
        .with_resume(args.resume);
    let reduction = Reduction::new(engine, options)
        .with_observer(Box::new(ConsoleObserver { verbose }))
        .with_cancel_token(cancel);

    let mut experiment = reduction.open(config)?;
    match experiment.dataset(DATASET) {
        Ok(existing) => {
            if existing.fingerprint() != dataset.fingerprint() {
                warn!(dataset = DATASET, "resumed archive holds a different dataset, keeping it");
            }
        }
        Err(_) => experiment.add_dataset(dataset)?,
    }

    let archive = reduction.options().archive_path();
    let report = match reduction.run(&mut experiment, DATASET) {
        Ok(report) => report,
        Err(e) => {
            eprintln!(
                "{} {}",
                "Saved last committed state to".yellow(),
                archive.display()
            );
            return Err(e.into());
        }
    };

    println!();
    if let Some(cell) = &report.accepted_cell {
        println!("{} {}", "Accepted cell:".yellow().bold(), cell);
    }
    if let Some(refinement) = &report.refinement {
        if !refinement.is_refined() {
            println!("{}", "Refinement failed; predictions are unrefined".yellow());
        }
    }
    if let Some(quality) = &report.quality {
        println!();
        println!("{}", "Merging statistics:".yellow().bold());
        print!("{}", quality.to_table());
    }

    println!();
    println!(
        "{} {}",
        "Saved to".green().bold(),
        archive.display().to_string().white()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> RunArgs {
        RunArgs {
            name: "test".to_string(),
            detector: None,
            files: Vec::new(),
            format: InputFormat::Synthetic,
            params: None,
            resume: false,
            min_autoindex_frames: None,
            max_autoindex_frames: None,
            length_tol: None,
            angle_tol: None,
            batches: None,
            frames: 30,
            output_dir: PathBuf::from("."),
            seed: 42,
        }
    }

    #[test]
    fn test_missing_params_file_is_config_error() {
        let mut a = args();
        a.params = Some(PathBuf::from("/nonexistent/params.txt"));
        let err = build_config(&a).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_overrides_apply() {
        let mut a = args();
        a.min_autoindex_frames = Some(5);
        a.max_autoindex_frames = Some(8);
        a.batches = Some(4);
        a.detector = Some("BioDiff5000".to_string());
        let config = build_config(&a).unwrap();
        assert_eq!(config.autoindexer.min_autoindex_frames, 5);
        assert_eq!(config.autoindexer.max_autoindex_frames, 8);
        assert_eq!(config.refiner.n_batches, 4);
        assert_eq!(config.detector.detector, "BioDiff5000");
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut a = args();
        a.min_autoindex_frames = Some(20);
        a.max_autoindex_frames = Some(10);
        assert!(build_config(&a).unwrap_err().is_configuration());
    }

    #[test]
    fn test_engine_follows_configured_cell() {
        let dir = tempfile::TempDir::new().unwrap();
        let params = dir.path().join("params.txt");
        std::fs::write(&params, "a 30.0\nb 40.0\nc 50.0\nspace_group P_1_21_1\n").unwrap();
        let mut a = args();
        a.params = Some(params);
        a.seed = 7;

        let config = build_config(&a).unwrap();
        let engine = engine_config(&a, &config);
        assert_eq!(engine.cell.lengths, [30.0, 40.0, 50.0]);
        assert_eq!(engine.cell.space_group, "P 1 21 1");
        assert_eq!(engine.seed, 7);
        assert!(SyntheticEngine::new(engine).is_ok());
    }

    #[test]
    fn test_raw_requires_files() {
        let mut a = args();
        a.format = InputFormat::Raw;
        let config = build_config(&a).unwrap();
        assert!(build_dataset(&a, &config).is_err());
    }

    #[test]
    fn test_raw_frames_from_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut a = args();
        a.format = InputFormat::Raw;
        for i in 0..3 {
            let path = dir.path().join(format!("frame_{:03}.raw", i));
            std::fs::write(&path, [0u8; 16]).unwrap();
            a.files.push(path);
        }
        let config = build_config(&a).unwrap();
        let dataset = build_dataset(&a, &config).unwrap();
        assert_eq!(dataset.n_frames(), 3);
        assert!(dataset.frames()[0].source.is_some());
    }
}
