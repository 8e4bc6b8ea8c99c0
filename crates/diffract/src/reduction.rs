//! Reduction facade: pipeline plus archive handling.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::ReductionConfig;
use crate::engine::ReductionEngine;
use crate::error::Result;
use crate::experiment::{Experiment, archive_path};
use crate::pipeline::{CancelToken, Pipeline, PipelineReport, ProgressObserver};

/// Where and how a reduction is stored.
#[derive(Debug, Clone)]
pub struct ReductionOptions {
    /// Experiment name; also the archive file stem.
    pub name: String,
    pub output_dir: PathBuf,
    /// Load an existing archive and skip stages whose artifacts exist.
    pub resume: bool,
    /// Keep the previous archive in `<name>.history/` when saving.
    pub keep_history: bool,
}

impl ReductionOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_dir: PathBuf::from("."),
            resume: false,
            keep_history: true,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn archive_path(&self) -> PathBuf {
        archive_path(&self.output_dir, &self.name)
    }
}

/// Runs a pipeline over an experiment and persists the result.
pub struct Reduction {
    pipeline: Pipeline,
    options: ReductionOptions,
}

impl Reduction {
    pub fn new(engine: impl ReductionEngine + 'static, options: ReductionOptions) -> Self {
        let pipeline = Pipeline::new(Arc::new(engine)).with_resume(options.resume);
        Self { pipeline, options }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.pipeline = self.pipeline.with_observer(observer);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.pipeline = self.pipeline.with_cancel_token(token);
        self
    }

    pub fn options(&self) -> &ReductionOptions {
        &self.options
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Load the archive when resuming and it exists, otherwise start fresh.
    ///
    /// A resumed experiment takes `config` as its configuration, reference cell
    /// included, so that command-line overrides apply to the remaining stages.
    pub fn open(&self, config: ReductionConfig) -> Result<Experiment> {
        let path = self.options.archive_path();
        if self.options.resume && path.exists() {
            let mut exp = Experiment::load(&path)?;
            info!(path = %path.display(), collections = exp.collection_names().len(), "resuming experiment");
            exp.set_reference_cell(config.cell.reference_cell());
            exp.config = config;
            return Ok(exp);
        }
        Ok(Experiment::new(self.options.name.clone(), config))
    }

    /// Run the pipeline, then save the archive and metadata whatever the outcome.
    ///
    /// A save failure after a successful run is returned; after a failed run
    /// the run's error takes precedence.
    pub fn run(&self, exp: &mut Experiment, dataset: &str) -> Result<PipelineReport> {
        let result = self.pipeline.run(exp, dataset);
        if let Err(e) = &result {
            error!(error = %e, "reduction stopped, saving last committed state");
        }
        let saved = self.save(exp);
        match (result, saved) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    /// Save the archive (with history if enabled) and the metadata file.
    pub fn save(&self, exp: &Experiment) -> Result<()> {
        let path = self.options.archive_path();
        if self.options.keep_history {
            exp.save_with_history(&path)?;
        } else {
            exp.save(&path)?;
        }
        exp.write_metadata(&self.options.output_dir)?;
        Ok(())
    }
}
