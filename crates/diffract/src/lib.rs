//! Diffract: orchestration layer for single-crystal diffraction data reduction.
//!
//! Diffract sequences the stages of a reduction (peak search, integration,
//! filtering, unit-cell determination, shape modelling, prediction,
//! refinement, merging) over an [`Experiment`] that owns every intermediate
//! artifact under a stable name. The numerical work is delegated to a
//! [`ReductionEngine`].
//!
//! # Core Principles
//!
//! - **Named artifacts**: every stage reads and writes registry entries
//! - **Recoverable failures**: empty results are counted outcomes, not panics
//! - **Transactional refinement**: predictions only change when refinement succeeds
//!
//! # Example
//!
//! ```no_run
//! use diffract::{
//!     DatasetBuilder, Experiment, Pipeline, ReductionConfig, SyntheticConfig, SyntheticEngine,
//! };
//! use std::sync::Arc;
//!
//! let config = ReductionConfig::default();
//! let dataset = DatasetBuilder::new("scan", &config.detector)
//!     .with_frames(60)
//!     .finish()
//!     .unwrap();
//!
//! let mut experiment = Experiment::new("lysozyme", config);
//! experiment.add_dataset(dataset).unwrap();
//!
//! let engine = SyntheticEngine::new(SyntheticConfig::default()).unwrap();
//! let report = Pipeline::new(Arc::new(engine)).run(&mut experiment, "scan").unwrap();
//! println!("Accepted cell: {:?}", report.accepted_cell);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod model;
pub mod observability;
pub mod pipeline;

mod reduction;

pub use config::{ParamValue, ReductionConfig};
pub use engine::{IndexOutcome, IndexSolution, ReductionEngine, SyntheticConfig, SyntheticEngine};
pub use error::{DiffractError, Result};
pub use experiment::Experiment;
pub use model::{
    CollectionKind, Dataset, DatasetBuilder, FrameRange, Peak, PeakCollection, QualityReport,
    UnitCell,
};
pub use pipeline::{CancelToken, Pipeline, PipelineReport, ProgressObserver, Stage, StageOutcome};
pub use reduction::{Reduction, ReductionOptions};
