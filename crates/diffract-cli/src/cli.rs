//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use diffract::observability::LogFormat;
use std::path::PathBuf;

/// Diffract: single-crystal diffraction reduction pipeline
#[derive(Parser)]
#[command(name = "diffract")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormatChoice,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full reduction pipeline on a dataset
    Run(RunArgs),

    /// Print or write the default parameter file
    Params {
        /// Write the parameters to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the contents of a saved experiment
    Status {
        /// Path to an experiment archive (.dfx)
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Experiment name (archive stem)
    #[arg(short, long)]
    pub name: String,

    /// Detector name recorded with the dataset
    #[arg(short, long)]
    pub detector: Option<String>,

    /// Frame image files, in scan order (raw format)
    #[arg(short, long, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Input format
    #[arg(long, default_value = "synthetic")]
    pub format: InputFormat,

    /// Parameter file (key value per line)
    #[arg(short, long)]
    pub params: Option<PathBuf>,

    /// Resume from an existing archive, skipping completed stages
    #[arg(long)]
    pub resume: bool,

    /// Smallest autoindex window, in frames
    #[arg(long)]
    pub min_autoindex_frames: Option<usize>,

    /// Largest autoindex window (exclusive), in frames
    #[arg(long)]
    pub max_autoindex_frames: Option<usize>,

    /// Cell length tolerance against the reference cell, in Å
    #[arg(long)]
    pub length_tol: Option<f64>,

    /// Cell angle tolerance against the reference cell, in degrees
    #[arg(long)]
    pub angle_tol: Option<f64>,

    /// Number of refinement batches
    #[arg(long)]
    pub batches: Option<usize>,

    /// Number of frames to simulate (synthetic format)
    #[arg(long, default_value = "60")]
    pub frames: usize,

    /// Directory for the archive and metadata files
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Seed of the synthetic engine
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

/// Where frames come from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InputFormat {
    /// One raw image file per frame
    Raw,
    /// Simulated frames
    #[default]
    Synthetic,
}

impl std::str::FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(InputFormat::Raw),
            "synthetic" | "sim" => Ok(InputFormat::Synthetic),
            _ => Err(format!("Unknown format: {}. Use raw or synthetic.", s)),
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::Raw => write!(f, "raw"),
            InputFormat::Synthetic => write!(f, "synthetic"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub enum LogFormatChoice {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormatChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormatChoice::Pretty),
            "json" => Ok(LogFormatChoice::Json),
            _ => Err(format!("Unknown log format: {}. Use pretty or json.", s)),
        }
    }
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
        }
    }
}
