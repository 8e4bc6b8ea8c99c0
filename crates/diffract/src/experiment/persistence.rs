//! Persistence for experiments - save/load JSON archives.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{DiffractError, Result};

use super::registry::Experiment;

/// Current archive format version.
pub const ARCHIVE_VERSION: u32 = 1;

/// File extension of experiment archives.
pub const ARCHIVE_EXTENSION: &str = "dfx";

impl Experiment {
    /// Save the experiment to a JSON archive.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use diffract::experiment::{archive_path, Experiment};
    /// # fn example(experiment: &Experiment) -> diffract::Result<()> {
    /// experiment.save(archive_path("runs", &experiment.name))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    DiffractError::Persistence(format!(
                        "Failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = File::create(path).map_err(|e| {
            DiffractError::Persistence(format!(
                "Failed to create file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).map_err(|e| {
            DiffractError::Persistence(format!("Failed to serialize experiment: {}", e))
        })?;

        info!(path = %path.display(), collections = self.collections.len(), "saved experiment");
        Ok(())
    }

    /// Load an experiment archive.
    ///
    /// Rejects archives written by a newer format version and archives whose
    /// dataset frame lists no longer match their recorded fingerprints.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|e| {
            DiffractError::Persistence(format!(
                "Failed to open file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let reader = BufReader::new(file);
        let experiment: Experiment = serde_json::from_reader(reader).map_err(|e| {
            DiffractError::Persistence(format!(
                "Failed to parse experiment '{}': {}",
                path.display(),
                e
            ))
        })?;

        if experiment.format_version > ARCHIVE_VERSION {
            return Err(DiffractError::Persistence(format!(
                "Archive '{}' has format version {} (supported up to {})",
                path.display(),
                experiment.format_version,
                ARCHIVE_VERSION
            )));
        }
        experiment.verify_fingerprints()?;

        debug!(path = %path.display(), "loaded experiment");
        Ok(experiment)
    }

    fn verify_fingerprints(&self) -> Result<()> {
        for (name, dataset) in &self.datasets {
            match self.fingerprints.get(name) {
                Some(expected) if *expected != dataset.fingerprint() => {
                    return Err(DiffractError::Persistence(format!(
                        "Dataset '{}' does not match its recorded fingerprint",
                        name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Save with version history.
    ///
    /// Creates a timestamped backup in a `.history` subdirectory before saving.
    ///
    /// ```text
    /// runs/
    /// ├── lysozyme.dfx
    /// └── lysozyme.history/
    ///     └── 2024-12-30T10-00-00.dfx
    /// ```
    pub fn save_with_history(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if path.exists() {
            Self::save_to_history(path)?;
        }

        self.save(path)
    }

    fn save_to_history(path: &Path) -> Result<()> {
        let history_dir = history_directory(path);

        if !history_dir.exists() {
            fs::create_dir_all(&history_dir).map_err(|e| {
                DiffractError::Persistence(format!(
                    "Failed to create history directory '{}': {}",
                    history_dir.display(),
                    e
                ))
            })?;
        }

        let existing = Self::load(path)?;

        let timestamp = existing.updated_at.format("%Y-%m-%dT%H-%M-%S%.3f").to_string();
        let history_file = history_dir.join(format!("{}.{}", timestamp, ARCHIVE_EXTENSION));

        existing.save(&history_file)
    }

    /// List all historical versions of an archive, newest first.
    pub fn list_history(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        let history_dir = history_directory(path);

        if !history_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&history_dir)
            .map_err(|e| {
                DiffractError::Persistence(format!(
                    "Failed to read history directory '{}': {}",
                    history_dir.display(),
                    e
                ))
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION))
            .collect();

        entries.sort_by(|a, b| b.cmp(a));

        Ok(entries)
    }

    /// Load a specific historical version (0 is the newest).
    pub fn load_history(path: impl AsRef<Path>, index: usize) -> Result<Self> {
        let history = Self::list_history(&path)?;

        let history_path = history.get(index).ok_or_else(|| {
            DiffractError::Persistence(format!(
                "History version {} not found (only {} versions available)",
                index,
                history.len()
            ))
        })?;

        Self::load(history_path)
    }
}

fn history_directory(path: &Path) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let parent = path.parent().unwrap_or(Path::new("."));

    parent.join(format!("{}.history", stem))
}

/// Archive path for an experiment name inside `dir`.
///
/// ```
/// use diffract::experiment::archive_path;
///
/// let path = archive_path("runs", "lysozyme");
/// assert_eq!(path.to_string_lossy(), "runs/lysozyme.dfx");
/// ```
pub fn archive_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{}.{}", name, ARCHIVE_EXTENSION))
}
