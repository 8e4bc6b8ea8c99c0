//! `<name>.meta` run metadata: one `key value` pair per line.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{DiffractError, Result};

use super::registry::Experiment;

impl Experiment {
    /// Metadata file path for this experiment inside `dir`.
    pub fn metadata_path(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(format!("{}.meta", self.name))
    }

    /// Write the metadata file into `dir` and return its path.
    pub fn write_metadata(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.metadata_path(dir);
        let mut content = String::new();
        content.push_str(&format!("name {}\n", self.name));
        content.push_str(&format!("created {}\n", self.created_at.to_rfc3339()));
        for (key, value) in &self.metadata {
            content.push_str(&format!("{} {}\n", key, value.replace('\n', " ")));
        }
        fs::write(&path, content).map_err(|e| DiffractError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Read a metadata file, merging its entries into this experiment.
    ///
    /// Returns the entries read. `name` and `created` lines are informational only.
    pub fn read_metadata(&mut self, path: impl AsRef<Path>) -> Result<IndexMap<String, String>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| DiffractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let entries = parse_metadata(&content);
        for (key, value) in &entries {
            if key != "name" && key != "created" {
                self.metadata.insert(key.clone(), value.clone());
            }
        }
        Ok(entries)
    }
}

fn parse_metadata(content: &str) -> IndexMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key.to_string(), value.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}
