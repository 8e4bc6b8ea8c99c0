//! Flat `key value` parameter files.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::ReductionConfig;
use crate::error::{DiffractError, Result};

impl ReductionConfig {
    /// Load a parameter file on top of the defaults.
    ///
    /// A missing file is a configuration error, raised before any stage runs.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DiffractError::Config(format!(
                "parameter file '{}' does not exist",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| DiffractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config = Self::default();
        let applied = config.load_str(&content)?;
        info!(path = %path.display(), applied, "loaded parameter file");
        Ok(config)
    }

    /// Apply `key value` lines to this configuration.
    ///
    /// Returns how many lines set a known parameter.
    pub fn load_str(&mut self, content: &str) -> Result<usize> {
        let mut applied = 0;
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or_default();
            let value = parts.next().map(str::trim).unwrap_or_default();
            if value.is_empty() {
                return Err(DiffractError::Config(format!(
                    "line {}: parameter '{}' has no value",
                    lineno + 1,
                    key
                )));
            }
            match self.set_parameter(key, value) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    return Err(DiffractError::Config(format!("line {}: {}", lineno + 1, e)));
                }
            }
        }
        debug!(applied, "applied parameter lines");
        Ok(applied)
    }

    /// Render every group as `key value` lines, each group under a `# [group]` header.
    pub fn to_file_string(&self) -> String {
        let mut out = String::new();
        let mut current = "";
        for (group, key, value) in self.parameters() {
            if group != current {
                if !current.is_empty() {
                    out.push('\n');
                }
                let _ = writeln!(out, "# [{}]", group);
                current = group;
            }
            let _ = writeln!(out, "{} {}", key, value);
        }
        out
    }

    /// Write the parameter file.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_file_string()).map_err(|e| DiffractError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_str_skips_comments_and_unknown_keys() {
        let mut config = ReductionConfig::default();
        let applied = config
            .load_str("# comment\n\nthreshold 95\nlegacy_key 3\nfriedel False\n")
            .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(config.finder.threshold, 95.0);
        assert!(!config.merging.friedel);
    }

    #[test]
    fn test_load_str_names_bad_line() {
        let mut config = ReductionConfig::default();
        let err = config.load_str("threshold 95\nn_batches lots\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_value_is_error() {
        let mut config = ReductionConfig::default();
        assert!(config.load_str("threshold\n").is_err());
    }

    #[test]
    fn test_file_string_reloads_to_same_config() {
        let mut config = ReductionConfig::default();
        config.set_parameter("n_batches", "25").unwrap();
        config.set_parameter("space_group", "P_1_21_1").unwrap();

        let mut reloaded = ReductionConfig::default();
        reloaded.load_str(&config.to_file_string()).unwrap();
        assert_eq!(reloaded, config);
    }
}
