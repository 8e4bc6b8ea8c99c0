//! Reduction parameters.
//!
//! Parameters are grouped per stage into typed structs. Each experiment owns one
//! [`ReductionConfig`]; nothing is shared between experiments. The flat
//! `key value` view used by parameter files and CLI overrides goes through
//! [`ReductionConfig::set_parameter`], which finds the group owning the key and
//! coerces the raw string to the type of the current value.
//!
//! # Example
//!
//! ```
//! use diffract::config::{ParamValue, ReductionConfig};
//!
//! let mut config = ReductionConfig::default();
//! assert!(config.set_parameter("threshold", "120").unwrap());
//! assert_eq!(config.finder.threshold, 120.0);
//!
//! // Unknown keys are ignored so that older parameter files keep loading.
//! assert!(!config.set_parameter("no_such_key", "1").unwrap());
//! assert_eq!(config.get_parameter("friedel"), Some(ParamValue::Bool(true)));
//! ```

mod file;
mod groups;
mod value;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DiffractError, Result};

pub use groups::{
    AutoindexParams, CellParams, DetectorParams, FilterParams, FinderParams,
    IntegrationParams, MergeParams, PredictionParams, RefinerParams, ShapeModelParams,
};
pub use value::{ParamType, ParamValue};

/// A named group of parameters with a static schema.
pub trait ParameterGroup {
    /// Name of the group (e.g. `"finder"`).
    fn group_name(&self) -> &'static str;

    /// All keys with their current values, in declaration order.
    fn entries(&self) -> Vec<(&'static str, ParamValue)>;

    /// Current value of a key owned by this group.
    fn get(&self, key: &str) -> Option<ParamValue>;

    /// Assign a value to a key. Returns `Ok(false)` if the key is not in this group.
    fn assign(&mut self, key: &str, value: ParamValue) -> Result<bool>;
}

/// Every parameter used by a reduction, one struct per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub detector: DetectorParams,
    pub cell: CellParams,
    pub finder: FinderParams,
    pub integration: IntegrationParams,
    pub filter: FilterParams,
    pub autoindexer: AutoindexParams,
    pub shapes: ShapeModelParams,
    pub prediction: PredictionParams,
    pub refiner: RefinerParams,
    pub merging: MergeParams,
}

impl ReductionConfig {
    /// Create a configuration holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> [&dyn ParameterGroup; 10] {
        [
            &self.detector,
            &self.cell,
            &self.finder,
            &self.integration,
            &self.filter,
            &self.autoindexer,
            &self.shapes,
            &self.prediction,
            &self.refiner,
            &self.merging,
        ]
    }

    fn groups_mut(&mut self) -> [&mut dyn ParameterGroup; 10] {
        [
            &mut self.detector,
            &mut self.cell,
            &mut self.finder,
            &mut self.integration,
            &mut self.filter,
            &mut self.autoindexer,
            &mut self.shapes,
            &mut self.prediction,
            &mut self.refiner,
            &mut self.merging,
        ]
    }

    /// Set one parameter from its string form.
    ///
    /// Returns `Ok(false)` if no group owns `key`; the configuration is untouched.
    /// A value that cannot be coerced to the parameter's type is an error.
    pub fn set_parameter(&mut self, key: &str, raw: &str) -> Result<bool> {
        for group in self.groups_mut() {
            if let Some(current) = group.get(key) {
                let value = current.coerce(key, raw)?;
                return group.assign(key, value);
            }
        }
        debug!(key, "ignoring unknown parameter");
        Ok(false)
    }

    /// Current value of a parameter, if any group owns the key.
    pub fn get_parameter(&self, key: &str) -> Option<ParamValue> {
        self.groups().iter().find_map(|g| g.get(key))
    }

    /// Name of the group owning `key`.
    pub fn group_of(&self, key: &str) -> Option<&'static str> {
        self.groups()
            .iter()
            .find(|g| g.get(key).is_some())
            .map(|g| g.group_name())
    }

    /// Flat view of all parameters as `(group, key, value)`.
    pub fn parameters(&self) -> Vec<(&'static str, &'static str, ParamValue)> {
        self.groups()
            .iter()
            .flat_map(|g| {
                let name = g.group_name();
                g.entries().into_iter().map(move |(k, v)| (name, k, v))
            })
            .collect()
    }

    /// Check cross-parameter constraints before a run.
    pub fn validate(&self) -> Result<()> {
        let ai = &self.autoindexer;
        if ai.autoindex_step == 0 {
            return Err(DiffractError::Config(
                "autoindex_step must be at least 1".to_string(),
            ));
        }
        if ai.min_autoindex_frames == 0 || ai.min_autoindex_frames >= ai.max_autoindex_frames {
            return Err(DiffractError::Config(format!(
                "autoindex window must satisfy 0 < min_autoindex_frames ({}) < max_autoindex_frames ({})",
                ai.min_autoindex_frames, ai.max_autoindex_frames
            )));
        }
        if self.refiner.n_batches == 0 {
            return Err(DiffractError::Config("n_batches must be at least 1".to_string()));
        }
        if self.merging.n_shells == 0 {
            return Err(DiffractError::Config("n_shells must be at least 1".to_string()));
        }
        check_range("merging_d_min", self.merging.merging_d_min, self.merging.merging_d_max)?;
        check_range(
            "prediction_d_min",
            self.prediction.prediction_d_min,
            self.prediction.prediction_d_max,
        )?;
        check_range("shapelib_d_min", self.shapes.shapelib_d_min, self.shapes.shapelib_d_max)?;
        if self.detector.wavelength <= 0.0 || self.detector.delta_omega <= 0.0 {
            return Err(DiffractError::Config(
                "wavelength and delta_omega must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_range(key: &str, min: f64, max: f64) -> Result<()> {
    if min <= 0.0 || min >= max {
        return Err(DiffractError::Config(format!(
            "{} must be positive and below its maximum ({} >= {})",
            key, min, max
        )));
    }
    Ok(())
}
