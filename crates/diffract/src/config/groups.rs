//! Parameter groups, one per pipeline stage.

use serde::{Deserialize, Serialize};

use super::value::{ParamType, ParamValue};
use super::ParameterGroup;
use crate::error::Result;
use crate::model::{CellProvenance, UnitCell};

/// Declare a parameter group: the struct, its defaults and its flat key/value view.
macro_rules! parameter_group {
    (
        $(#[$meta:meta])*
        $name:ident, $group:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty = $default:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self { $( $field: $default.into(), )* }
            }
        }

        impl ParameterGroup for $name {
            fn group_name(&self) -> &'static str {
                $group
            }

            fn entries(&self) -> Vec<(&'static str, ParamValue)> {
                vec![ $( (stringify!($field), self.$field.clone().into_param()), )* ]
            }

            fn get(&self, key: &str) -> Option<ParamValue> {
                match key {
                    $( stringify!($field) => Some(self.$field.clone().into_param()), )*
                    _ => None,
                }
            }

            fn assign(&mut self, key: &str, value: ParamValue) -> Result<bool> {
                match key {
                    $(
                        stringify!($field) => {
                            self.$field = <$ty as ParamType>::from_param(key, value)?;
                            Ok(true)
                        }
                    )*
                    _ => Ok(false),
                }
            }
        }
    };
}

parameter_group! {
    /// Instrument description used when building datasets.
    DetectorParams, "detector" {
        detector: String = "BioDiff2500",
        /// Incident wavelength in Å.
        wavelength: f64 = 2.67,
        /// Rotation increment per frame in degrees.
        delta_omega: f64 = 0.3,
        row_major: bool = true,
        swap_endian: bool = true,
        bpp: usize = 2usize,
        image_rows: usize = 900usize,
        image_cols: usize = 2500usize,
    }
}

parameter_group! {
    /// Reference unit cell the autoindexer is asked to reproduce.
    CellParams, "cell" {
        a: f64 = 24.5,
        b: f64 = 28.7,
        c: f64 = 37.7,
        alpha: f64 = 90.0,
        beta: f64 = 90.0,
        gamma: f64 = 90.0,
        /// Hermann–Mauguin symbol with `_` separating the axes.
        space_group: String = "P_21_21_21",
    }
}

impl CellParams {
    /// Space-group symbol with the file-form underscores replaced by spaces.
    pub fn space_group_symbol(&self) -> String {
        self.space_group.replace('_', " ")
    }

    /// The reference cell described by these parameters.
    pub fn reference_cell(&self) -> UnitCell {
        UnitCell::new(
            [self.a, self.b, self.c],
            [self.alpha, self.beta, self.gamma],
            self.space_group_symbol(),
        )
        .with_provenance(CellProvenance::Reference)
    }
}

parameter_group! {
    /// Peak search.
    FinderParams, "finder" {
        min_size: usize = 30usize,
        max_size: usize = 10000usize,
        peak_end: f64 = 1.0,
        threshold: f64 = 80.0,
        convolver: String = "annular",
    }
}

parameter_group! {
    /// Intensity integration.
    IntegrationParams, "integration" {
        integrator: String = "pixel_sum",
        peak_area: f64 = 3.0,
        background_lower: f64 = 3.0,
        background_upper: f64 = 6.0,
    }
}

parameter_group! {
    /// Peak filter. Each criterion can be switched off independently.
    FilterParams, "filter" {
        filter_strength: bool = true,
        /// Minimum I/σ.
        min_strength: f64 = 1.0,
        max_strength: f64 = 1.0e6,
        filter_d_range: bool = true,
        min_d_range: f64 = 1.5,
        max_d_range: f64 = 50.0,
        filter_frames: bool = false,
        frame_min: f64 = 0.0,
        frame_max: f64 = 0.0,
        /// Remove systematically absent reflections (needs an assigned cell).
        extinct: bool = false,
    }
}

parameter_group! {
    /// Unit-cell search and the adaptive frame window around it.
    AutoindexParams, "autoindexer" {
        max_dim: f64 = 200.0,
        n_solutions: usize = 10usize,
        n_vertices: usize = 10000usize,
        n_subdiv: usize = 30usize,
        indexing_tol: f64 = 0.2,
        min_vol: f64 = 100.0,
        /// Å tolerance on a, b, c when comparing against the reference cell.
        length_tol: f64 = 1.5,
        /// Degree tolerance on α, β, γ when comparing against the reference cell.
        angle_tol: f64 = 0.1,
        min_autoindex_frames: usize = 10usize,
        max_autoindex_frames: usize = 20usize,
        autoindex_step: usize = 1usize,
        autoindex_start: usize = 0usize,
        /// `first` or `best`.
        accept_policy: String = "first",
    }
}

parameter_group! {
    /// Shape-model construction.
    ShapeModelParams, "shapelib" {
        kabsch: bool = true,
        nx: usize = 20usize,
        ny: usize = 20usize,
        nz: usize = 10usize,
        shape_peak_end: f64 = 3.0,
        shapelib_d_min: f64 = 1.5,
        shapelib_d_max: f64 = 50.0,
        shape_min_strength: f64 = 1.0,
        shape_max_strength: f64 = 1.0e6,
        bkg_begin: f64 = 3.0,
        bkg_end: f64 = 6.0,
    }
}

parameter_group! {
    /// Reflection prediction and shape interpolation.
    PredictionParams, "prediction" {
        prediction_d_min: f64 = 1.5,
        prediction_d_max: f64 = 50.0,
        /// Neighbour search radius in pixels.
        radius: f64 = 400.0,
        /// Neighbour search range in frames.
        frames: f64 = 10.0,
        neighbours: usize = 10usize,
        prediction_bkg_begin: f64 = 3.0,
        prediction_bkg_end: f64 = 6.0,
        prediction_scale: f64 = 3.0,
        fit_center: bool = true,
        fit_covariance: bool = true,
        /// `none`, `inverse_distance` or `intensity`.
        interpolation: String = "inverse_distance",
    }
}

parameter_group! {
    /// Batched geometry refinement.
    RefinerParams, "refiner" {
        n_batches: usize = 1usize,
        refine_ub: bool = true,
        refine_ki: bool = true,
        refine_sample_position: bool = true,
        refine_sample_orientation: bool = true,
        refine_detector_offset: bool = true,
        /// `real_space` or `q_space`.
        residual_type: String = "real_space",
        refine_cycles: usize = 1usize,
        max_iterations: usize = 200usize,
        min_peaks_per_batch: usize = 20usize,
    }
}

parameter_group! {
    /// Merging and quality statistics.
    MergeParams, "merging" {
        merging_d_min: f64 = 1.5,
        merging_d_max: f64 = 50.0,
        n_shells: usize = 10usize,
        friedel: bool = true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_group_symbol_uses_spaces() {
        let cell = CellParams::default();
        assert_eq!(cell.space_group_symbol(), "P 21 21 21");
        assert_eq!(cell.reference_cell().space_group, "P 21 21 21");
    }

    #[test]
    fn test_assign_unknown_key_is_not_an_error() {
        let mut merge = MergeParams::default();
        assert!(!merge.assign("threshold", ParamValue::Float(1.0)).unwrap());
        assert_eq!(merge, MergeParams::default());
    }

    #[test]
    fn test_entries_follow_declaration_order() {
        let keys: Vec<_> = MergeParams::default()
            .entries()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["merging_d_min", "merging_d_max", "n_shells", "friedel"]);
    }
}
