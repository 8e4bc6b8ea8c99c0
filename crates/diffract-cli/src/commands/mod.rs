//! CLI command implementations.

pub mod params;
pub mod run;
pub mod status;
