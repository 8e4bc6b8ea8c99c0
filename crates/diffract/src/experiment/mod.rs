//! The experiment: root aggregate owning datasets and the artifact registry.

mod metadata;
mod persistence;
mod registry;

pub use persistence::{ARCHIVE_EXTENSION, ARCHIVE_VERSION, archive_path};
pub use registry::{ACCEPTED_CELL, Experiment, REFERENCE_CELL};
