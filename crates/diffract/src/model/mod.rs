//! Data model for the reduction registry.

mod batch;
mod cell;
mod collection;
mod dataset;
mod peak;
mod quality;
mod shape;
mod space_group;

pub use batch::RefinementBatch;
pub use cell::{CellProvenance, UnitCell};
pub use collection::{CollectionKind, PeakCollection};
pub use dataset::{Dataset, DatasetBuilder, FrameInfo, FrameRange};
pub use peak::{DetectorPosition, Intensity, MillerIndex, Peak, PeakShape};
pub use quality::{QualityReport, QualityShell, ResolutionShells};
pub use shape::{Interpolation, ShapeModel, ShapeProfile};
pub use space_group::{LaueClass, SpaceGroup};
