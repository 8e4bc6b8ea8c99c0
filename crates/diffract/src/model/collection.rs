//! Named, typed peak collections.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::peak::Peak;

/// What produced a collection, and therefore which stages may consume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Found,
    Filtered,
    Indexing,
    Predicted,
    Merged,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Found => "found",
            CollectionKind::Filtered => "filtered",
            CollectionKind::Indexing => "indexing",
            CollectionKind::Predicted => "predicted",
            CollectionKind::Merged => "merged",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named set of peaks registered in an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakCollection {
    pub name: String,
    pub kind: CollectionKind,
    pub peaks: Vec<Peak>,
    /// Collection whose shape model shapes these peaks (set on predictions).
    #[serde(default)]
    pub shape_source: Option<String>,
}

impl PeakCollection {
    pub fn new(name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            peaks: Vec::new(),
            shape_source: None,
        }
    }

    pub fn with_peaks(mut self, peaks: Vec<Peak>) -> Self {
        self.peaks = peaks;
        self
    }

    pub fn with_shape_source(mut self, source: impl Into<String>) -> Self {
        self.shape_source = Some(source.into());
        self
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Number of peaks with a usable shape and intensity.
    pub fn number_valid(&self) -> usize {
        self.peaks.iter().filter(|p| p.is_valid()).count()
    }

    /// Number of peaks flagged by the last filter pass.
    pub fn number_caught(&self) -> usize {
        self.peaks.iter().filter(|p| p.caught_by_filter).count()
    }

    /// Peaks flagged by the last filter pass.
    pub fn caught_peaks(&self) -> impl Iterator<Item = &Peak> {
        self.peaks.iter().filter(|p| p.caught_by_filter)
    }

    /// Number of peaks carrying a Miller index.
    pub fn number_indexed(&self) -> usize {
        self.peaks.iter().filter(|p| p.hkl.is_some()).count()
    }

    /// Tag of the unit cell assigned to this collection, if any peak carries one.
    pub fn assigned_cell(&self) -> Option<&str> {
        self.peaks.iter().find_map(|p| p.cell.as_deref())
    }

    pub fn has_assigned_cell(&self) -> bool {
        self.assigned_cell().is_some()
    }
}
