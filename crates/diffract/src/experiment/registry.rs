//! Registry of named artifacts produced by the pipeline stages.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ReductionConfig;
use crate::error::{DiffractError, Result};
use crate::model::{
    CellProvenance, Dataset, PeakCollection, QualityReport, RefinementBatch, ShapeModel, UnitCell,
};

use super::persistence::ARCHIVE_VERSION;

/// Tag of the user-supplied reference cell.
pub const REFERENCE_CELL: &str = "reference";

/// Tag of the cell accepted by autoindexing.
pub const ACCEPTED_CELL: &str = "accepted";

/// One scientific experiment and everything the pipeline derived from it.
///
/// Collections keep the kind they were first registered with; re-registering
/// a name replaces the entry in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    #[serde(default)]
    pub format_version: u32,
    pub config: ReductionConfig,
    pub(super) datasets: IndexMap<String, Dataset>,
    /// SHA-256 of each dataset's frame list at registration.
    #[serde(default)]
    pub(super) fingerprints: IndexMap<String, String>,
    pub(super) collections: IndexMap<String, PeakCollection>,
    pub(super) cells: IndexMap<String, UnitCell>,
    #[serde(default)]
    pub(super) shape_models: IndexMap<String, ShapeModel>,
    #[serde(default)]
    pub(super) batches: Vec<RefinementBatch>,
    #[serde(default)]
    pub(super) quality: Option<QualityReport>,
    #[serde(default)]
    pub(super) metadata: IndexMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create an empty experiment. The reference cell comes from `config.cell`.
    pub fn new(name: impl Into<String>, config: ReductionConfig) -> Self {
        let now = Utc::now();
        let mut cells = IndexMap::new();
        cells.insert(REFERENCE_CELL.to_string(), config.cell.reference_cell());
        Self {
            name: name.into(),
            format_version: ARCHIVE_VERSION,
            config,
            datasets: IndexMap::new(),
            fingerprints: IndexMap::new(),
            collections: IndexMap::new(),
            cells,
            shape_models: IndexMap::new(),
            batches: Vec::new(),
            quality: None,
            metadata: IndexMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // ---- datasets ----

    /// Register a finalized dataset under its own name.
    pub fn add_dataset(&mut self, dataset: Dataset) -> Result<()> {
        if dataset.n_frames() == 0 {
            return Err(DiffractError::Dataset(format!(
                "dataset '{}' has no frames",
                dataset.name
            )));
        }
        if self.datasets.contains_key(&dataset.name) {
            return Err(DiffractError::Dataset(format!(
                "dataset '{}' is already registered",
                dataset.name
            )));
        }
        info!(dataset = %dataset.name, frames = dataset.n_frames(), "registered dataset");
        self.fingerprints
            .insert(dataset.name.clone(), dataset.fingerprint());
        self.datasets.insert(dataset.name.clone(), dataset);
        self.touch();
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| DiffractError::DatasetNotFound(name.to_string()))
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }

    // ---- peak collections ----

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Create or replace a collection under its own name.
    ///
    /// Replacing an existing entry with a different kind is rejected and
    /// leaves the registry unchanged.
    pub fn register_collection(&mut self, collection: PeakCollection) -> Result<()> {
        if let Some(existing) = self.collections.get(&collection.name) {
            if existing.kind != collection.kind {
                return Err(DiffractError::InvalidCollectionKind {
                    collection: collection.name,
                    kind: collection.kind.to_string(),
                    stage: format!("registry (registered as {})", existing.kind),
                });
            }
            debug!(collection = %collection.name, peaks = collection.len(), "replacing collection");
        } else {
            debug!(collection = %collection.name, kind = %collection.kind, peaks = collection.len(), "registering collection");
        }
        self.collections.insert(collection.name.clone(), collection);
        self.touch();
        Ok(())
    }

    pub fn get_collection(&self, name: &str) -> Result<&PeakCollection> {
        self.collections
            .get(name)
            .ok_or_else(|| DiffractError::CollectionNotFound(name.to_string()))
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> Result<&mut PeakCollection> {
        self.updated_at = Utc::now();
        self.collections
            .get_mut(name)
            .ok_or_else(|| DiffractError::CollectionNotFound(name.to_string()))
    }

    /// Copy `source` to `dest`, keeping its kind.
    pub fn clone_collection(&mut self, source: &str, dest: &str) -> Result<()> {
        let mut copy = self.get_collection(source)?.clone();
        copy.name = dest.to_string();
        self.register_collection(copy)
    }

    pub fn remove_collection(&mut self, name: &str) -> Result<PeakCollection> {
        let removed = self
            .collections
            .shift_remove(name)
            .ok_or_else(|| DiffractError::CollectionNotFound(name.to_string()))?;
        self.shape_models.shift_remove(name);
        self.touch();
        Ok(removed)
    }

    /// Collection names in registration order.
    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    pub fn collections(&self) -> impl Iterator<Item = &PeakCollection> {
        self.collections.values()
    }

    // ---- unit cells ----

    pub fn set_reference_cell(&mut self, cell: UnitCell) {
        let cell = cell.with_provenance(CellProvenance::Reference);
        self.cells.insert(REFERENCE_CELL.to_string(), cell);
        self.touch();
    }

    pub fn reference_cell(&self) -> Result<&UnitCell> {
        self.cell(REFERENCE_CELL)
    }

    /// Replace the accepted cell. There is only ever one.
    pub fn set_accepted_cell(&mut self, cell: UnitCell) {
        let cell = cell.with_provenance(CellProvenance::Accepted);
        info!(cell = %cell, "accepted unit cell");
        self.cells.insert(ACCEPTED_CELL.to_string(), cell);
        self.touch();
    }

    pub fn accepted_cell(&self) -> Option<&UnitCell> {
        self.cells.get(ACCEPTED_CELL)
    }

    pub fn cell(&self, tag: &str) -> Result<&UnitCell> {
        self.cells
            .get(tag)
            .ok_or_else(|| DiffractError::CellNotFound(tag.to_string()))
    }

    pub fn cell_tags(&self) -> Vec<&str> {
        self.cells.keys().map(String::as_str).collect()
    }

    /// Tag every peak of `collection` with `tag` and index it against that cell.
    ///
    /// Peaks whose q vector is not within `indexing_tol` of a lattice point keep
    /// the tag but get no Miller index. Returns the number indexed.
    pub fn assign_unit_cell(&mut self, collection: &str, tag: &str) -> Result<usize> {
        let cell = self.cell(tag)?.clone();
        let tolerance = self.config.autoindexer.indexing_tol;
        let target = self.collection_mut(collection)?;
        let mut indexed = 0;
        for peak in &mut target.peaks {
            peak.cell = Some(tag.to_string());
            peak.hkl = cell.index(peak.q, tolerance);
            if peak.hkl.is_some() {
                indexed += 1;
            }
        }
        debug!(collection, cell = tag, indexed, total = target.len(), "assigned unit cell");
        Ok(indexed)
    }

    /// Every cell tag carried by a peak must name a registered cell.
    pub fn check_peak_collections(&self) -> Result<()> {
        for collection in self.collections.values() {
            for peak in &collection.peaks {
                if let Some(tag) = &peak.cell {
                    if !self.cells.contains_key(tag) {
                        return Err(DiffractError::Validation(format!(
                            "collection '{}' references unknown unit cell '{}'",
                            collection.name, tag
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // ---- shape models, batches, quality ----

    pub fn set_shape_model(&mut self, collection: &str, model: ShapeModel) {
        self.shape_models.insert(collection.to_string(), model);
        self.touch();
    }

    pub fn shape_model(&self, collection: &str) -> Option<&ShapeModel> {
        self.shape_models.get(collection)
    }

    pub fn set_batches(&mut self, batches: Vec<RefinementBatch>) {
        self.batches = batches;
        self.touch();
    }

    pub fn batches(&self) -> &[RefinementBatch] {
        &self.batches
    }

    pub fn set_quality(&mut self, report: QualityReport) {
        self.quality = Some(report);
        self.touch();
    }

    pub fn quality(&self) -> Option<&QualityReport> {
        self.quality.as_ref()
    }

    // ---- metadata ----

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl ToString) {
        self.metadata.insert(key.into(), value.to_string());
    }

    pub fn metadata(&self) -> &IndexMap<String, String> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorParams;
    use crate::model::{
        CollectionKind, DatasetBuilder, DetectorPosition, MillerIndex, Peak, PeakShape,
    };

    fn experiment() -> Experiment {
        Experiment::new("test", ReductionConfig::default())
    }

    fn indexed_peaks(cell: &UnitCell) -> Vec<Peak> {
        [(1, 0, 0), (1, 1, 1), (0, 2, 3)]
            .into_iter()
            .map(|(h, k, l)| {
                Peak::new(
                    DetectorPosition::new(0.0, 0.0, 0.0),
                    PeakShape::new(1.0, 1.0, 1.0),
                    cell.q_vector(&MillerIndex::new(h, k, l)),
                )
            })
            .collect()
    }

    #[test]
    fn test_dataset_name_must_be_unique() {
        let mut exp = experiment();
        let params = DetectorParams::default();
        let ds = DatasetBuilder::new("scan", &params).with_frames(2).finish().unwrap();
        exp.add_dataset(ds.clone()).unwrap();
        assert!(matches!(exp.add_dataset(ds), Err(DiffractError::Dataset(_))));
        assert_eq!(exp.dataset_names(), ["scan"]);
    }

    #[test]
    fn test_collection_kind_is_fixed() {
        let mut exp = experiment();
        exp.register_collection(PeakCollection::new("found", CollectionKind::Found))
            .unwrap();
        let err = exp
            .register_collection(PeakCollection::new("found", CollectionKind::Predicted))
            .unwrap_err();
        assert!(matches!(err, DiffractError::InvalidCollectionKind { .. }));
        assert_eq!(exp.get_collection("found").unwrap().kind, CollectionKind::Found);
    }

    #[test]
    fn test_missing_collection() {
        let exp = experiment();
        assert!(!exp.has_collection("found"));
        assert!(matches!(
            exp.get_collection("found"),
            Err(DiffractError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_clone_and_remove() {
        let mut exp = experiment();
        exp.register_collection(PeakCollection::new("found", CollectionKind::Found))
            .unwrap();
        exp.clone_collection("found", "copy").unwrap();
        assert_eq!(exp.collection_names(), ["found", "copy"]);
        assert_eq!(exp.get_collection("copy").unwrap().kind, CollectionKind::Found);
        exp.remove_collection("found").unwrap();
        assert_eq!(exp.collection_names(), ["copy"]);
    }

    #[test]
    fn test_accepted_cell_is_single_slot() {
        let mut exp = experiment();
        assert!(exp.accepted_cell().is_none());
        let first = UnitCell::new([10.0, 10.0, 10.0], [90.0; 3], "P 1");
        let second = UnitCell::new([11.0, 10.0, 10.0], [90.0; 3], "P 1");
        exp.set_accepted_cell(first);
        exp.set_accepted_cell(second.clone());
        let accepted = exp.accepted_cell().unwrap();
        assert_eq!(accepted.lengths, second.lengths);
        assert_eq!(accepted.provenance, CellProvenance::Accepted);
        assert_eq!(exp.cell_tags(), [REFERENCE_CELL, ACCEPTED_CELL]);
    }

    #[test]
    fn test_assign_unit_cell_indexes_peaks() {
        let mut exp = experiment();
        let cell = exp.reference_cell().unwrap().clone();
        let mut peaks = indexed_peaks(&cell);
        peaks[2].q[0] += 0.4 / cell.lengths[0];
        exp.register_collection(
            PeakCollection::new("found", CollectionKind::Found).with_peaks(peaks),
        )
        .unwrap();

        let indexed = exp.assign_unit_cell("found", REFERENCE_CELL).unwrap();
        assert_eq!(indexed, 2);
        let found = exp.get_collection("found").unwrap();
        assert_eq!(found.assigned_cell(), Some(REFERENCE_CELL));
        assert_eq!(found.peaks[1].hkl, Some(MillerIndex::new(1, 1, 1)));
        assert!(exp.check_peak_collections().is_ok());
    }

    #[test]
    fn test_check_peak_collections_flags_unknown_tag() {
        let mut exp = experiment();
        let cell = exp.reference_cell().unwrap().clone();
        let mut peaks = indexed_peaks(&cell);
        peaks[0].cell = Some("batch-7".to_string());
        exp.register_collection(
            PeakCollection::new("found", CollectionKind::Found).with_peaks(peaks),
        )
        .unwrap();
        assert!(matches!(
            exp.check_peak_collections(),
            Err(DiffractError::Validation(_))
        ));
    }
}
