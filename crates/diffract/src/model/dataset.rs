//! Datasets: ordered detector frames plus instrument metadata.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DetectorParams;
use crate::error::{DiffractError, Result};

/// One detector image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub index: usize,
    /// Rotation angle at the start of the frame, in degrees.
    pub omega: f64,
    #[serde(default)]
    pub source: Option<PathBuf>,
}

/// Half-open frame interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: usize,
    pub end: usize,
}

impl FrameRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a continuous frame coordinate falls inside the range.
    pub fn contains(&self, frame: f64) -> bool {
        frame >= self.start as f64 && frame < self.end as f64
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A finalized, immutable sequence of frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub detector: String,
    pub wavelength: f64,
    pub delta_omega: f64,
    pub image_rows: usize,
    pub image_cols: usize,
    frames: Vec<FrameInfo>,
}

impl Dataset {
    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// The whole frame axis.
    pub fn frame_range(&self) -> FrameRange {
        FrameRange::new(0, self.frames.len())
    }

    /// Total rotation covered by the scan, in degrees.
    pub fn scan_width(&self) -> f64 {
        self.delta_omega * self.frames.len() as f64
    }

    /// SHA-256 over the frame list, used to detect a changed input on resume.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.detector.as_bytes());
        for frame in &self.frames {
            hasher.update(frame.index.to_le_bytes());
            hasher.update(format!("{:.6}", frame.omega).as_bytes());
            if let Some(source) = &frame.source {
                hasher.update(source.to_string_lossy().as_bytes());
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Builds a [`Dataset`] frame by frame.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    name: String,
    detector: String,
    wavelength: f64,
    delta_omega: f64,
    image_rows: usize,
    image_cols: usize,
    frames: Vec<FrameInfo>,
}

impl DatasetBuilder {
    pub fn new(name: impl Into<String>, params: &DetectorParams) -> Self {
        Self {
            name: name.into(),
            detector: params.detector.clone(),
            wavelength: params.wavelength,
            delta_omega: params.delta_omega,
            image_rows: params.image_rows,
            image_cols: params.image_cols,
            frames: Vec::new(),
        }
    }

    /// Append a frame read from `source`.
    pub fn add_frame(&mut self, source: Option<PathBuf>) -> &mut Self {
        let index = self.frames.len();
        self.frames.push(FrameInfo {
            index,
            omega: index as f64 * self.delta_omega,
            source,
        });
        self
    }

    /// Append `n` frames with no backing file.
    pub fn with_frames(mut self, n: usize) -> Self {
        for _ in 0..n {
            self.add_frame(None);
        }
        self
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Finalize. A dataset needs at least one frame.
    pub fn finish(self) -> Result<Dataset> {
        if self.frames.is_empty() {
            return Err(DiffractError::Dataset(format!(
                "dataset '{}' has no frames",
                self.name
            )));
        }
        Ok(Dataset {
            name: self.name,
            detector: self.detector,
            wavelength: self.wavelength,
            delta_omega: self.delta_omega,
            image_rows: self.image_rows,
            image_cols: self.image_cols,
            frames: self.frames,
        })
    }
}
