//! Unit cells.
//!
//! Lengths are in Å and angles in degrees. The direct basis follows the
//! Busing–Levy convention (a along x, b in the xy plane); reciprocal vectors
//! carry no 2π factor, so `d = 1/|q|` and `h = q · a`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::peak::MillerIndex;
use super::space_group::SpaceGroup;
use crate::error::Result;

type Mat3 = [[f64; 3]; 3];

/// Where a cell came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellProvenance {
    /// User-supplied expectation the autoindexer must match.
    Reference,
    /// Selected from autoindexing; exactly one per experiment.
    Accepted,
    /// Per-batch copy of the accepted cell after refinement.
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub lengths: [f64; 3],
    pub angles: [f64; 3],
    pub space_group: String,
    pub provenance: CellProvenance,
}

impl UnitCell {
    pub fn new(lengths: [f64; 3], angles: [f64; 3], space_group: impl Into<String>) -> Self {
        Self {
            lengths,
            angles,
            space_group: space_group.into(),
            provenance: CellProvenance::Accepted,
        }
    }

    pub fn with_provenance(mut self, provenance: CellProvenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_space_group(mut self, space_group: impl Into<String>) -> Self {
        self.space_group = space_group.into();
        self
    }

    /// Parsed space group.
    pub fn space_group(&self) -> Result<SpaceGroup> {
        SpaceGroup::parse(&self.space_group)
    }

    /// Rows are the direct lattice vectors a, b, c.
    pub fn direct_basis(&self) -> Mat3 {
        let [a, b, c] = self.lengths;
        let [alpha, beta, gamma] = self.angles.map(f64::to_radians);
        let (ca, cb, cg) = (alpha.cos(), beta.cos(), gamma.cos());
        let sg = gamma.sin();
        let cy = (ca - cb * cg) / sg;
        let cz = (1.0 - cb * cb - cy * cy).max(0.0).sqrt();
        [
            [a, 0.0, 0.0],
            [b * cg, b * sg, 0.0],
            [c * cb, c * cy, c * cz],
        ]
    }

    pub fn volume(&self) -> f64 {
        let [a, b, c] = self.direct_basis();
        dot(a, cross(b, c)).abs()
    }

    /// Rows are the reciprocal vectors a*, b*, c*.
    pub fn reciprocal_basis(&self) -> Mat3 {
        let [a, b, c] = self.direct_basis();
        let v = dot(a, cross(b, c));
        [
            scale(cross(b, c), 1.0 / v),
            scale(cross(c, a), 1.0 / v),
            scale(cross(a, b), 1.0 / v),
        ]
    }

    /// Reciprocal-space vector of a reflection.
    pub fn q_vector(&self, hkl: &MillerIndex) -> [f64; 3] {
        let [ra, rb, rc] = self.reciprocal_basis();
        let [h, k, l] = hkl.as_array().map(f64::from);
        [
            h * ra[0] + k * rb[0] + l * rc[0],
            h * ra[1] + k * rb[1] + l * rc[1],
            h * ra[2] + k * rb[2] + l * rc[2],
        ]
    }

    pub fn d_spacing(&self, hkl: &MillerIndex) -> f64 {
        1.0 / norm(self.q_vector(hkl))
    }

    /// Fractional Miller index of a q vector.
    pub fn fractional_index(&self, q: [f64; 3]) -> [f64; 3] {
        self.direct_basis().map(|row| dot(row, q))
    }

    /// Integer Miller index of `q` if every component lies within `tolerance` of an integer.
    pub fn index(&self, q: [f64; 3], tolerance: f64) -> Option<MillerIndex> {
        let frac = self.fractional_index(q);
        let rounded = frac.map(f64::round);
        let close = frac
            .iter()
            .zip(rounded.iter())
            .all(|(f, r)| (f - r).abs() < tolerance);
        let hkl = MillerIndex::new(rounded[0] as i32, rounded[1] as i32, rounded[2] as i32);
        (close && !hkl.is_origin()).then_some(hkl)
    }

    /// Lengths within `length_tol` Å and angles within `angle_tol` degrees.
    pub fn is_similar(&self, other: &UnitCell, length_tol: f64, angle_tol: f64) -> bool {
        let lengths = self
            .lengths
            .iter()
            .zip(other.lengths.iter())
            .all(|(a, b)| (a - b).abs() < length_tol);
        let angles = self
            .angles
            .iter()
            .zip(other.angles.iter())
            .all(|(a, b)| (a - b).abs() < angle_tol);
        lengths && angles
    }
}

impl fmt::Display for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.lengths;
        let [al, be, ga] = self.angles;
        write!(
            f,
            "{:.3} {:.3} {:.3} {:.2} {:.2} {:.2} {}",
            a, b, c, al, be, ga, self.space_group
        )
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    a.map(|v| v * s)
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orthorhombic() -> UnitCell {
        UnitCell::new([24.5, 28.7, 37.7], [90.0, 90.0, 90.0], "P 21 21 21")
    }

    #[test]
    fn test_orthorhombic_d_spacing() {
        let cell = orthorhombic();
        assert!((cell.d_spacing(&MillerIndex::new(1, 0, 0)) - 24.5).abs() < 1e-9);
        assert!((cell.d_spacing(&MillerIndex::new(0, 0, 2)) - 18.85).abs() < 1e-9);
        assert!((cell.volume() - 24.5 * 28.7 * 37.7).abs() < 1e-6);
    }

    #[test]
    fn test_index_recovers_hkl() {
        let cell = UnitCell::new([10.0, 12.0, 15.0], [90.0, 104.0, 90.0], "P 1 21 1");
        let hkl = MillerIndex::new(3, -2, 5);
        let q = cell.q_vector(&hkl);
        assert_eq!(cell.index(q, 0.1), Some(hkl));
    }

    #[test]
    fn test_index_rejects_off_lattice_q() {
        let cell = orthorhombic();
        let mut q = cell.q_vector(&MillerIndex::new(2, 1, 1));
        q[0] += 0.5 / 24.5;
        assert_eq!(cell.index(q, 0.2), None);
    }

    #[test]
    fn test_similarity_tolerances() {
        let a = orthorhombic();
        let mut b = orthorhombic();
        b.lengths[2] += 1.0;
        assert!(a.is_similar(&b, 1.5, 0.1));
        assert!(!a.is_similar(&b, 0.5, 0.1));
        b.angles[1] = 90.2;
        assert!(!a.is_similar(&b, 1.5, 0.1));
    }
}
