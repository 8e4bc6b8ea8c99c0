//! Space-group symbols: lattice centring, screw axes and Laue symmetry.
//!
//! Only the symmetry needed by filtering and merging is modelled: centring
//! and 2₁ screw-axis absences for triclinic, monoclinic and orthorhombic
//! groups. Glide planes are accepted in the symbol but do not add absences.

use std::fmt;

use crate::error::{DiffractError, Result};

use super::peak::MillerIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaueClass {
    /// -1
    Triclinic,
    /// 2/m, unique axis b
    Monoclinic,
    /// mmm
    Orthorhombic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Centring {
    P,
    A,
    B,
    C,
    I,
    F,
    R,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceGroup {
    symbol: String,
    centring: Centring,
    laue: LaueClass,
    /// 2₁ screw axis along a, b, c.
    screw: [bool; 3],
}

impl SpaceGroup {
    /// Parse a Hermann–Mauguin symbol such as `P 21 21 21` or `C 1 2 1`.
    ///
    /// Underscores are accepted as separators (`P_21_21_21`).
    pub fn parse(symbol: &str) -> Result<Self> {
        let normalized = symbol.replace('_', " ");
        let mut tokens = normalized.split_whitespace();
        let lattice = tokens.next().ok_or_else(|| {
            DiffractError::Config("empty space group symbol".to_string())
        })?;
        let centring = match lattice {
            "P" => Centring::P,
            "A" => Centring::A,
            "B" => Centring::B,
            "C" => Centring::C,
            "I" => Centring::I,
            "F" => Centring::F,
            "R" => Centring::R,
            other => {
                return Err(DiffractError::Config(format!(
                    "unknown lattice centring '{}' in space group '{}'",
                    other, symbol
                )));
            }
        };

        // Keep only the rotation part of tokens like "21/c".
        let axes: Vec<&str> = tokens
            .map(|t| t.split('/').next().unwrap_or(t))
            .collect();

        let (laue, screw) = match axes.as_slice() {
            [] => (LaueClass::Triclinic, [false; 3]),
            [only] if is_identity(only) => (LaueClass::Triclinic, [false; 3]),
            [only] => (LaueClass::Monoclinic, [false, *only == "21", false]),
            [x, y, z] if is_identity(x) && is_identity(y) && is_identity(z) => {
                (LaueClass::Triclinic, [false; 3])
            }
            [x, y, z] if is_identity(x) && is_identity(z) => {
                (LaueClass::Monoclinic, [false, *y == "21", false])
            }
            [x, y, z] => (
                LaueClass::Orthorhombic,
                [*x == "21", *y == "21", *z == "21"],
            ),
            _ => {
                return Err(DiffractError::Config(format!(
                    "unsupported space group '{}'",
                    symbol
                )));
            }
        };

        Ok(Self {
            symbol: normalized.split_whitespace().collect::<Vec<_>>().join(" "),
            centring,
            laue,
            screw,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn laue_class(&self) -> LaueClass {
        self.laue
    }

    /// True if the reflection is systematically absent.
    pub fn is_extinct(&self, hkl: &MillerIndex) -> bool {
        let MillerIndex { h, k, l } = *hkl;
        let centring_absent = match self.centring {
            Centring::P => false,
            Centring::A => (k + l) % 2 != 0,
            Centring::B => (h + l) % 2 != 0,
            Centring::C => (h + k) % 2 != 0,
            Centring::I => (h + k + l) % 2 != 0,
            Centring::F => (h + k) % 2 != 0 || (k + l) % 2 != 0 || (h + l) % 2 != 0,
            Centring::R => (-h + k + l).rem_euclid(3) != 0,
        };
        if centring_absent {
            return true;
        }
        let axial = [(h, k == 0 && l == 0), (k, h == 0 && l == 0), (l, h == 0 && k == 0)];
        axial
            .iter()
            .zip(self.screw.iter())
            .any(|(&(index, on_axis), &screw)| screw && on_axis && index % 2 != 0)
    }

    /// Fraction of `hkls` that are systematically absent. Zero for an empty list.
    pub fn fraction_extinct(&self, hkls: &[MillerIndex]) -> f64 {
        if hkls.is_empty() {
            return 0.0;
        }
        let extinct = hkls.iter().filter(|hkl| self.is_extinct(hkl)).count();
        extinct as f64 / hkls.len() as f64
    }

    /// Symmetry equivalents of a reflection, including itself.
    ///
    /// With `friedel` the inversion-related indices are included (Laue group),
    /// otherwise only the proper rotations of the point group.
    pub fn equivalents(&self, hkl: &MillerIndex, friedel: bool) -> Vec<MillerIndex> {
        let MillerIndex { h, k, l } = *hkl;
        let mut out = match self.laue {
            LaueClass::Triclinic => vec![*hkl],
            LaueClass::Monoclinic => vec![*hkl, MillerIndex::new(-h, k, -l)],
            LaueClass::Orthorhombic => vec![
                *hkl,
                MillerIndex::new(-h, -k, l),
                MillerIndex::new(-h, k, -l),
                MillerIndex::new(h, -k, -l),
            ],
        };
        if friedel {
            let inverted: Vec<_> = out.iter().map(MillerIndex::negated).collect();
            out.extend(inverted);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Representative of the equivalence class used as a merge key.
    pub fn unique_index(&self, hkl: &MillerIndex, friedel: bool) -> MillerIndex {
        self.equivalents(hkl, friedel)
            .into_iter()
            .max()
            .unwrap_or(*hkl)
    }
}

fn is_identity(token: &str) -> bool {
    token == "1" || token == "-1"
}

impl fmt::Display for SpaceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}
