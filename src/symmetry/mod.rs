//! Abelian point groups and the irreducible-representation algebra used to block tensors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::transform::BacktransformError;


// ================
// Enum definitions
// ================

/// Enumerated type for the Abelian point groups (D2h and its subgroups) in which orbital
/// symmetry is resolved.
///
/// Irreducible representations are numbered in Cotton order so that the direct product of two
/// irreps is given by the bitwise exclusive-or of their indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointGroup {
    C1,
    Ci,
    C2,
    Cs,
    D2,
    C2v,
    C2h,
    D2h,
}

impl PointGroup {
    /// Returns the number of irreducible representations of the group.
    pub fn n_irreps(&self) -> usize {
        match self {
            PointGroup::C1 => 1,
            PointGroup::Ci | PointGroup::C2 | PointGroup::Cs => 2,
            PointGroup::D2 | PointGroup::C2v | PointGroup::C2h => 4,
            PointGroup::D2h => 8,
        }
    }

    /// Returns the Mulliken labels of the irreducible representations in Cotton order.
    pub fn irrep_labels(&self) -> &'static [&'static str] {
        match self {
            PointGroup::C1 => &["A"],
            PointGroup::Ci => &["Ag", "Au"],
            PointGroup::C2 => &["A", "B"],
            PointGroup::Cs => &["A'", "A\""],
            PointGroup::D2 => &["A", "B1", "B2", "B3"],
            PointGroup::C2v => &["A1", "A2", "B1", "B2"],
            PointGroup::C2h => &["Ag", "Bg", "Au", "Bu"],
            PointGroup::D2h => &["Ag", "B1g", "B2g", "B3g", "Au", "B1u", "B2u", "B3u"],
        }
    }

    /// Returns the label of an irrep.
    ///
    /// # Arguments
    ///
    /// * `irrep` - The Cotton-ordered index of the irrep.
    ///
    /// # Errors
    ///
    /// Errors if `irrep` does not index an irrep of this group.
    pub fn irrep_label(&self, irrep: usize) -> Result<&'static str, BacktransformError> {
        self.irrep_labels().get(irrep).copied().ok_or_else(|| {
            BacktransformError::DimensionMismatch(format!(
                "Irrep index {irrep} is out of range for point group {self} with {} irreps",
                self.n_irreps()
            ))
        })
    }

    /// Returns the index of the totally symmetric irrep.
    pub fn totally_symmetric(&self) -> usize {
        0
    }
}

/// Returns the direct product of two irreps of an Abelian point group.
#[inline]
pub fn irrep_product(a: usize, b: usize) -> usize {
    a ^ b
}

impl fmt::Display for PointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PointGroup::C1 => "C1",
            PointGroup::Ci => "Ci",
            PointGroup::C2 => "C2",
            PointGroup::Cs => "Cs",
            PointGroup::D2 => "D2",
            PointGroup::C2v => "C2v",
            PointGroup::C2h => "C2h",
            PointGroup::D2h => "D2h",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PointGroup {
    type Err = BacktransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "c1" => Ok(PointGroup::C1),
            "ci" => Ok(PointGroup::Ci),
            "c2" => Ok(PointGroup::C2),
            "cs" => Ok(PointGroup::Cs),
            "d2" => Ok(PointGroup::D2),
            "c2v" => Ok(PointGroup::C2v),
            "c2h" => Ok(PointGroup::C2h),
            "d2h" => Ok(PointGroup::D2h),
            _ => Err(BacktransformError::Configuration(format!(
                "Unsupported point group `{s}`: only D2h and its subgroups are available"
            ))),
        }
    }
}
