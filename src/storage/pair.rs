//! Layouts of symmetry-adapted orbital pairs.
//!
//! A pair layout enumerates the ordered orbital pairs $`(p, q)`$ of one pair irrep $`h`$. Pairs
//! are grouped by the irrep $`g_p`$ of $`p`$ in Cotton order, $`q`$ belonging to
//! $`g_q = h \otimes g_p`$; within a group, $`p`$ is the major and $`q`$ the minor index.
//!
//! In triangular storage only the pairs with $`g_p > g_q`$, or $`g_p = g_q`$ and $`p \ge q`$, are
//! kept. A triangular entry holds the sum of both orderings of its pair, so that an
//! off-diagonal entry carries twice the weight of a diagonal one:
//!
//! ```math
//!     X_{(pq)} = X_{pq} + X_{qp} \quad (p \neq q), \qquad X_{(pp)} = X_{pp}.
//! ```
//!
//! Expanding into square storage halves the off-diagonal entries, which makes packing the exact
//! inverse of expanding.

use std::fmt;

use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::symmetry::irrep_product;
use crate::transform::BacktransformError;

#[cfg(test)]
#[path = "pair_tests.rs"]
mod pair_tests;

/// Enumerated type for the storage of pairs whose two legs run over the same orbitals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairStorage {
    /// Every ordered pair is stored.
    Square,

    /// Only one ordering of each pair is stored, holding the sum over both orderings.
    Triangular,
}

impl Default for PairStorage {
    fn default() -> Self {
        PairStorage::Triangular
    }
}

impl fmt::Display for PairStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairStorage::Square => write!(f, "square"),
            PairStorage::Triangular => write!(f, "triangular"),
        }
    }
}

/// Enumerated type for the two legs of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairLeg {
    First,
    Second,
}

/// Structure describing the storage order of the orbital pairs of one pair irrep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLayout {
    /// The irrep of the pairs.
    irrep: usize,

    /// The number of orbitals of each irrep on the first leg.
    first_dims: Vec<usize>,

    /// The number of orbitals of each irrep on the second leg.
    second_dims: Vec<usize>,

    /// Whether only one ordering of each pair is stored.
    triangular: bool,

    /// The offset of the group of pairs whose first orbital belongs to each irrep, or `None` if
    /// the group is not stored.
    group_offsets: Vec<Option<usize>>,

    /// The total number of stored pairs.
    len: usize,
}

impl PairLayout {
    /// Constructs the layout of the pairs of one irrep.
    ///
    /// Triangular storage is only used when `storage` asks for it and both legs run over the
    /// same orbitals.
    ///
    /// # Arguments
    ///
    /// * `irrep` - The irrep of the pairs.
    /// * `first_dims` - The number of orbitals of each irrep on the first leg.
    /// * `second_dims` - The number of orbitals of each irrep on the second leg.
    /// * `storage` - The requested pair storage.
    pub fn new(
        irrep: usize,
        first_dims: &[usize],
        second_dims: &[usize],
        storage: PairStorage,
    ) -> Result<Self, BacktransformError> {
        let n_irreps = first_dims.len();
        if second_dims.len() != n_irreps || irrep >= n_irreps.max(1) {
            return Err(BacktransformError::DimensionMismatch(format!(
                "Invalid pair layout of irrep {irrep}: legs with {} and {} irreps",
                first_dims.len(),
                second_dims.len()
            )));
        }
        let triangular = storage == PairStorage::Triangular && first_dims == second_dims;
        let mut group_offsets = vec![None; n_irreps];
        let mut len = 0;
        for gp in 0..n_irreps {
            let gq = irrep_product(irrep, gp);
            if gq >= n_irreps {
                continue;
            }
            let size = if triangular && gp == gq {
                first_dims[gp] * (first_dims[gp] + 1) / 2
            } else if triangular && gp < gq {
                continue;
            } else {
                first_dims[gp] * second_dims[gq]
            };
            group_offsets[gp] = Some(len);
            len += size;
        }
        Ok(Self {
            irrep,
            first_dims: first_dims.to_vec(),
            second_dims: second_dims.to_vec(),
            triangular,
            group_offsets,
            len,
        })
    }

    pub fn irrep(&self) -> usize {
        self.irrep
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_triangular(&self) -> bool {
        self.triangular
    }

    pub fn first_dims(&self) -> &[usize] {
        &self.first_dims
    }

    pub fn second_dims(&self) -> &[usize] {
        &self.second_dims
    }

    /// Returns the number of orbitals of each irrep on a leg.
    pub fn leg_dims(&self, leg: PairLeg) -> &[usize] {
        match leg {
            PairLeg::First => &self.first_dims,
            PairLeg::Second => &self.second_dims,
        }
    }

    /// Returns the offset of the group of pairs whose first orbital belongs to irrep `gp`, if that
    /// group is stored.
    pub fn group_offset(&self, gp: usize) -> Option<usize> {
        self.group_offsets.get(gp).copied().flatten()
    }

    /// Returns the storage position of the ordered pair $`(p, q)`$.
    ///
    /// # Arguments
    ///
    /// * `gp` - The irrep of $`p`$. The irrep of $`q`$ is implied by the pair irrep.
    /// * `p` - The index of $`p`$ within its irrep.
    /// * `q` - The index of $`q`$ within its irrep.
    ///
    /// # Returns
    ///
    /// The position of the pair, or of its canonical ordering in triangular storage, or `None`
    /// if the indices are out of range.
    pub fn position(&self, gp: usize, p: usize, q: usize) -> Option<usize> {
        let n_irreps = self.first_dims.len();
        if gp >= n_irreps {
            return None;
        }
        let gq = irrep_product(self.irrep, gp);
        if gq >= n_irreps || p >= self.first_dims[gp] || q >= self.second_dims[gq] {
            return None;
        }
        if self.triangular {
            if gp == gq {
                let (hi, lo) = if p >= q { (p, q) } else { (q, p) };
                Some(self.group_offset(gp)? + hi * (hi + 1) / 2 + lo)
            } else if gp > gq {
                Some(self.group_offset(gp)? + p * self.second_dims[gq] + q)
            } else {
                Some(self.group_offset(gq)? + q * self.second_dims[gp] + p)
            }
        } else {
            Some(self.group_offset(gp)? + p * self.second_dims[gq] + q)
        }
    }

    /// Returns the stored pairs in storage order as tuples $`(g_p, p, g_q, q)`$.
    pub fn pairs(&self) -> Vec<(usize, usize, usize, usize)> {
        let n_irreps = self.first_dims.len();
        (0..n_irreps)
            .filter(|gp| self.group_offset(*gp).is_some())
            .flat_map(|gp| {
                let gq = irrep_product(self.irrep, gp);
                let np = self.first_dims[gp];
                let nq = self.second_dims[gq];
                let diagonal = self.triangular && gp == gq;
                (0..np)
                    .flat_map(move |p| {
                        let q_max = if diagonal { p + 1 } else { nq };
                        (0..q_max).map(move |q| (gp, p, gq, q))
                    })
                    .collect_vec()
            })
            .collect()
    }

    /// Returns the square layout over the same orbitals.
    pub fn to_square(&self) -> Self {
        Self::new(
            self.irrep,
            &self.first_dims,
            &self.second_dims,
            PairStorage::Square,
        )
        .expect("A valid pair layout always has a valid square counterpart.")
    }

    /// Returns the square layout in which the orbitals of one leg have been replaced.
    pub fn with_leg_dims(&self, leg: PairLeg, dims: &[usize]) -> Result<Self, BacktransformError> {
        match leg {
            PairLeg::First => Self::new(self.irrep, dims, &self.second_dims, PairStorage::Square),
            PairLeg::Second => Self::new(self.irrep, &self.first_dims, dims, PairStorage::Square),
        }
    }

    /// Returns, for every pair of the square counterpart of this layout, the position of the
    /// stored entry it is expanded from and the weight applied during expansion.
    fn expansion_map(&self) -> Vec<(usize, f64)> {
        let square = self.to_square();
        square
            .pairs()
            .into_iter()
            .map(|(gp, p, gq, q)| {
                let pos = self
                    .position(gp, p, q)
                    .expect("Every square pair has a stored counterpart.");
                let weight = if self.triangular && !(gp == gq && p == q) {
                    0.5
                } else {
                    1.0
                };
                (pos, weight)
            })
            .collect()
    }

    /// Expands the columns of a block stored in this layout into the square layout.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::DimensionMismatch`] if the number of columns of `block`
    /// is not the length of this layout.
    pub fn expand_columns(&self, block: ArrayView2<f64>) -> Result<Array2<f64>, BacktransformError> {
        self.check_columns(block.ncols())?;
        if !self.triangular {
            return Ok(block.to_owned());
        }
        let map = self.expansion_map();
        let mut out = Array2::<f64>::zeros((block.nrows(), map.len()));
        out.axis_iter_mut(Axis(0))
            .zip(block.axis_iter(Axis(0)))
            .for_each(|(mut out_row, row)| {
                out_row
                    .iter_mut()
                    .zip(map.iter())
                    .for_each(|(x, (pos, weight))| *x = row[*pos] * weight);
            });
        Ok(out)
    }

    /// Packs the columns of a block stored in the square counterpart of this layout into this
    /// layout by summing both orderings of each pair.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::DimensionMismatch`] if the number of columns of `block`
    /// is not the length of the square counterpart of this layout.
    pub fn pack_columns(&self, block: ArrayView2<f64>) -> Result<Array2<f64>, BacktransformError> {
        let square = self.to_square();
        square.check_columns(block.ncols())?;
        if !self.triangular {
            return Ok(block.to_owned());
        }
        let targets = square
            .pairs()
            .into_iter()
            .map(|(gp, p, _, q)| {
                self.position(gp, p, q)
                    .expect("Every square pair has a stored counterpart.")
            })
            .collect_vec();
        let mut out = Array2::<f64>::zeros((block.nrows(), self.len));
        out.axis_iter_mut(Axis(0))
            .zip(block.axis_iter(Axis(0)))
            .for_each(|(mut out_row, row)| {
                row.iter()
                    .zip(targets.iter())
                    .for_each(|(x, pos)| out_row[*pos] += *x);
            });
        Ok(out)
    }

    /// Returns the positions in the square counterpart of this layout that contribute to each
    /// stored pair: one position for square storage and diagonal pairs, two otherwise.
    pub fn square_sources(&self) -> Vec<Vec<usize>> {
        let square = self.to_square();
        self.pairs()
            .into_iter()
            .map(|(gp, p, gq, q)| {
                let direct = square
                    .position(gp, p, q)
                    .expect("Every stored pair has a square counterpart.");
                if self.triangular && !(gp == gq && p == q) {
                    let swapped = square
                        .position(gq, q, p)
                        .expect("Every stored pair has a square counterpart.");
                    vec![direct, swapped]
                } else {
                    vec![direct]
                }
            })
            .collect()
    }

    fn check_columns(&self, ncols: usize) -> Result<(), BacktransformError> {
        if ncols != self.len {
            Err(BacktransformError::DimensionMismatch(format!(
                "A block with {ncols} columns does not match a pair layout of irrep {} with {} pairs",
                self.irrep, self.len
            )))
        } else {
            Ok(())
        }
    }
}

/// Structure holding the pair layouts of every pair irrep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairIndex {
    layouts: Vec<PairLayout>,
}

impl PairIndex {
    /// Constructs the pair layouts of every pair irrep.
    ///
    /// # Arguments
    ///
    /// * `first_dims` - The number of orbitals of each irrep on the first leg.
    /// * `second_dims` - The number of orbitals of each irrep on the second leg.
    /// * `storage` - The requested pair storage.
    pub fn new(
        first_dims: &[usize],
        second_dims: &[usize],
        storage: PairStorage,
    ) -> Result<Self, BacktransformError> {
        let layouts = (0..first_dims.len())
            .map(|h| PairLayout::new(h, first_dims, second_dims, storage))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { layouts })
    }

    pub fn n_irreps(&self) -> usize {
        self.layouts.len()
    }

    /// Returns the layout of the pairs of irrep `h`.
    pub fn layout(&self, h: usize) -> Result<&PairLayout, BacktransformError> {
        self.layouts.get(h).ok_or_else(|| {
            BacktransformError::DimensionMismatch(format!(
                "Pair irrep {h} is out of range for {} irreps",
                self.layouts.len()
            ))
        })
    }

    pub fn layouts(&self) -> &[PairLayout] {
        &self.layouts
    }
}
