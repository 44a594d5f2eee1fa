//! Basis-change matrices between a source and a target orbital basis.

use std::collections::HashSet;

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{concatenate, Array2, Axis};

use crate::basis::space::{FrozenOrbitals, OrbitalSpace, OrbitalSpaceKind, SpaceSet};
use crate::transform::{BacktransformError, SpinCase};

#[cfg(test)]
#[path = "basis_change_tests.rs"]
mod basis_change_tests;

// ==================
// Struct definitions
// ==================

/// Structure holding basis-change matrices for one spin, one matrix per orbital space per irrep.
///
/// The matrix of space $`S`$ and irrep $`h`$ has one row per orbital of $`S`$ in $`h`$ and one
/// column per target basis function in $`h`$, so that a quarter transformation of a tensor leg
/// reads
///
/// ```math
///     Y_{\dots t} = \sum_{s} X_{\dots s} M_{st}.
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasisChange {
    blocks: IndexMap<String, Vec<Array2<f64>>>,
}

impl BasisChange {
    /// Creates an empty set of basis-change matrices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the per-irrep matrices of an orbital space, replacing any already present.
    pub fn with_space<S: Into<String>>(mut self, name: S, matrices: Vec<Array2<f64>>) -> Self {
        self.blocks.insert(name.into(), matrices);
        self
    }

    /// Returns the per-irrep matrices of an orbital space, if present.
    pub fn space(&self, name: &str) -> Option<&Vec<Array2<f64>>> {
        self.blocks.get(name)
    }

    /// Constructs identity basis-change matrices for every space in a space set, mapping the
    /// participating orbitals onto themselves.
    pub fn identity(
        spaces: &SpaceSet,
        frozen_orbitals: FrozenOrbitals,
    ) -> Result<Self, BacktransformError> {
        let participating = spaces.participating(frozen_orbitals)?;
        let mut offsets = vec![0usize; spaces.n_irreps()];
        let mut basis_change = Self::new();
        for &i in participating.space_indices.iter() {
            let space = &spaces.spaces()[i];
            let matrices = space
                .dims()
                .iter()
                .enumerate()
                .map(|(h, &dim)| {
                    let mut mat = Array2::<f64>::zeros((dim, participating.dims[h]));
                    (0..dim).for_each(|p| mat[(p, offsets[h] + p)] = 1.0);
                    offsets[h] += dim;
                    mat
                })
                .collect_vec();
            basis_change = basis_change.with_space(space.name(), matrices);
        }
        Ok(basis_change)
    }

    /// Stacks the matrices of the participating spaces of a space set into one matrix per irrep
    /// whose rows run over all participating orbitals of that irrep.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::Configuration`] if a participating space has no
    /// matrices, and with [`BacktransformError::DimensionMismatch`] if a matrix does not have one
    /// row per orbital of its space and irrep, or if the number of irreps or the number of target
    /// functions is inconsistent between spaces.
    pub fn combined(
        &self,
        spaces: &SpaceSet,
        frozen_orbitals: FrozenOrbitals,
    ) -> Result<Vec<Array2<f64>>, BacktransformError> {
        let participating = spaces.participating(frozen_orbitals)?;
        let n_irreps = spaces.n_irreps();
        let per_space = participating
            .space_indices
            .iter()
            .map(|&i| {
                let name = spaces.spaces()[i].name();
                let matrices = self.blocks.get(name).ok_or_else(|| {
                    BacktransformError::Configuration(format!(
                        "No basis-change matrices have been supplied for orbital space `{name}`"
                    ))
                })?;
                if matrices.len() != n_irreps {
                    return Err(BacktransformError::DimensionMismatch(format!(
                        "Orbital space `{name}` has basis-change matrices for {} irreps, but {n_irreps} are expected",
                        matrices.len()
                    )));
                }
                let dims = spaces.spaces()[i].dims();
                if let Some((h, matrix)) = matrices
                    .iter()
                    .enumerate()
                    .find(|(h, matrix)| matrix.nrows() != dims[*h])
                {
                    return Err(BacktransformError::DimensionMismatch(format!(
                        "Basis-change matrix of irrep {h} for orbital space `{name}` has {} rows, but the space has {} orbitals in that irrep",
                        matrix.nrows(),
                        dims[h]
                    )));
                }
                Ok(matrices)
            })
            .collect::<Result<Vec<_>, _>>()?;

        (0..n_irreps)
            .map(|h| {
                let ncols = per_space
                    .iter()
                    .map(|matrices| matrices[h].ncols())
                    .collect::<HashSet<_>>();
                if ncols.len() > 1 {
                    return Err(BacktransformError::DimensionMismatch(format!(
                        "Basis-change matrices of irrep {h} disagree on the number of target functions: {ncols:?}"
                    )));
                }
                let views = per_space.iter().map(|matrices| matrices[h].view()).collect_vec();
                concatenate(Axis(0), &views).map_err(|err| {
                    BacktransformError::DimensionMismatch(format!(
                        "Unable to stack the basis-change matrices of irrep {h}: {err}"
                    ))
                })
            })
            .collect()
    }

    /// Constructs the basis change for the reverse direction, from the target basis back into the
    /// participating source orbitals.
    ///
    /// # Arguments
    ///
    /// * `spaces` - The source orbital spaces.
    /// * `frozen_orbitals` - The frozen-orbital policy defining the participating orbitals.
    /// * `target_space` - The name under which the target basis is to be registered.
    ///
    /// # Returns
    ///
    /// A tuple of the single-space [`SpaceSet`] describing the target basis and the transposed
    /// basis-change matrices registered under `target_space`.
    pub fn reverse(
        &self,
        spaces: &SpaceSet,
        frozen_orbitals: FrozenOrbitals,
        target_space: &str,
    ) -> Result<(SpaceSet, BasisChange), BacktransformError> {
        let combined = self.combined(spaces, frozen_orbitals)?;
        let target_dims = combined.iter().map(|mat| mat.ncols()).collect_vec();
        let target = SpaceSet::new(
            spaces.point_group(),
            vec![OrbitalSpace::builder()
                .name(target_space)
                .kind(OrbitalSpaceKind::Active)
                .dims(target_dims)
                .build()
                .map_err(|err| BacktransformError::Configuration(err.to_string()))?],
        )?;
        let transposed = combined
            .iter()
            .map(|mat| mat.t().to_owned())
            .collect_vec();
        Ok((target, BasisChange::new().with_space(target_space, transposed)))
    }
}

/// Enumerated type for the basis-change matrices of a restricted or unrestricted
/// transformation.
#[derive(Clone, Debug, PartialEq)]
pub enum SpinBasisChange {
    /// One set of matrices shared by both spins.
    Restricted(BasisChange),

    /// Independent sets of matrices for the alpha and beta spins.
    Unrestricted {
        alpha: BasisChange,
        beta: BasisChange,
    },
}

impl SpinBasisChange {
    /// Returns the basis changes applied to the row pair and the column pair of a spin block.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::Configuration`] if the spin case is incompatible with the
    /// spin treatment of the matrices.
    pub fn for_spin_case(
        &self,
        spin_case: SpinCase,
    ) -> Result<(&BasisChange, &BasisChange), BacktransformError> {
        match (self, spin_case) {
            (SpinBasisChange::Restricted(bc), SpinCase::Total) => Ok((bc, bc)),
            (SpinBasisChange::Unrestricted { alpha, .. }, SpinCase::AlphaAlpha) => {
                Ok((alpha, alpha))
            }
            (SpinBasisChange::Unrestricted { beta, .. }, SpinCase::BetaBeta) => Ok((beta, beta)),
            (SpinBasisChange::Unrestricted { alpha, beta }, SpinCase::AlphaBeta) => {
                Ok((alpha, beta))
            }
            _ => Err(BacktransformError::Configuration(format!(
                "The {spin_case} spin case cannot be transformed with {} basis-change matrices",
                if self.is_restricted() {
                    "restricted"
                } else {
                    "unrestricted"
                }
            ))),
        }
    }

    /// Returns `true` if the matrices are shared by both spins.
    pub fn is_restricted(&self) -> bool {
        matches!(self, SpinBasisChange::Restricted(_))
    }

    /// Returns every distinct set of matrices held.
    pub fn sets(&self) -> Vec<&BasisChange> {
        match self {
            SpinBasisChange::Restricted(bc) => vec![bc],
            SpinBasisChange::Unrestricted { alpha, beta } => vec![alpha, beta],
        }
    }
}
