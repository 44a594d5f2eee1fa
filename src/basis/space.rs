//! Orbital spaces and their partitioning into frozen and participating orbitals.

use std::collections::HashSet;
use std::fmt;

use derive_builder::Builder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::symmetry::PointGroup;
use crate::transform::{BacktransformError, MoOrdering};

#[cfg(test)]
#[path = "space_tests.rs"]
mod space_tests;

// ================
// Enum definitions
// ================

/// Enumerated type for the kinds of orbital spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitalSpaceKind {
    /// Doubly occupied orbitals excluded from correlation.
    FrozenOccupied,

    /// Correlated occupied orbitals.
    Occupied,

    /// Correlated orbitals of variable occupation.
    Active,

    /// Correlated virtual orbitals.
    Virtual,

    /// Virtual orbitals excluded from correlation.
    FrozenVirtual,
}

impl fmt::Display for OrbitalSpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbitalSpaceKind::FrozenOccupied => write!(f, "frozen occupied"),
            OrbitalSpaceKind::Occupied => write!(f, "occupied"),
            OrbitalSpaceKind::Active => write!(f, "active"),
            OrbitalSpaceKind::Virtual => write!(f, "virtual"),
            OrbitalSpaceKind::FrozenVirtual => write!(f, "frozen virtual"),
        }
    }
}

/// Enumerated type for the policies deciding which frozen orbitals are excluded from a
/// transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrozenOrbitals {
    /// No orbitals are excluded.
    None,

    /// Frozen occupied orbitals are excluded.
    OccOnly,

    /// Frozen virtual orbitals are excluded.
    VirOnly,

    /// Both frozen occupied and frozen virtual orbitals are excluded.
    OccAndVir,
}

impl FrozenOrbitals {
    /// Returns `true` if spaces of the specified kind are excluded under this policy.
    pub fn excludes(&self, kind: OrbitalSpaceKind) -> bool {
        match kind {
            OrbitalSpaceKind::FrozenOccupied => {
                matches!(self, FrozenOrbitals::OccOnly | FrozenOrbitals::OccAndVir)
            }
            OrbitalSpaceKind::FrozenVirtual => {
                matches!(self, FrozenOrbitals::VirOnly | FrozenOrbitals::OccAndVir)
            }
            _ => false,
        }
    }
}

impl Default for FrozenOrbitals {
    fn default() -> Self {
        FrozenOrbitals::OccAndVir
    }
}

impl fmt::Display for FrozenOrbitals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrozenOrbitals::None => write!(f, "none"),
            FrozenOrbitals::OccOnly => write!(f, "frozen occupied only"),
            FrozenOrbitals::VirOnly => write!(f, "frozen virtual only"),
            FrozenOrbitals::OccAndVir => write!(f, "frozen occupied and frozen virtual"),
        }
    }
}

// ==================
// Struct definitions
// ==================

/// Structure describing a named, ordered set of orbitals resolved by irrep.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrbitalSpace {
    /// The name of the space, unique within a [`SpaceSet`].
    #[builder(setter(into))]
    name: String,

    /// The kind of the space.
    kind: OrbitalSpaceKind,

    /// The number of orbitals of each irrep in this space.
    dims: Vec<usize>,
}

impl OrbitalSpace {
    /// Returns a builder to construct a new [`OrbitalSpace`].
    pub fn builder() -> OrbitalSpaceBuilder {
        OrbitalSpaceBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OrbitalSpaceKind {
        self.kind
    }

    /// Returns the number of orbitals of each irrep in this space.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the total number of orbitals in this space.
    pub fn n_orbitals(&self) -> usize {
        self.dims.iter().sum()
    }
}

/// Structure holding the orbital spaces that partition the full orbital set of a calculation.
///
/// The order of the spaces defines the irrep-local offsets of their orbitals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpaceSet {
    point_group: PointGroup,
    spaces: Vec<OrbitalSpace>,
}

/// Structure describing the orbitals taking part in a transformation once frozen orbitals have
/// been excluded.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticipatingOrbitals {
    /// Indices into the [`SpaceSet`] of the participating spaces, in order.
    pub space_indices: Vec<usize>,

    /// The number of participating orbitals of each irrep.
    pub dims: Vec<usize>,
}

impl SpaceSet {
    /// Constructs a validated set of orbital spaces.
    ///
    /// # Arguments
    ///
    /// * `point_group` - The point group in which the orbitals are symmetry-adapted.
    /// * `spaces` - The orbital spaces, in order.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::Configuration`] if there are no spaces, if a space does
    /// not specify one dimension per irrep, if names are not unique, or if a frozen occupied
    /// space follows a non-frozen-occupied one or a frozen virtual space precedes a
    /// non-frozen-virtual one.
    pub fn new(
        point_group: PointGroup,
        spaces: Vec<OrbitalSpace>,
    ) -> Result<Self, BacktransformError> {
        if spaces.is_empty() {
            return Err(BacktransformError::Configuration(
                "At least one orbital space is required".to_string(),
            ));
        }
        let n_irreps = point_group.n_irreps();
        if let Some(space) = spaces.iter().find(|space| space.dims.len() != n_irreps) {
            return Err(BacktransformError::Configuration(format!(
                "Orbital space `{}` specifies {} irrep dimensions, but point group {point_group} has {n_irreps} irreps",
                space.name,
                space.dims.len()
            )));
        }
        let names = spaces.iter().map(|space| space.name.as_str()).collect::<HashSet<_>>();
        if names.len() != spaces.len() {
            return Err(BacktransformError::Configuration(
                "Orbital space names must be unique".to_string(),
            ));
        }
        let kinds = spaces.iter().map(|space| space.kind).collect_vec();
        let frozen_occ_misplaced = kinds
            .iter()
            .skip_while(|kind| **kind == OrbitalSpaceKind::FrozenOccupied)
            .any(|kind| *kind == OrbitalSpaceKind::FrozenOccupied);
        let frozen_vir_misplaced = kinds
            .iter()
            .rev()
            .skip_while(|kind| **kind == OrbitalSpaceKind::FrozenVirtual)
            .any(|kind| *kind == OrbitalSpaceKind::FrozenVirtual);
        if frozen_occ_misplaced || frozen_vir_misplaced {
            return Err(BacktransformError::Configuration(
                "Frozen occupied spaces must precede, and frozen virtual spaces must follow, all other orbital spaces".to_string(),
            ));
        }
        Ok(Self {
            point_group,
            spaces,
        })
    }

    pub fn point_group(&self) -> PointGroup {
        self.point_group
    }

    pub fn n_irreps(&self) -> usize {
        self.point_group.n_irreps()
    }

    pub fn spaces(&self) -> &[OrbitalSpace] {
        &self.spaces
    }

    /// Returns the space with the specified name, if any.
    pub fn space(&self, name: &str) -> Option<&OrbitalSpace> {
        self.spaces.iter().find(|space| space.name == name)
    }

    /// Returns the total number of orbitals of each irrep across all spaces.
    pub fn total_dims(&self) -> Vec<usize> {
        (0..self.n_irreps())
            .map(|h| self.spaces.iter().map(|space| space.dims[h]).sum())
            .collect()
    }

    /// Returns the total number of orbitals across all spaces and irreps.
    pub fn n_orbitals(&self) -> usize {
        self.spaces.iter().map(OrbitalSpace::n_orbitals).sum()
    }

    /// Determines the spaces taking part in a transformation under a frozen-orbital policy.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::Configuration`] if the policy leaves no orbitals to
    /// transform.
    pub fn participating(
        &self,
        frozen_orbitals: FrozenOrbitals,
    ) -> Result<ParticipatingOrbitals, BacktransformError> {
        let space_indices = self
            .spaces
            .iter()
            .enumerate()
            .filter(|(_, space)| !frozen_orbitals.excludes(space.kind))
            .map(|(i, _)| i)
            .collect_vec();
        let dims = (0..self.n_irreps())
            .map(|h| {
                space_indices
                    .iter()
                    .map(|&i| self.spaces[i].dims[h])
                    .sum::<usize>()
            })
            .collect_vec();
        if dims.iter().sum::<usize>() == 0 {
            return Err(BacktransformError::Configuration(format!(
                "The frozen-orbital policy `{frozen_orbitals}` leaves no orbitals to transform"
            )));
        }
        Ok(ParticipatingOrbitals {
            space_indices,
            dims,
        })
    }

    /// Maps every absolute orbital index onto its irrep and its irrep-local index amongst the
    /// participating orbitals.
    ///
    /// # Arguments
    ///
    /// * `frozen_orbitals` - The frozen-orbital policy.
    /// * `mo_ordering` - The numbering convention of the absolute orbital indices.
    ///
    /// # Returns
    ///
    /// A vector indexed by absolute orbital index whose entries are `None` for excluded
    /// orbitals and `Some((irrep, index))` otherwise.
    pub fn orbital_map(
        &self,
        frozen_orbitals: FrozenOrbitals,
        mo_ordering: MoOrdering,
    ) -> Result<Vec<Option<(usize, usize)>>, BacktransformError> {
        let participating = self.participating(frozen_orbitals)?;
        let n_irreps = self.n_irreps();

        // Irrep-local offset of each participating space amongst the participating orbitals.
        let mut local_offsets = vec![vec![None; n_irreps]; self.spaces.len()];
        let mut running = vec![0usize; n_irreps];
        for &i in participating.space_indices.iter() {
            for h in 0..n_irreps {
                local_offsets[i][h] = Some(running[h]);
                running[h] += self.spaces[i].dims[h];
            }
        }

        let map_block = |i: usize, h: usize| -> Vec<Option<(usize, usize)>> {
            (0..self.spaces[i].dims[h])
                .map(|p| local_offsets[i][h].map(|offset| (h, offset + p)))
                .collect()
        };
        let map = match mo_ordering {
            MoOrdering::QtOrder => (0..self.spaces.len())
                .cartesian_product(0..n_irreps)
                .flat_map(|(i, h)| map_block(i, h))
                .collect_vec(),
            MoOrdering::PitzerOrder => (0..n_irreps)
                .cartesian_product(0..self.spaces.len())
                .flat_map(|(h, i)| map_block(i, h))
                .collect_vec(),
        };
        Ok(map)
    }
}

impl fmt::Display for SpaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = self.point_group.irrep_labels();
        let name_width = self
            .spaces
            .iter()
            .map(|space| space.name.chars().count())
            .max()
            .unwrap_or(5)
            .max(5);
        writeln!(f, "Point group: {}", self.point_group)?;
        write!(f, " {:<name_width$}  {:<16}", "Space", "Kind")?;
        for label in labels {
            write!(f, " {label:>4}")?;
        }
        writeln!(f)?;
        for space in self.spaces.iter() {
            write!(
                f,
                " {:<name_width$}  {:<16}",
                space.name,
                space.kind.to_string()
            )?;
            for dim in space.dims.iter() {
                write!(f, " {dim:>4}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
