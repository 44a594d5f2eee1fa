//! # tpdm-backtransform
//!
//! Back-transformation of two-particle density matrices from a molecular-orbital basis to a
//! symmetry-adapted basis, with
//! - point-group blocking over the Abelian groups $`\mathcal{C}_1`$ to $`\mathcal{D}_{2h}`$,
//! - restricted and unrestricted (alpha-alpha, beta-beta, alpha-beta) densities,
//! - square or triangular storage of index pairs, and
//! - paged, out-of-core processing of every intermediate within a memory budget.
//!
//! The transformation proceeds as a presort of the source-basis quartets into symmetry blocks,
//! two half-transformations separated by a transpose sort, and a final sort into the
//! symmetry-orbital layout. The [`transform::tpdm::TpdmBackTransform`] driver orchestrates the
//! whole sequence; the `tpdm-backtransform` binary runs it from a YAML input file.

pub mod basis;
pub mod interfaces;
pub mod io;
pub mod storage;
pub mod symmetry;
pub mod transform;
