//! Basis transformations of symmetry-blocked two-particle densities.

use std::error::Error;
use std::fmt;
use std::io;

use derive_builder::UninitializedFieldError;
use serde::{Deserialize, Serialize};

pub mod presort;
pub mod quarter;
pub mod sort;
pub mod tpdm;

// ==================
// Error definitions
// ==================

/// Enumerated type for the failures of a density basis transformation.
///
/// No failure is recovered internally: any error aborts the transformation in progress and leaves
/// its output unspecified.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktransformError {
    /// Invalid or incompatible construction-time options.
    Configuration(String),

    /// A basis-change matrix, page, row range or orbital index that is inconsistent with the
    /// expected irrep dimensions.
    DimensionMismatch(String),

    /// A failure to read from or write to a backing store or file.
    Io(String),
}

impl fmt::Display for BacktransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktransformError::Configuration(msg) => write!(f, "Configuration error: {msg}."),
            BacktransformError::DimensionMismatch(msg) => {
                write!(f, "Dimension mismatch: {msg}.")
            }
            BacktransformError::Io(msg) => write!(f, "I/O error: {msg}."),
        }
    }
}

impl Error for BacktransformError {}

impl From<io::Error> for BacktransformError {
    fn from(err: io::Error) -> Self {
        BacktransformError::Io(err.to_string())
    }
}

impl From<UninitializedFieldError> for BacktransformError {
    fn from(err: UninitializedFieldError) -> Self {
        BacktransformError::Configuration(format!("`{}` has not been set", err.field_name()))
    }
}

impl From<String> for BacktransformError {
    fn from(msg: String) -> Self {
        BacktransformError::Configuration(msg)
    }
}

// ================
// Enum definitions
// ================

/// Enumerated type for the spin treatment of a transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformationType {
    /// Alpha and beta orbitals share one basis-change matrix set and the density is
    /// spin-summed.
    Restricted,

    /// Alpha and beta orbitals have independent basis-change matrices and the density is resolved
    /// into same-spin and mixed-spin blocks.
    Unrestricted,
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformationType::Restricted => write!(f, "Restricted"),
            TransformationType::Unrestricted => write!(f, "Unrestricted"),
        }
    }
}

/// Enumerated type for the storage formats of the transformed density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    /// Symmetry-blocked storage only.
    BlocksOnly,

    /// A flat list of quartets only. The blocked output is kept in scratch storage.
    QuartetsOnly,

    /// Both symmetry-blocked storage and a flat list of quartets.
    BlocksAndQuartets,
}

impl OutputType {
    /// Returns `true` if the blocked output is to be persisted.
    pub fn writes_blocks(&self) -> bool {
        matches!(self, OutputType::BlocksOnly | OutputType::BlocksAndQuartets)
    }

    /// Returns `true` if a quartet list is to be written.
    pub fn writes_quartets(&self) -> bool {
        matches!(self, OutputType::QuartetsOnly | OutputType::BlocksAndQuartets)
    }
}

impl Default for OutputType {
    fn default() -> Self {
        OutputType::BlocksOnly
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::BlocksOnly => write!(f, "Symmetry blocks only"),
            OutputType::QuartetsOnly => write!(f, "Quartet list only"),
            OutputType::BlocksAndQuartets => write!(f, "Symmetry blocks and quartet list"),
        }
    }
}

/// Enumerated type for the numbering of absolute orbital indices in quartet lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoOrdering {
    /// Orbitals are numbered space by space, and within each space irrep by irrep.
    QtOrder,

    /// Orbitals are numbered irrep by irrep across all spaces.
    PitzerOrder,
}

impl Default for MoOrdering {
    fn default() -> Self {
        MoOrdering::QtOrder
    }
}

impl fmt::Display for MoOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoOrdering::QtOrder => write!(f, "QT order"),
            MoOrdering::PitzerOrder => write!(f, "Pitzer order"),
        }
    }
}

/// Enumerated type for the spin blocks of a two-particle density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpinCase {
    /// The spin-summed density of a restricted transformation.
    Total,

    /// The same-spin alpha-alpha block.
    AlphaAlpha,

    /// The same-spin beta-beta block.
    BetaBeta,

    /// The mixed-spin block with alpha row pairs and beta column pairs.
    AlphaBeta,
}

impl SpinCase {
    /// The spin cases of an unrestricted density, in processing order.
    pub const UNRESTRICTED: [SpinCase; 3] =
        [SpinCase::AlphaAlpha, SpinCase::BetaBeta, SpinCase::AlphaBeta];

    /// Returns a short tag used to name stores and files.
    pub fn tag(&self) -> &'static str {
        match self {
            SpinCase::Total => "total",
            SpinCase::AlphaAlpha => "aa",
            SpinCase::BetaBeta => "bb",
            SpinCase::AlphaBeta => "ab",
        }
    }
}

impl fmt::Display for SpinCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinCase::Total => write!(f, "spin-summed"),
            SpinCase::AlphaAlpha => write!(f, "alpha-alpha"),
            SpinCase::BetaBeta => write!(f, "beta-beta"),
            SpinCase::AlphaBeta => write!(f, "alpha-beta"),
        }
    }
}

// =================
// Trait definitions
// =================

/// Trait defining the capability of transforming a quantity from one orbital basis into another.
pub trait BasisTransform {
    /// The type of the successful outcome of the transformation.
    type Outcome;

    /// Checks that every input required by the transformation is available and sets up the
    /// descriptors of the storage it will use.
    fn prepare(&mut self) -> Result<(), BacktransformError>;

    /// Executes the transformation and stores the result internally.
    fn run(&mut self) -> Result<(), BacktransformError>;

    /// Flushes the outputs of the transformation and writes any auxiliary output.
    fn finalise(&mut self) -> Result<(), BacktransformError>;

    /// Returns the result of the transformation.
    fn result(&self) -> Result<&Self::Outcome, BacktransformError>;
}
