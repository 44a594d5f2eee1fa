//! Paged storage of symmetry-blocked tensors.
//!
//! Every tensor is held as one dense two-dimensional block per irrep and is only ever addressed
//! through ranges of rows, so that no store needs to hold a whole tensor in memory.

use std::fmt;
use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::transform::BacktransformError;

pub mod descriptor;
pub mod disk;
pub mod memory;
pub mod pair;
pub mod quartet;


// ================
// Enum definitions
// ================

/// Enumerated type for the modes of writing rows into an irrep block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncates the irrep block to zeros before writing the rows.
    Create,

    /// Writes the rows, leaving the rest of the irrep block untouched.
    Append,
}

/// Enumerated type for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    /// The store holds intermediate data and is released when dropped.
    Scratch,

    /// The store holds output data and outlives the transformation.
    Persistent,
}

impl fmt::Display for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persistence::Scratch => write!(f, "scratch"),
            Persistence::Persistent => write!(f, "persistent"),
        }
    }
}

// =================
// Trait definitions
// =================

/// Trait for stores of symmetry-blocked two-dimensional data addressed by irrep and row range.
pub trait BlockStore {
    /// Returns the label of the store.
    fn label(&self) -> &str;

    /// Returns the number of irrep blocks in the store.
    fn n_irreps(&self) -> usize;

    /// Returns the numbers of rows and columns of an irrep block.
    fn shape(&self, irrep: usize) -> Result<(usize, usize), BacktransformError>;

    /// Reads a range of rows of an irrep block.
    ///
    /// # Arguments
    ///
    /// * `irrep` - The irrep of the block.
    /// * `rows` - The range of rows to be read.
    ///
    /// # Returns
    ///
    /// A dense matrix with one row per requested row and the full number of columns of the block.
    fn read_block(&self, irrep: usize, rows: Range<usize>)
        -> Result<Array2<f64>, BacktransformError>;

    /// Writes consecutive rows into an irrep block.
    ///
    /// # Arguments
    ///
    /// * `irrep` - The irrep of the block.
    /// * `first_row` - The row at which `block` starts.
    /// * `block` - The rows to be written, spanning all columns of the irrep block.
    /// * `mode` - Whether the irrep block is to be truncated first.
    fn write_block(
        &mut self,
        irrep: usize,
        first_row: usize,
        block: ArrayView2<f64>,
        mode: WriteMode,
    ) -> Result<(), BacktransformError>;

    /// Ensures that everything written so far has reached the backing storage.
    fn flush(&mut self) -> Result<(), BacktransformError>;
}

/// Trait for providers of block stores.
pub trait StorageBackend {
    /// The type of the stores provided.
    type Store: BlockStore;

    /// Creates a zero-initialised store.
    ///
    /// # Arguments
    ///
    /// * `label` - A label unique amongst the live stores of this backend.
    /// * `shapes` - The numbers of rows and columns of each irrep block.
    /// * `persistence` - Whether the store is released when dropped.
    fn create_store(
        &mut self,
        label: &str,
        shapes: &[(usize, usize)],
        persistence: Persistence,
    ) -> Result<Self::Store, BacktransformError>;
}

// =========
// Functions
// =========

/// Checks a row range and a column count against the shape of an irrep block.
pub(crate) fn check_rows(
    label: &str,
    irrep: usize,
    shapes: &[(usize, usize)],
    rows: &Range<usize>,
    ncols: Option<usize>,
) -> Result<(usize, usize), BacktransformError> {
    let (nrows_block, ncols_block) = *shapes.get(irrep).ok_or_else(|| {
        BacktransformError::DimensionMismatch(format!(
            "Store `{label}` has no block for irrep {irrep}"
        ))
    })?;
    if rows.start > rows.end || rows.end > nrows_block {
        return Err(BacktransformError::DimensionMismatch(format!(
            "Rows {}..{} lie outside irrep block {irrep} of store `{label}` with {nrows_block} rows",
            rows.start, rows.end
        )));
    }
    if let Some(ncols) = ncols {
        if ncols != ncols_block {
            return Err(BacktransformError::DimensionMismatch(format!(
                "A page with {ncols} columns cannot be written into irrep block {irrep} of store `{label}` with {ncols_block} columns"
            )));
        }
    }
    Ok((nrows_block, ncols_block))
}

/// Splits the rows of a block into consecutive pages.
pub fn pages(nrows: usize, rows_per_page: usize) -> Vec<Range<usize>> {
    let rows_per_page = rows_per_page.max(1);
    (0..nrows)
        .step_by(rows_per_page)
        .map(|start| start..(start + rows_per_page).min(nrows))
        .collect()
}

/// Returns the number of rows that fit into a memory budget.
///
/// # Arguments
///
/// * `nrows` - The number of rows of the block being paged.
/// * `doubles_per_row` - The number of double-precision values held in memory for each row.
/// * `budget` - The memory budget in double-precision values.
///
/// # Returns
///
/// The number of rows per page, at least one and at most `nrows`.
pub fn rows_per_page(nrows: usize, doubles_per_row: usize, budget: usize) -> usize {
    if doubles_per_row == 0 {
        return nrows.max(1);
    }
    (budget / doubles_per_row).clamp(1, nrows.max(1))
}
