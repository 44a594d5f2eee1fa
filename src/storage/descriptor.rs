//! Descriptors of symmetry-blocked tensors and the buffers binding them to stores.

use std::fmt;
use std::ops::Range;

use derive_builder::Builder;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::storage::pair::{PairIndex, PairLayout};
use crate::storage::quartet::TpdmElement;
use crate::storage::{pages, rows_per_page, BlockStore, WriteMode};
use crate::symmetry::irrep_product;
use crate::transform::BacktransformError;

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod descriptor_tests;

// ==================
// Struct definitions
// ==================

/// Structure describing the blocking of a four-index tensor $`D_{ij,kl}`$.
///
/// Block $`h`$ has the pairs $`ij`$ of irrep $`h`$ as rows and the pairs $`kl`$ of irrep
/// $`h \otimes t`$ as columns, where $`t`$ is the target irrep of the tensor.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate", error = "BacktransformError"))]
pub struct BlockDescriptor {
    /// The label of the tensor, also used to name its store.
    #[builder(setter(into))]
    label: String,

    /// The irrep of the tensor as a whole.
    #[builder(default = "0")]
    target_irrep: usize,

    /// The layouts of the row pairs.
    rows: PairIndex,

    /// The layouts of the column pairs.
    cols: PairIndex,

    /// The number of rows held in memory at a time for each row irrep. Blocks without an entry
    /// are processed in one page.
    #[builder(default = "vec![]")]
    rows_per_page: Vec<usize>,
}

impl BlockDescriptorBuilder {
    fn validate(&self) -> Result<(), String> {
        let rows = self.rows.as_ref().ok_or("No row layouts found.".to_string())?;
        let cols = self.cols.as_ref().ok_or("No column layouts found.".to_string())?;
        if rows.n_irreps() != cols.n_irreps() {
            return Err(format!(
                "Row layouts span {} irreps but column layouts span {}",
                rows.n_irreps(),
                cols.n_irreps()
            ));
        }
        let target_irrep = self.target_irrep.unwrap_or(0);
        if target_irrep >= rows.n_irreps() {
            return Err(format!(
                "Target irrep {target_irrep} is out of range for {} irreps",
                rows.n_irreps()
            ));
        }
        Ok(())
    }
}

impl BlockDescriptor {
    /// Returns a builder to construct a new [`BlockDescriptor`].
    pub fn builder() -> BlockDescriptorBuilder {
        BlockDescriptorBuilder::default()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn n_irreps(&self) -> usize {
        self.rows.n_irreps()
    }

    pub fn target_irrep(&self) -> usize {
        self.target_irrep
    }

    pub fn row_index(&self) -> &PairIndex {
        &self.rows
    }

    pub fn col_index(&self) -> &PairIndex {
        &self.cols
    }

    /// Returns the irrep of the column pairs of block `irrep`.
    pub fn col_irrep(&self, irrep: usize) -> usize {
        irrep_product(irrep, self.target_irrep)
    }

    /// Returns the layout of the row pairs of block `irrep`.
    pub fn row_layout(&self, irrep: usize) -> Result<&PairLayout, BacktransformError> {
        self.rows.layout(irrep)
    }

    /// Returns the layout of the column pairs of block `irrep`.
    pub fn col_layout(&self, irrep: usize) -> Result<&PairLayout, BacktransformError> {
        self.cols.layout(self.col_irrep(irrep))
    }

    /// Returns the numbers of rows and columns of block `irrep`.
    pub fn shape(&self, irrep: usize) -> Result<(usize, usize), BacktransformError> {
        Ok((
            self.row_layout(irrep)?.len(),
            self.col_layout(irrep)?.len(),
        ))
    }

    /// Returns the shapes of all blocks in irrep order.
    pub fn shapes(&self) -> Result<Vec<(usize, usize)>, BacktransformError> {
        (0..self.n_irreps()).map(|h| self.shape(h)).collect()
    }

    /// Returns the number of rows held in memory at a time for block `irrep`.
    pub fn rows_per_page(&self, irrep: usize) -> Result<usize, BacktransformError> {
        let (nrows, _) = self.shape(irrep)?;
        Ok(self
            .rows_per_page
            .get(irrep)
            .copied()
            .unwrap_or(nrows)
            .max(1))
    }

    /// Returns the row pages of block `irrep`.
    pub fn pages(&self, irrep: usize) -> Result<Vec<Range<usize>>, BacktransformError> {
        let (nrows, _) = self.shape(irrep)?;
        Ok(pages(nrows, self.rows_per_page(irrep)?))
    }

    /// Returns a copy of this descriptor with a new label.
    pub fn relabelled(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..self.clone()
        }
    }

    /// Returns a copy of this descriptor with the given numbers of rows per page.
    pub fn with_rows_per_page(&self, rows_per_page: Vec<usize>) -> Self {
        Self {
            rows_per_page,
            ..self.clone()
        }
    }

    /// Returns a copy of this descriptor paged to fit a memory budget.
    ///
    /// # Arguments
    ///
    /// * `budget` - The memory budget in double-precision values.
    /// * `extra_cols` - The number of double-precision values held alongside each row of a page,
    /// in addition to the row itself.
    pub fn paged(&self, budget: usize, extra_cols: usize) -> Result<Self, BacktransformError> {
        let rows_per_page = self
            .shapes()?
            .into_iter()
            .map(|(nrows, ncols)| rows_per_page(nrows, ncols + extra_cols, budget))
            .collect();
        Ok(Self {
            rows_per_page,
            ..self.clone()
        })
    }
}

impl fmt::Display for BlockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Tensor `{}` (target irrep {}, {} irrep blocks)",
            self.label,
            self.target_irrep,
            self.n_irreps()
        )?;
        for h in 0..self.n_irreps() {
            let (nrows, ncols) = self.shape(h).map_err(|_| fmt::Error)?;
            let rows_per_page = self.rows_per_page(h).map_err(|_| fmt::Error)?;
            writeln!(
                f,
                "  Block {h}: {nrows} x {ncols}, {rows_per_page} row(s) per page",
            )?;
        }
        Ok(())
    }
}

// ===========
// Tpdm buffer
// ===========

/// Structure binding a [`BlockDescriptor`] to a store and keeping track of which rows of each
/// block have been written.
#[derive(Debug)]
pub struct TpdmBuffer<S: BlockStore> {
    descriptor: BlockDescriptor,
    store: S,
    next_rows: Vec<Option<usize>>,
}

impl<S: BlockStore> TpdmBuffer<S> {
    /// Binds a descriptor to a store.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::DimensionMismatch`] if the block shapes of the store
    /// differ from those of the descriptor.
    pub fn new(descriptor: BlockDescriptor, store: S) -> Result<Self, BacktransformError> {
        let shapes = descriptor.shapes()?;
        let store_shapes = (0..store.n_irreps())
            .map(|h| store.shape(h))
            .collect::<Result<Vec<_>, _>>()?;
        if shapes != store_shapes {
            return Err(BacktransformError::DimensionMismatch(format!(
                "Store `{}` with block shapes {store_shapes:?} cannot hold tensor `{}` with block shapes {shapes:?}",
                store.label(),
                descriptor.label()
            )));
        }
        let next_rows = vec![None; descriptor.n_irreps()];
        Ok(Self {
            descriptor,
            store,
            next_rows,
        })
    }

    pub fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the row of block `irrep` at which the next write must start, or `None` if the
    /// block has not been created yet.
    pub fn next_row(&self, irrep: usize) -> Option<usize> {
        self.next_rows.get(irrep).copied().flatten()
    }

    /// Checks that `num_rows` rows starting at `first_row` may be written into block `irrep`.
    ///
    /// Rows must be written in order: `first_run` creates the block afresh and requires the
    /// rows to start at zero, while every other write must start where the previous write of
    /// the same block ended.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::DimensionMismatch`] if the rows overlap or leave a gap
    /// with those already written, or extend past the end of the block.
    pub fn check_write(
        &self,
        irrep: usize,
        first_row: usize,
        num_rows: usize,
        first_run: bool,
    ) -> Result<(), BacktransformError> {
        let (nrows, _) = self.descriptor.shape(irrep)?;
        let expected = if first_run {
            Some(0)
        } else {
            self.next_row(irrep)
        };
        if expected != Some(first_row) {
            return Err(BacktransformError::DimensionMismatch(format!(
                "Rows of block {irrep} of `{}` must be written contiguously: expected a write starting at {}, got row {first_row}",
                self.descriptor.label(),
                expected.map_or("row 0 with a first run".to_string(), |r| format!("row {r}"))
            )));
        }
        let end = first_row + num_rows;
        if end > nrows {
            return Err(BacktransformError::DimensionMismatch(format!(
                "Rows {first_row}..{end} extend past the end of block {irrep} of `{}` with {nrows} rows",
                self.descriptor.label()
            )));
        }
        Ok(())
    }

    /// Writes consecutive rows into block `irrep`, subject to [`Self::check_write`].
    pub fn write_rows(
        &mut self,
        irrep: usize,
        first_row: usize,
        block: ArrayView2<f64>,
        first_run: bool,
    ) -> Result<(), BacktransformError> {
        self.check_write(irrep, first_row, block.nrows(), first_run)?;
        let mode = if first_run {
            WriteMode::Create
        } else {
            WriteMode::Append
        };
        self.store.write_block(irrep, first_row, block, mode)?;
        self.next_rows[irrep] = Some(first_row + block.nrows());
        Ok(())
    }

    /// Reads a range of rows of block `irrep`.
    pub fn read_rows(
        &self,
        irrep: usize,
        rows: Range<usize>,
    ) -> Result<Array2<f64>, BacktransformError> {
        self.store.read_block(irrep, rows)
    }

    /// Reads the whole of block `irrep`.
    pub fn block(&self, irrep: usize) -> Result<Array2<f64>, BacktransformError> {
        let (nrows, _) = self.descriptor.shape(irrep)?;
        self.store.read_block(irrep, 0..nrows)
    }

    pub fn flush(&mut self) -> Result<(), BacktransformError> {
        self.store.flush()
    }

    /// Visits the stored elements whose magnitudes exceed a threshold, one page at a time.
    ///
    /// Orbitals are numbered irrep by irrep on every leg. Each stored pair appears once, in its
    /// storage ordering, so that triangular pairs carry the sum over both orderings.
    pub fn for_each_quartet<F>(&self, threshold: f64, mut f: F) -> Result<(), BacktransformError>
    where
        F: FnMut(TpdmElement) -> Result<(), BacktransformError>,
    {
        for h in 0..self.descriptor.n_irreps() {
            let row_pairs = absolute_pairs(self.descriptor.row_layout(h)?);
            let col_pairs = absolute_pairs(self.descriptor.col_layout(h)?);
            if row_pairs.is_empty() || col_pairs.is_empty() {
                continue;
            }
            for page in self.descriptor.pages(h)? {
                let first_row = page.start;
                let values = self.store.read_block(h, page)?;
                for (r, row) in values.axis_iter(Axis(0)).enumerate() {
                    let (i, j) = row_pairs[first_row + r];
                    for (value, &(k, l)) in row.iter().zip(col_pairs.iter()) {
                        if value.abs() > threshold {
                            f(TpdmElement::new(i, j, k, l, *value))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Lists the stored elements whose magnitudes exceed a threshold.
    ///
    /// See [`Self::for_each_quartet`] for the numbering of the orbitals.
    pub fn quartets(&self, threshold: f64) -> Result<Vec<TpdmElement>, BacktransformError> {
        let mut elements = vec![];
        self.for_each_quartet(threshold, |element| {
            elements.push(element);
            Ok(())
        })?;
        Ok(elements)
    }
}

/// Returns the stored pairs of a layout as pairs of absolute orbital indices, numbering the
/// orbitals of each leg irrep by irrep.
pub fn absolute_pairs(layout: &PairLayout) -> Vec<(usize, usize)> {
    let offsets = |dims: &[usize]| {
        dims.iter()
            .scan(0, |acc, n| {
                let offset = *acc;
                *acc += n;
                Some(offset)
            })
            .collect::<Vec<_>>()
    };
    let first_offsets = offsets(layout.first_dims());
    let second_offsets = offsets(layout.second_dims());
    layout
        .pairs()
        .into_iter()
        .map(|(gp, p, gq, q)| (first_offsets[gp] + p, second_offsets[gq] + q))
        .collect()
}
