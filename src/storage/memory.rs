//! In-memory block stores.

use std::ops::Range;

use log;
use ndarray::{s, Array2, ArrayView2};

use crate::storage::{check_rows, BlockStore, Persistence, StorageBackend, WriteMode};
use crate::transform::BacktransformError;

/// Backend providing [`MemoryBlockStore`]s.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend;

impl StorageBackend for MemoryBackend {
    type Store = MemoryBlockStore;

    fn create_store(
        &mut self,
        label: &str,
        shapes: &[(usize, usize)],
        persistence: Persistence,
    ) -> Result<Self::Store, BacktransformError> {
        log::debug!("Creating {persistence} in-memory store `{label}` with block shapes {shapes:?}.");
        Ok(MemoryBlockStore {
            label: label.to_string(),
            blocks: shapes
                .iter()
                .map(|&(nrows, ncols)| Array2::zeros((nrows, ncols)))
                .collect(),
        })
    }
}

/// Block store keeping every irrep block as a dense matrix in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryBlockStore {
    label: String,
    blocks: Vec<Array2<f64>>,
}

impl MemoryBlockStore {
    /// Returns a whole irrep block.
    pub fn block(&self, irrep: usize) -> Option<&Array2<f64>> {
        self.blocks.get(irrep)
    }

    fn shapes(&self) -> Vec<(usize, usize)> {
        self.blocks.iter().map(|b| b.dim()).collect()
    }
}

impl BlockStore for MemoryBlockStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn n_irreps(&self) -> usize {
        self.blocks.len()
    }

    fn shape(&self, irrep: usize) -> Result<(usize, usize), BacktransformError> {
        check_rows(&self.label, irrep, &self.shapes(), &(0..0), None)
    }

    fn read_block(
        &self,
        irrep: usize,
        rows: Range<usize>,
    ) -> Result<Array2<f64>, BacktransformError> {
        check_rows(&self.label, irrep, &self.shapes(), &rows, None)?;
        Ok(self.blocks[irrep].slice(s![rows, ..]).to_owned())
    }

    fn write_block(
        &mut self,
        irrep: usize,
        first_row: usize,
        block: ArrayView2<f64>,
        mode: WriteMode,
    ) -> Result<(), BacktransformError> {
        let rows = first_row..first_row + block.nrows();
        check_rows(&self.label, irrep, &self.shapes(), &rows, Some(block.ncols()))?;
        if mode == WriteMode::Create {
            self.blocks[irrep].fill(0.0);
        }
        self.blocks[irrep].slice_mut(s![rows, ..]).assign(&block);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BacktransformError> {
        Ok(())
    }
}
