//! File-backed block stores.
//!
//! Each store lives in one file in which every irrep block occupies a contiguous region of
//! row-major little-endian `f64` values, the regions following one another in irrep order.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log;
use ndarray::{Array2, ArrayView2};

use crate::storage::{check_rows, BlockStore, Persistence, StorageBackend, WriteMode};
use crate::transform::BacktransformError;

#[cfg(test)]
#[path = "disk_tests.rs"]
mod disk_tests;

/// Size in bytes of one stored value.
const VALUE_SIZE: u64 = 8;

/// Number of values zeroed per write when a block is created.
const ZERO_CHUNK: usize = 1 << 16;

/// Backend providing [`DiskBlockStore`]s in one directory.
#[derive(Clone, Debug)]
pub struct DiskBackend {
    directory: PathBuf,
}

impl DiskBackend {
    /// Constructs a backend placing its store files in `directory`, which is created if it does
    /// not exist.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, BacktransformError> {
        fs::create_dir_all(directory.as_ref()).map_err(|err| {
            BacktransformError::Io(format!(
                "Unable to create store directory `{}`: {err}",
                directory.as_ref().display()
            ))
        })?;
        Ok(Self {
            directory: directory.as_ref().to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the path of the file of the store labelled `label`.
    pub fn store_path(&self, label: &str) -> PathBuf {
        self.directory.join(format!("{label}.blk"))
    }

    /// Opens an existing persistent store previously created by this backend.
    pub fn open_store(
        &self,
        label: &str,
        shapes: &[(usize, usize)],
    ) -> Result<DiskBlockStore, BacktransformError> {
        let path = self.store_path(label);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                BacktransformError::Io(format!(
                    "Unable to open store file `{}`: {err}",
                    path.display()
                ))
            })?;
        let store = DiskBlockStore::new(label, path, file, shapes, Persistence::Persistent);
        let expected = store.offsets.last().copied().unwrap_or(0);
        let actual = store.file.metadata()?.len();
        if actual != expected {
            return Err(BacktransformError::DimensionMismatch(format!(
                "Store file `{}` holds {actual} bytes but block shapes {shapes:?} require {expected}",
                store.path.display()
            )));
        }
        Ok(store)
    }
}

impl StorageBackend for DiskBackend {
    type Store = DiskBlockStore;

    fn create_store(
        &mut self,
        label: &str,
        shapes: &[(usize, usize)],
        persistence: Persistence,
    ) -> Result<Self::Store, BacktransformError> {
        let path = self.store_path(label);
        log::debug!(
            "Creating {persistence} store `{label}` in `{}` with block shapes {shapes:?}.",
            path.display()
        );
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| {
                BacktransformError::Io(format!(
                    "Unable to create store file `{}`: {err}",
                    path.display()
                ))
            })?;
        let store = DiskBlockStore::new(label, path, file, shapes, persistence);
        // Extending the file fills it with zeros.
        store
            .file
            .set_len(store.offsets.last().copied().unwrap_or(0))?;
        Ok(store)
    }
}

/// Block store keeping all irrep blocks in one file.
///
/// Scratch stores remove their file when dropped.
#[derive(Debug)]
pub struct DiskBlockStore {
    label: String,
    path: PathBuf,
    file: File,
    shapes: Vec<(usize, usize)>,

    /// The byte offset of each irrep block, followed by the total size of the file.
    offsets: Vec<u64>,
    persistence: Persistence,
}

impl DiskBlockStore {
    fn new(
        label: &str,
        path: PathBuf,
        file: File,
        shapes: &[(usize, usize)],
        persistence: Persistence,
    ) -> Self {
        let offsets = std::iter::once(0)
            .chain(shapes.iter().scan(0, |acc, &(nrows, ncols)| {
                *acc += (nrows * ncols) as u64 * VALUE_SIZE;
                Some(*acc)
            }))
            .collect();
        Self {
            label: label.to_string(),
            path,
            file,
            shapes: shapes.to_vec(),
            offsets,
            persistence,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    fn row_offset(&self, irrep: usize, row: usize) -> u64 {
        let (_, ncols) = self.shapes[irrep];
        self.offsets[irrep] + (row * ncols) as u64 * VALUE_SIZE
    }

    fn write_zeros(&mut self, irrep: usize, rows: Range<usize>) -> Result<(), BacktransformError> {
        let (_, ncols) = self.shapes[irrep];
        let mut remaining = rows.len() * ncols;
        if remaining == 0 {
            return Ok(());
        }
        let zeros = vec![0u8; ZERO_CHUNK.min(remaining) * VALUE_SIZE as usize];
        self.file
            .seek(SeekFrom::Start(self.row_offset(irrep, rows.start)))?;
        while remaining > 0 {
            let n = ZERO_CHUNK.min(remaining);
            self.file.write_all(&zeros[..n * VALUE_SIZE as usize])?;
            remaining -= n;
        }
        Ok(())
    }
}

impl BlockStore for DiskBlockStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn n_irreps(&self) -> usize {
        self.shapes.len()
    }

    fn shape(&self, irrep: usize) -> Result<(usize, usize), BacktransformError> {
        check_rows(&self.label, irrep, &self.shapes, &(0..0), None)
    }

    fn read_block(
        &self,
        irrep: usize,
        rows: Range<usize>,
    ) -> Result<Array2<f64>, BacktransformError> {
        let (_, ncols) = check_rows(&self.label, irrep, &self.shapes, &rows, None)?;
        let nrows = rows.len();
        let mut bytes = vec![0u8; nrows * ncols * VALUE_SIZE as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.row_offset(irrep, rows.start)))?;
        file.read_exact(&mut bytes).map_err(|err| {
            BacktransformError::Io(format!(
                "Unable to read rows {}..{} of block {irrep} from `{}`: {err}",
                rows.start,
                rows.end,
                self.path.display()
            ))
        })?;
        let mut values = vec![0.0; nrows * ncols];
        LittleEndian::read_f64_into(&bytes, &mut values);
        Array2::from_shape_vec((nrows, ncols), values)
            .map_err(|err| BacktransformError::DimensionMismatch(err.to_string()))
    }

    fn write_block(
        &mut self,
        irrep: usize,
        first_row: usize,
        block: ArrayView2<f64>,
        mode: WriteMode,
    ) -> Result<(), BacktransformError> {
        let rows = first_row..first_row + block.nrows();
        let (nrows_block, _) =
            check_rows(&self.label, irrep, &self.shapes, &rows, Some(block.ncols()))?;
        if mode == WriteMode::Create {
            self.write_zeros(irrep, 0..rows.start)?;
            self.write_zeros(irrep, rows.end..nrows_block)?;
        }
        let values = block.iter().copied().collect::<Vec<_>>();
        let mut bytes = vec![0u8; values.len() * VALUE_SIZE as usize];
        LittleEndian::write_f64_into(&values, &mut bytes);
        self.file
            .seek(SeekFrom::Start(self.row_offset(irrep, first_row)))?;
        self.file.write_all(&bytes).map_err(|err| {
            BacktransformError::Io(format!(
                "Unable to write rows {}..{} of block {irrep} to `{}`: {err}",
                rows.start,
                rows.end,
                self.path.display()
            ))
        })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BacktransformError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for DiskBlockStore {
    fn drop(&mut self) {
        match self.persistence {
            Persistence::Scratch => {
                if let Err(err) = fs::remove_file(&self.path) {
                    log::warn!(
                        "Unable to remove scratch store file `{}`: {err}",
                        self.path.display()
                    );
                } else {
                    log::debug!("Removed scratch store `{}`.", self.label);
                }
            }
            Persistence::Persistent => {
                if let Err(err) = self.flush() {
                    log::warn!("Unable to flush store `{}`: {err}", self.label);
                }
            }
        }
    }
}
