//! Interface with binary data files holding basis-change matrices.

use std::path::{Path, PathBuf};

use anyhow::{format_err, Context};
use byteorder::{BigEndian, LittleEndian};
use indexmap::IndexMap;
use ndarray::{Array2, ShapeBuilder};
use serde::{Deserialize, Serialize};

use crate::basis::basis_change::{BasisChange, SpinBasisChange};
use crate::basis::space::SpaceSet;
use crate::io::numeric::NumericReader;


/// Enumerated type indicating the order the matrix elements are traversed when stored into or
/// read in from a binary file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatrixOrder {
    #[default]
    RowMajor,
    ColMajor,
}

/// Enumerated type indicating the byte order of numerical values in binary files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Paths to the binary files of the basis-change matrices of one spin, keyed by orbital space
/// name. Each space lists one file per irrep, `None` standing for an irrep in which the space or
/// the target basis is empty.
pub type BasisChangeFiles = IndexMap<String, Vec<Option<PathBuf>>>;

/// Serialisable/deserialisable structure describing where basis-change matrices are stored.
///
/// The matrix of a space in irrep $`h`$ has one row per orbital of the space in $`h`$ and one
/// column per target basis function in $`h`$.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinariesBasisChangeSource {
    /// The matrix files of the alpha spin, or of both spins in restricted transformations.
    pub alpha: BasisChangeFiles,

    /// The matrix files of the beta spin. If `None`, one set of matrices is shared by both spins.
    #[serde(default)]
    pub beta: Option<BasisChangeFiles>,

    /// Specification of the order matrix elements are packed in binary files.
    #[serde(default)]
    pub matrix_order: MatrixOrder,

    /// Specification of the byte order numerical values are stored in binary files.
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl Default for BinariesBasisChangeSource {
    fn default() -> Self {
        Self {
            alpha: IndexMap::from([(
                "act".to_string(),
                vec![Some(PathBuf::from("path/to/act/irrep0/matrix"))],
            )]),
            beta: None,
            matrix_order: MatrixOrder::default(),
            byte_order: ByteOrder::default(),
        }
    }
}

impl BinariesBasisChangeSource {
    /// Reads in the basis-change matrices.
    ///
    /// # Arguments
    ///
    /// * `spaces` - The source orbital spaces, which give the row counts of the matrices.
    /// * `target_dims` - The number of target basis functions of each irrep, which give the
    /// column counts of the matrices.
    pub fn basis_change(
        &self,
        spaces: &SpaceSet,
        target_dims: &[usize],
    ) -> Result<SpinBasisChange, anyhow::Error> {
        let alpha = self
            .read_spin(&self.alpha, spaces, target_dims)
            .with_context(|| "Unable to read the alpha basis-change matrices")?;
        match self.beta.as_ref() {
            None => Ok(SpinBasisChange::Restricted(alpha)),
            Some(beta_files) => {
                let beta = self
                    .read_spin(beta_files, spaces, target_dims)
                    .with_context(|| "Unable to read the beta basis-change matrices")?;
                Ok(SpinBasisChange::Unrestricted { alpha, beta })
            }
        }
    }

    fn read_spin(
        &self,
        files: &BasisChangeFiles,
        spaces: &SpaceSet,
        target_dims: &[usize],
    ) -> Result<BasisChange, anyhow::Error> {
        if target_dims.len() != spaces.n_irreps() {
            return Err(format_err!(
                "{} target basis dimensions supplied for {} irreps",
                target_dims.len(),
                spaces.n_irreps()
            ));
        }
        files
            .iter()
            .try_fold(BasisChange::new(), |basis_change, (name, paths)| {
                let space = spaces
                    .space(name)
                    .ok_or_else(|| format_err!("Unknown orbital space `{name}`"))?;
                if paths.len() != spaces.n_irreps() {
                    return Err(format_err!(
                        "Orbital space `{name}` lists {} matrix files, but {} irreps are expected",
                        paths.len(),
                        spaces.n_irreps()
                    ));
                }
                let matrices = paths
                    .iter()
                    .zip(space.dims().iter().zip(target_dims.iter()))
                    .enumerate()
                    .map(|(h, (path, (&nrows, &ncols)))| match path {
                        Some(path) => self.read_matrix(path, nrows, ncols).with_context(|| {
                            format!("Unable to read the matrix of space `{name}` in irrep {h}")
                        }),
                        None if nrows * ncols == 0 => Ok(Array2::zeros((nrows, ncols))),
                        None => Err(format_err!(
                            "No matrix file given for space `{name}` in irrep {h}, which needs a {nrows} x {ncols} matrix"
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(basis_change.with_space(name.clone(), matrices))
            })
    }

    /// Reads one matrix and checks that the file holds exactly the expected number of values.
    pub fn read_matrix(
        &self,
        path: &Path,
        nrows: usize,
        ncols: usize,
    ) -> Result<Array2<f64>, anyhow::Error> {
        let (values, truncated) = match self.byte_order {
            ByteOrder::LittleEndian => read_values::<LittleEndian>(path)?,
            ByteOrder::BigEndian => read_values::<BigEndian>(path)?,
        };
        let n_expected = nrows * ncols;
        if truncated || values.len() != n_expected {
            return Err(format_err!(
                "`{}` holds {}{} values, but a {nrows} x {ncols} matrix needs {n_expected}",
                path.display(),
                values.len(),
                if truncated { " complete" } else { "" },
            ));
        }
        let mat = match self.matrix_order {
            MatrixOrder::RowMajor => Array2::from_shape_vec((nrows, ncols), values),
            MatrixOrder::ColMajor => Array2::from_shape_vec((nrows, ncols).f(), values),
        }
        .map_err(|err| format_err!(err))?;
        Ok(mat)
    }
}

/// Reads every `f64` value of a binary file, reporting whether the file ends part-way through a
/// value.
fn read_values<B: byteorder::ByteOrder>(path: &Path) -> Result<(Vec<f64>, bool), anyhow::Error> {
    let mut reader = NumericReader::<_, B, f64>::from_file(path)?;
    let values = reader.by_ref().collect::<Vec<_>>();
    Ok((values, reader.truncated()))
}
