//! YAML input for back-transformation runs.

use std::path::PathBuf;

use anyhow::{self, ensure, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::basis::space::{OrbitalSpace, OrbitalSpaceKind, SpaceSet};
use crate::interfaces::binaries::BinariesBasisChangeSource;
use crate::interfaces::InputHandle;
use crate::io::format::{log_title, tpdm_error, tpdm_output};
use crate::io::{write_tpdm_binary, write_tpdm_descriptor, TpdmFileType};
use crate::storage::disk::DiskBackend;
use crate::storage::quartet::QuartetFile;
use crate::symmetry::PointGroup;
use crate::transform::tpdm::{TpdmBackTransform, TpdmBackTransformParams};
use crate::transform::{BasisTransform, SpinCase, TransformationType};


fn default_scratch_dir() -> PathBuf {
    PathBuf::from(".")
}

/// A structure containing back-transformation input which can be serialised into and
/// deserialised from a YAML input file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// The point group in which the orbitals and the target basis functions are
    /// symmetry-adapted.
    pub point_group: PointGroup,

    /// The orbital spaces of the source basis, in order.
    pub spaces: Vec<OrbitalSpace>,

    /// The number of target basis functions of each irrep.
    pub target_dims: Vec<usize>,

    /// The binary files holding the basis-change matrices.
    pub basis_change: BinariesBasisChangeSource,

    /// The quartet files holding the source-basis density, one per spin case.
    pub density: IndexMap<SpinCase, PathBuf>,

    /// The control parameters of the back-transformation.
    ///
    /// # Default
    ///
    /// If not specified, default parameters are used, which leave the transformation type unset.
    #[serde(default)]
    pub parameters: TpdmBackTransformParams,

    /// The directory holding scratch and output stores.
    ///
    /// # Default
    ///
    /// The working directory.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            point_group: PointGroup::C1,
            spaces: vec![OrbitalSpace::builder()
                .name("act")
                .kind(OrbitalSpaceKind::Active)
                .dims(vec![1])
                .build()
                .expect("Unable to construct a default orbital space.")],
            target_dims: vec![1],
            basis_change: BinariesBasisChangeSource::default(),
            density: IndexMap::from([(SpinCase::Total, PathBuf::from("path/to/mo/tpdm"))]),
            parameters: TpdmBackTransformParams::builder()
                .transformation_type(Some(TransformationType::Restricted))
                .build()
                .expect("Unable to construct default back-transformation parameters."),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl Input {
    /// Validates the orbital spaces of this input.
    pub fn space_set(&self) -> Result<SpaceSet, anyhow::Error> {
        SpaceSet::new(self.point_group, self.spaces.clone())
            .with_context(|| "Unable to construct the orbital spaces from the input")
    }

    /// Returns the density source of this input.
    pub fn density_source(&self) -> QuartetFile {
        self.density
            .iter()
            .fold(QuartetFile::new(), |source, (spin, path)| {
                source.with_spin(*spin, path)
            })
    }
}

impl InputHandle for Input {
    fn handle(&self) -> Result<(), anyhow::Error> {
        let spaces = self.space_set()?;
        ensure!(
            self.target_dims.len() == spaces.n_irreps(),
            "{} target basis dimensions given for point group {} with {} irreps",
            self.target_dims.len(),
            self.point_group,
            spaces.n_irreps()
        );
        let basis_change = self
            .basis_change
            .basis_change(&spaces, &self.target_dims)
            .with_context(|| "Unable to read the basis-change matrices when handling input")?;
        let source = self.density_source();
        let backend = DiskBackend::new(&self.scratch_dir).with_context(|| {
            format!(
                "Unable to set up stores in `{}` when handling input",
                self.scratch_dir.display()
            )
        })?;

        log_title("Two-Particle Density Back-Transformation");
        tpdm_output!("");
        let mut driver = TpdmBackTransform::builder()
            .parameters(&self.parameters)
            .spaces(&spaces)
            .target_dims(self.target_dims.clone())
            .basis_change(&basis_change)
            .source(&source)
            .backend(backend.clone())
            .build()
            .with_context(|| "Unable to construct a back-transformation driver when handling input")?;
        driver
            .run()
            .map_err(|err| {
                tpdm_error!("{err}");
                err
            })
            .with_context(|| "Unable to run the back-transformation when handling input")?;
        driver
            .finalise()
            .with_context(|| "Unable to finalise the back-transformation when handling input")?;

        if self.parameters.output_type.writes_blocks() {
            let result = driver
                .result()
                .with_context(|| "Unable to retrieve the back-transformation result")?;
            for buffer in result.outputs().values() {
                write_tpdm_descriptor(&backend, buffer).with_context(|| {
                    format!(
                        "Unable to write the descriptor of density `{}`",
                        buffer.descriptor().label()
                    )
                })?;
                tpdm_output!(
                    "Density `{}` written to `{}`.",
                    buffer.descriptor().label(),
                    buffer.store().path().display()
                );
            }
            write_tpdm_binary(
                backend.directory().join(&self.parameters.output_label),
                TpdmFileType::Par,
                &self.parameters,
            )
            .with_context(|| "Unable to write the back-transformation parameters")?;
            tpdm_output!("");
        }
        Ok(())
    }
}
