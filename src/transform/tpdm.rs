//! Back-transformation of two-particle densities from a source orbital basis into a target
//! basis.
//!
//! The density $`\Gamma_{ij,kl}`$ over participating source orbitals is transformed into
//!
//! ```math
//!     \Gamma_{pq,rs} = \sum_{ijkl} M_{ip} M_{jq} \Gamma_{ij,kl} M_{kr} M_{ls}
//! ```
//!
//! in four quarter transformations. Each spin case passes through the following stages, every
//! intermediate living in a scratch store that is released as soon as the next stage has
//! consumed it:
//!
//! 1. the source quartets are presorted into blocks $`(ij|kl)`$;
//! 2. the column pairs are transformed, $`(ij|kl) \to (ij|rs)`$;
//! 3. the blocks are transposed, $`(ij|rs) \to (rs|ij)`$;
//! 4. the former row pairs are transformed, $`(rs|ij) \to (rs|pq)`$;
//! 5. the result is sorted into the output pair layouts, $`(rs|pq) \to (pq|rs)`$.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use indexmap::IndexMap;
use log;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::basis::basis_change::SpinBasisChange;
use crate::basis::space::{FrozenOrbitals, SpaceSet};
use crate::io::format::{
    log_macsec_begin, log_macsec_end, log_subtitle, nice_bool, tpdm_output, write_subtitle,
    TpdmOutput,
};
use crate::storage::descriptor::{BlockDescriptor, TpdmBuffer};
use crate::storage::pair::{PairIndex, PairStorage};
use crate::storage::quartet::{write_quartet, TpdmSource};
use crate::storage::{rows_per_page, BlockStore, Persistence, StorageBackend};
use crate::transform::presort;
use crate::transform::quarter::half_transform;
use crate::transform::sort::{sort_so_tpdm, transpose_sort};
use crate::transform::{
    BacktransformError, BasisTransform, MoOrdering, OutputType, SpinCase, TransformationType,
};

#[cfg(test)]
#[path = "tpdm_tests.rs"]
mod tpdm_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

const fn default_memory_mb() -> f64 {
    256.0
}

const fn default_quartet_threshold() -> f64 {
    1e-14
}

fn default_output_label() -> String {
    "so_tpdm".to_string()
}

/// Structure containing control parameters for two-particle density back-transformations.
#[derive(Clone, Builder, Debug, PartialEq, Serialize, Deserialize)]
pub struct TpdmBackTransformParams {
    /// The spin treatment of the transformation. This must be set before a transformation can
    /// be constructed.
    #[builder(default = "None")]
    #[serde(default)]
    pub transformation_type: Option<TransformationType>,

    /// The storage formats of the transformed density.
    #[builder(default)]
    #[serde(default)]
    pub output_type: OutputType,

    /// The numbering of absolute orbital indices in source quartet lists.
    #[builder(default)]
    #[serde(default)]
    pub mo_ordering: MoOrdering,

    /// The frozen orbitals to be excluded from the transformation.
    #[builder(default)]
    #[serde(default)]
    pub frozen_orbitals: FrozenOrbitals,

    /// The storage of pairs whose legs run over the same orbitals, used for both the source and
    /// the target densities.
    #[builder(default)]
    #[serde(default)]
    pub pair_storage: PairStorage,

    /// The memory budget of one page, in mebibytes. Pages never hold fewer than one row,
    /// whatever the budget.
    #[builder(default = "default_memory_mb()")]
    #[serde(default = "default_memory_mb")]
    pub memory_mb: f64,

    /// The magnitude above which transformed elements are written to the quartet list.
    #[builder(default = "default_quartet_threshold()")]
    #[serde(default = "default_quartet_threshold")]
    pub quartet_threshold: f64,

    /// The path of the quartet list to be written. For unrestricted transformations, the spin
    /// case is appended to the file stem.
    #[builder(default = "None")]
    #[serde(default)]
    pub quartet_file: Option<PathBuf>,

    /// The label of the output density, also used to name its stores.
    #[builder(default = "default_output_label()")]
    #[serde(default = "default_output_label")]
    pub output_label: String,
}

impl TpdmBackTransformParams {
    /// Returns a builder to construct a [`TpdmBackTransformParams`] structure.
    pub fn builder() -> TpdmBackTransformParamsBuilder {
        TpdmBackTransformParamsBuilder::default()
    }

    /// Returns the memory budget of one page in double-precision values.
    pub fn budget(&self) -> usize {
        (self.memory_mb * 1024.0 * 1024.0 / std::mem::size_of::<f64>() as f64) as usize
    }

    /// Returns the path of the quartet list of a spin case, if one has been requested.
    pub fn quartet_path(&self, spin: SpinCase) -> Option<PathBuf> {
        let path = self.quartet_file.as_ref()?;
        if spin == SpinCase::Total {
            return Some(path.clone());
        }
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "quartets".to_string());
        let name = match path.extension() {
            Some(ext) => format!("{stem}_{}.{}", spin.tag(), ext.to_string_lossy()),
            None => format!("{stem}_{}", spin.tag()),
        };
        Some(path.with_file_name(name))
    }
}

impl Default for TpdmBackTransformParams {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to construct a default `TpdmBackTransformParams`.")
    }
}

impl fmt::Display for TpdmBackTransformParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Transformation type: {}",
            self.transformation_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "--".to_string())
        )?;
        writeln!(f, "Output type: {}", self.output_type)?;
        writeln!(f, "MO ordering of source quartets: {}", self.mo_ordering)?;
        writeln!(f, "Frozen orbitals excluded: {}", self.frozen_orbitals)?;
        writeln!(f, "Pair storage: {}", self.pair_storage)?;
        writeln!(f)?;
        writeln!(f, "Memory per page: {:.3} MiB", self.memory_mb)?;
        writeln!(f, "Output label: {}", self.output_label)?;
        writeln!(
            f,
            "Write quartet list: {}",
            nice_bool(self.output_type.writes_quartets())
        )?;
        if let Some(path) = self.quartet_file.as_ref() {
            writeln!(f, "Quartet file: {}", path.display())?;
            writeln!(f, "Quartet threshold: {:.3e}", self.quartet_threshold)?;
        }
        Ok(())
    }
}

// ------
// Result
// ------

/// Structure containing the transformed densities.
pub struct TpdmBackTransformResult<S: BlockStore> {
    /// The spin treatment of the transformation.
    transformation_type: TransformationType,

    /// The transformed density of each spin case.
    outputs: IndexMap<SpinCase, TpdmBuffer<S>>,

    /// The number of elements written to the quartet list of each spin case.
    quartet_counts: IndexMap<SpinCase, usize>,
}

impl<S: BlockStore> TpdmBackTransformResult<S> {
    pub fn transformation_type(&self) -> TransformationType {
        self.transformation_type
    }

    pub fn outputs(&self) -> &IndexMap<SpinCase, TpdmBuffer<S>> {
        &self.outputs
    }

    /// Returns the transformed density of a spin case.
    pub fn output(&self, spin: SpinCase) -> Option<&TpdmBuffer<S>> {
        self.outputs.get(&spin)
    }

    /// Returns the number of elements written to the quartet list of a spin case.
    pub fn quartet_count(&self, spin: SpinCase) -> Option<usize> {
        self.quartet_counts.get(&spin).copied()
    }

    /// Consumes the result and returns the transformed densities.
    pub fn into_outputs(self) -> IndexMap<SpinCase, TpdmBuffer<S>> {
        self.outputs
    }
}

impl<S: BlockStore> fmt::Display for TpdmBackTransformResult<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(
            f,
            &format!("{} back-transformation results", self.transformation_type),
        )?;
        writeln!(f)?;
        for (spin, buffer) in self.outputs.iter() {
            writeln!(f, "> {spin} density")?;
            write!(f, "{}", buffer.descriptor())?;
            if let Some(count) = self.quartet_counts.get(spin) {
                writeln!(f, "  Quartets written: {count}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl<S: BlockStore> fmt::Debug for TpdmBackTransformResult<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{self}")
    }
}

// ------
// Driver
// ------

// ~~~~~~~~~~~~~~~~~
// Struct definition
// ~~~~~~~~~~~~~~~~~

/// Driver structure for back-transforming two-particle densities.
#[derive(Builder)]
#[builder(
    pattern = "owned",
    build_fn(validate = "Self::validate", error = "BacktransformError")
)]
pub struct TpdmBackTransform<'a, T, B>
where
    T: TpdmSource,
    B: StorageBackend,
{
    /// The control parameters of the transformation.
    parameters: &'a TpdmBackTransformParams,

    /// The orbital spaces of the source basis.
    spaces: &'a SpaceSet,

    /// The number of target basis functions of each irrep.
    target_dims: Vec<usize>,

    /// The basis-change matrices from the source basis into the target basis.
    basis_change: &'a SpinBasisChange,

    /// The source-basis density.
    source: &'a T,

    /// The backend providing every store used by the transformation.
    backend: B,

    /// The descriptor of the presorted source-basis density.
    #[builder(setter(skip), default = "None")]
    source_descriptor: Option<BlockDescriptor>,

    /// The result of the transformation.
    #[builder(setter(skip), default = "None")]
    result: Option<TpdmBackTransformResult<B::Store>>,
}

impl<'a, T, B> TpdmBackTransformBuilder<'a, T, B>
where
    T: TpdmSource,
    B: StorageBackend,
{
    fn validate(&self) -> Result<(), String> {
        let params = self
            .parameters
            .ok_or("No back-transformation parameters found.".to_string())?;
        let transformation_type = params
            .transformation_type
            .ok_or("The transformation type has not been set.".to_string())?;
        if !params.memory_mb.is_finite() || params.memory_mb <= 0.0 {
            return Err(format!(
                "The memory budget must be positive, but {} MiB was given.",
                params.memory_mb
            ));
        }
        if params.output_type.writes_quartets() && params.quartet_file.is_none() {
            return Err(format!(
                "The output type `{}` requires a quartet file.",
                params.output_type
            ));
        }

        let spaces = self.spaces.ok_or("No orbital spaces found.".to_string())?;
        let participating = spaces
            .participating(params.frozen_orbitals)
            .map_err(|err| err.to_string())?;
        let target_dims = self
            .target_dims
            .as_ref()
            .ok_or("No target basis dimensions found.".to_string())?;
        if target_dims.len() != spaces.n_irreps() {
            return Err(format!(
                "{} target basis dimensions supplied for {} irreps.",
                target_dims.len(),
                spaces.n_irreps()
            ));
        }

        let basis_change = self
            .basis_change
            .ok_or("No basis-change matrices found.".to_string())?;
        match (transformation_type, basis_change.is_restricted()) {
            (TransformationType::Restricted, false) => {
                return Err(
                    "A restricted transformation requires one shared set of basis-change matrices."
                        .to_string(),
                )
            }
            (TransformationType::Unrestricted, true) => {
                return Err(
                    "An unrestricted transformation requires separate alpha and beta basis-change matrices."
                        .to_string(),
                )
            }
            _ => {}
        }
        for set in basis_change.sets() {
            if let Some(space) = participating
                .space_indices
                .iter()
                .map(|&i| &spaces.spaces()[i])
                .find(|space| set.space(space.name()).is_none())
            {
                return Err(format!(
                    "No basis-change matrices found for orbital space `{}`.",
                    space.name()
                ));
            }
        }
        if self.source.is_none() {
            return Err("No source density found.".to_string());
        }
        Ok(())
    }
}

// ~~~~~~~~~~~~~~~~~~~~~~
// Struct implementations
// ~~~~~~~~~~~~~~~~~~~~~~

impl<'a, T, B> TpdmBackTransform<'a, T, B>
where
    T: TpdmSource,
    B: StorageBackend,
{
    /// Returns a builder to construct a [`TpdmBackTransform`] structure.
    pub fn builder() -> TpdmBackTransformBuilder<'a, T, B> {
        TpdmBackTransformBuilder::default()
    }

    fn transformation_type(&self) -> Result<TransformationType, BacktransformError> {
        self.parameters.transformation_type.ok_or_else(|| {
            BacktransformError::Configuration("The transformation type has not been set".to_string())
        })
    }

    /// Returns the descriptor of the presorted source-basis density, constructing it if
    /// necessary.
    fn source_descriptor(&mut self) -> Result<BlockDescriptor, BacktransformError> {
        if let Some(descriptor) = self.source_descriptor.as_ref() {
            return Ok(descriptor.clone());
        }
        let dims = self
            .spaces
            .participating(self.parameters.frozen_orbitals)?
            .dims;
        let index = PairIndex::new(&dims, &dims, self.parameters.pair_storage)?;
        let descriptor = BlockDescriptor::builder()
            .label(format!("{}_mo", self.parameters.output_label))
            .target_irrep(self.spaces.point_group().totally_symmetric())
            .rows(index.clone())
            .cols(index)
            .build()?
            .paged(self.parameters.budget(), 0)?;
        self.source_descriptor = Some(descriptor.clone());
        Ok(descriptor)
    }

    /// Presorts the source-basis density of one spin case into symmetry blocks.
    pub fn presort_mo_tpdm(
        &mut self,
        spin: SpinCase,
    ) -> Result<TpdmBuffer<B::Store>, BacktransformError> {
        let orbital_map = self
            .spaces
            .orbital_map(self.parameters.frozen_orbitals, self.parameters.mo_ordering)?;
        let descriptor = self.source_descriptor()?;
        let descriptor = descriptor.relabelled(&format!("{}_{}", descriptor.label(), spin.tag()));
        presort::presort_mo_tpdm(
            self.source,
            spin,
            &orbital_map,
            &descriptor,
            &mut self.backend,
        )
    }

    /// Presorts the alpha-alpha, beta-beta and alpha-beta source-basis densities into symmetry
    /// blocks.
    pub fn presort_mo_tpdm_unrestricted(
        &mut self,
    ) -> Result<IndexMap<SpinCase, TpdmBuffer<B::Store>>, BacktransformError> {
        let orbital_map = self
            .spaces
            .orbital_map(self.parameters.frozen_orbitals, self.parameters.mo_ordering)?;
        let descriptor = self.source_descriptor()?;
        presort::presort_mo_tpdm_unrestricted(
            self.source,
            &orbital_map,
            &descriptor,
            &mut self.backend,
        )
    }

    /// Sets up the output buffer of one spin case.
    ///
    /// The output has the irrep structure and target irrep of the source density, with pair
    /// layouts over the target basis functions. Its store is persistent if symmetry blocks are
    /// part of the requested output.
    ///
    /// # Arguments
    ///
    /// * `source_descriptor` - The descriptor of the presorted source-basis density.
    /// * `spin` - The spin case of the output, used to label its store.
    ///
    /// # Errors
    ///
    /// Errors with [`BacktransformError::Configuration`] if the source descriptor does not have
    /// one block per irrep of the point group.
    pub fn setup_tpdm_buffer(
        &mut self,
        source_descriptor: &BlockDescriptor,
        spin: SpinCase,
    ) -> Result<TpdmBuffer<B::Store>, BacktransformError> {
        let n_irreps = self.spaces.n_irreps();
        if source_descriptor.n_irreps() != n_irreps {
            return Err(BacktransformError::Configuration(format!(
                "Tensor `{}` has {} irrep blocks, but point group {} has {n_irreps} irreps",
                source_descriptor.label(),
                source_descriptor.n_irreps(),
                self.spaces.point_group()
            )));
        }
        let index = PairIndex::new(
            &self.target_dims,
            &self.target_dims,
            self.parameters.pair_storage,
        )?;
        let label = match spin {
            SpinCase::Total => self.parameters.output_label.clone(),
            _ => format!("{}_{}", self.parameters.output_label, spin.tag()),
        };
        let descriptor = BlockDescriptor::builder()
            .label(label)
            .target_irrep(source_descriptor.target_irrep())
            .rows(index.clone())
            .cols(index)
            .build()?;
        // Each output row is gathered over the square column pairs before being packed.
        let rows_per_page = (0..n_irreps)
            .map(|h| {
                let nrows = descriptor.row_layout(h)?.len();
                let col_layout = descriptor.col_layout(h)?;
                Ok(rows_per_page(
                    nrows,
                    col_layout.len() + col_layout.to_square().len(),
                    self.parameters.budget(),
                ))
            })
            .collect::<Result<Vec<_>, BacktransformError>>()?;
        let descriptor = descriptor.with_rows_per_page(rows_per_page);
        let persistence = if self.parameters.output_type.writes_blocks() {
            Persistence::Persistent
        } else {
            Persistence::Scratch
        };
        let store =
            self.backend
                .create_store(descriptor.label(), &descriptor.shapes()?, persistence)?;
        TpdmBuffer::new(descriptor, store)
    }

    /// Transforms both legs of the column pairs of every block of a tensor, page by page.
    fn transform_columns<S: BlockStore>(
        &mut self,
        input: &TpdmBuffer<S>,
        label: &str,
        first: &[Array2<f64>],
        second: &[Array2<f64>],
    ) -> Result<TpdmBuffer<B::Store>, BacktransformError> {
        let input_descriptor = input.descriptor();
        let cols = PairIndex::new(&self.target_dims, &self.target_dims, PairStorage::Square)?;
        let descriptor = BlockDescriptor::builder()
            .label(label)
            .target_irrep(input_descriptor.target_irrep())
            .rows(input_descriptor.row_index().clone())
            .cols(cols)
            .build()?
            .paged(self.parameters.budget(), 0)?;

        // A page holds the input rows, their square expansion, the half-transformed rows and
        // the transformed rows.
        let rows_per_page = (0..input_descriptor.n_irreps())
            .map(|h| {
                let (nrows, ncols_in) = input_descriptor.shape(h)?;
                let col_layout = input_descriptor.col_layout(h)?;
                let ncols_square = col_layout.to_square().len();
                let ncols_half = col_layout
                    .first_dims()
                    .iter()
                    .zip(descriptor.col_layout(h)?.second_dims().iter())
                    .map(|(np, nt)| np * nt)
                    .sum::<usize>();
                let (_, ncols_out) = descriptor.shape(h)?;
                Ok(rows_per_page(
                    nrows,
                    ncols_in + ncols_square + ncols_half + ncols_out,
                    self.parameters.budget(),
                ))
            })
            .collect::<Result<Vec<_>, BacktransformError>>()?;
        let input_pages = input_descriptor.with_rows_per_page(rows_per_page);
        let store = self.backend.create_store(
            label,
            &descriptor.shapes()?,
            Persistence::Scratch,
        )?;
        let mut output = TpdmBuffer::new(descriptor, store)?;

        for h in 0..input_descriptor.n_irreps() {
            let col_layout = input_descriptor.col_layout(h)?;
            let pages = input_pages.pages(h)?;
            log::debug!(
                "Transforming the columns of block {h} of `{}` over {} page(s).",
                input_descriptor.label(),
                pages.len()
            );
            for (p, page) in pages.into_iter().enumerate() {
                let values = input.read_rows(h, page.clone())?;
                let (transformed, _) = half_transform(values.view(), col_layout, first, second)?;
                output.write_rows(h, page.start, transformed.view(), p == 0)?;
            }
        }
        Ok(output)
    }

    /// Transforms one presorted spin case into the target basis.
    fn transform_spin_case(
        &mut self,
        spin: SpinCase,
        presorted: TpdmBuffer<B::Store>,
    ) -> Result<TpdmBuffer<B::Store>, BacktransformError> {
        let (row_bc, col_bc) = self.basis_change.for_spin_case(spin)?;
        let frozen_orbitals = self.parameters.frozen_orbitals;
        let row_matrices = row_bc.combined(self.spaces, frozen_orbitals)?;
        let col_matrices = col_bc.combined(self.spaces, frozen_orbitals)?;
        for matrices in [&row_matrices, &col_matrices] {
            if let Some((h, mat)) = matrices
                .iter()
                .enumerate()
                .find(|(h, mat)| mat.ncols() != self.target_dims[*h])
            {
                return Err(BacktransformError::DimensionMismatch(format!(
                    "The basis-change matrix of irrep {h} has {} columns, but the target basis has {} functions in that irrep",
                    mat.ncols(),
                    self.target_dims[h]
                )));
            }
        }

        let label = presorted.descriptor().label().to_string();
        let source_descriptor = presorted.descriptor().clone();

        // (ij|kl) -> (ij|rs)
        let half = self.transform_columns(
            &presorted,
            &format!("{label}_half"),
            &col_matrices,
            &col_matrices,
        )?;
        drop(presorted);

        // (ij|rs) -> (rs|ij)
        let budget = self.parameters.budget();
        let transposed = transpose_sort(
            &half,
            &format!("{label}_transposed"),
            budget,
            &mut self.backend,
        )?;
        drop(half);

        // (rs|ij) -> (rs|pq)
        let transformed = self.transform_columns(
            &transposed,
            &format!("{label}_full"),
            &row_matrices,
            &row_matrices,
        )?;
        drop(transposed);

        // (rs|pq) -> (pq|rs)
        let mut output = self.setup_tpdm_buffer(&source_descriptor, spin)?;
        for h in 0..output.descriptor().n_irreps() {
            for (p, page) in output.descriptor().pages(h)?.into_iter().enumerate() {
                sort_so_tpdm(
                    &transformed,
                    &mut output,
                    h,
                    page.start,
                    page.len(),
                    p == 0,
                )?;
            }
        }
        Ok(output)
    }

    /// Back-transforms the spin-summed density with one set of basis-change matrices on all
    /// four legs.
    pub fn backtransform_tpdm_restricted(
        &mut self,
    ) -> Result<IndexMap<SpinCase, TpdmBuffer<B::Store>>, BacktransformError> {
        let presorted = self.presort_mo_tpdm(SpinCase::Total)?;
        log_presorted(SpinCase::Total, &presorted);
        let output = self.transform_spin_case(SpinCase::Total, presorted)?;
        log_transformed(SpinCase::Total, &output);
        Ok(IndexMap::from([(SpinCase::Total, output)]))
    }

    /// Back-transforms the alpha-alpha, beta-beta and alpha-beta densities, each into its own
    /// output buffer.
    ///
    /// The alpha matrices act on both legs of alpha pairs and the beta matrices on both legs of
    /// beta pairs, the alpha-beta density having alpha row pairs and beta column pairs.
    pub fn backtransform_tpdm_unrestricted(
        &mut self,
    ) -> Result<IndexMap<SpinCase, TpdmBuffer<B::Store>>, BacktransformError> {
        let presorted = self.presort_mo_tpdm_unrestricted()?;
        presorted
            .into_iter()
            .map(|(spin, buffer)| {
                log_presorted(spin, &buffer);
                let output = self.transform_spin_case(spin, buffer)?;
                log_transformed(spin, &output);
                Ok((spin, output))
            })
            .collect()
    }

    /// Performs the whole back-transformation for the configured transformation type and stores
    /// the output buffers in the result, replacing any previous result.
    pub fn backtransform_density(&mut self) -> Result<(), BacktransformError> {
        let transformation_type = self.transformation_type()?;
        log_macsec_begin("Two-particle density back-transformation");
        tpdm_output!("");
        self.parameters.log_output_display();
        tpdm_output!("");
        self.spaces.log_output_display();
        tpdm_output!("");
        self.result = None;
        let outputs = match transformation_type {
            TransformationType::Restricted => self.backtransform_tpdm_restricted()?,
            TransformationType::Unrestricted => self.backtransform_tpdm_unrestricted()?,
        };
        self.result = Some(TpdmBackTransformResult {
            transformation_type,
            outputs,
            quartet_counts: IndexMap::new(),
        });
        log_macsec_end("Two-particle density back-transformation");
        tpdm_output!("");
        Ok(())
    }

    /// Returns the transformed density of a spin case, if the transformation has been run.
    pub fn output(&self, spin: SpinCase) -> Option<&TpdmBuffer<B::Store>> {
        self.result.as_ref()?.output(spin)
    }

    /// Consumes the driver and returns its result, if the transformation has been run.
    pub fn into_result(self) -> Option<TpdmBackTransformResult<B::Store>> {
        self.result
    }
}

impl<'a, T, B> BasisTransform for TpdmBackTransform<'a, T, B>
where
    T: TpdmSource,
    B: StorageBackend,
{
    type Outcome = TpdmBackTransformResult<B::Store>;

    fn prepare(&mut self) -> Result<(), BacktransformError> {
        let frozen_orbitals = self.parameters.frozen_orbitals;
        for set in self.basis_change.sets() {
            set.combined(self.spaces, frozen_orbitals)?;
        }
        self.source_descriptor = None;
        let descriptor = self.source_descriptor()?;
        log::debug!("Presorted density layout:\n{descriptor}");
        Ok(())
    }

    fn run(&mut self) -> Result<(), BacktransformError> {
        if self.source_descriptor.is_none() {
            self.prepare()?;
        }
        self.backtransform_density()
    }

    fn finalise(&mut self) -> Result<(), BacktransformError> {
        let result = self.result.as_mut().ok_or_else(|| {
            BacktransformError::Configuration(
                "No back-transformation result to finalise".to_string(),
            )
        })?;
        for buffer in result.outputs.values_mut() {
            buffer.flush()?;
        }
        if self.parameters.output_type.writes_quartets() {
            for (spin, buffer) in result.outputs.iter() {
                let path = self.parameters.quartet_path(*spin).ok_or_else(|| {
                    BacktransformError::Configuration(
                        "A quartet list has been requested without a quartet file".to_string(),
                    )
                })?;
                let count = write_buffer_quartets(buffer, &path, self.parameters.quartet_threshold)?;
                tpdm_output!(
                    "{count} {spin} quartet(s) above {:.3e} written to `{}`.",
                    self.parameters.quartet_threshold,
                    path.display()
                );
                result.quartet_counts.insert(*spin, count);
            }
        }
        log_subtitle("Back-transformation summary");
        tpdm_output!("");
        result.log_output_display();
        Ok(())
    }

    fn result(&self) -> Result<&Self::Outcome, BacktransformError> {
        self.result.as_ref().ok_or_else(|| {
            BacktransformError::Configuration("No back-transformation result found".to_string())
        })
    }
}

// =========
// Functions
// =========

/// Writes the elements of a buffer above a threshold to a quartet file.
fn write_buffer_quartets<S: BlockStore>(
    buffer: &TpdmBuffer<S>,
    path: &Path,
    threshold: f64,
) -> Result<usize, BacktransformError> {
    let file = File::create(path).map_err(|err| {
        BacktransformError::Io(format!(
            "Unable to create quartet file `{}`: {err}",
            path.display()
        ))
    })?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;
    buffer.for_each_quartet(threshold, |element| {
        write_quartet(&mut writer, &element)?;
        count += 1;
        Ok(())
    })?;
    std::io::Write::flush(&mut writer)?;
    Ok(count)
}

fn log_presorted<S: BlockStore>(spin: SpinCase, buffer: &TpdmBuffer<S>) {
    log_subtitle(&format!("Back-transformation of the {spin} density"));
    tpdm_output!("");
    tpdm_output!("Presorted source density:");
    buffer.descriptor().log_output_display();
}

fn log_transformed<S: BlockStore>(spin: SpinCase, buffer: &TpdmBuffer<S>) {
    tpdm_output!("Transformed {spin} density:");
    buffer.descriptor().log_output_display();
    tpdm_output!("");
}
