//! Re-sorting of transformed tensors between pair layouts.

use log;
use ndarray::{s, Array2, Axis};

use crate::storage::descriptor::{BlockDescriptor, TpdmBuffer};
use crate::storage::{BlockStore, Persistence, StorageBackend};
use crate::transform::quarter::pack_triangular;
use crate::transform::BacktransformError;

#[cfg(test)]
#[path = "sort_tests.rs"]
mod sort_tests;

/// Transposes a blocked tensor $`D_{ij,kl}`$ into $`D_{kl,ij}`$, page by page.
///
/// Block $`h`$ of the transposed tensor is the transpose of block $`h \otimes t`$ of the input.
///
/// # Arguments
///
/// * `input` - The tensor to be transposed.
/// * `label` - The label of the transposed tensor.
/// * `budget` - The memory budget of one output page, in double-precision values.
/// * `backend` - The backend providing the scratch store of the transposed tensor.
///
/// # Returns
///
/// The buffer holding the transposed tensor.
pub fn transpose_sort<S, B>(
    input: &TpdmBuffer<S>,
    label: &str,
    budget: usize,
    backend: &mut B,
) -> Result<TpdmBuffer<B::Store>, BacktransformError>
where
    S: BlockStore,
    B: StorageBackend,
{
    let input_descriptor = input.descriptor();
    let descriptor = BlockDescriptor::builder()
        .label(label)
        .target_irrep(input_descriptor.target_irrep())
        .rows(input_descriptor.col_index().clone())
        .cols(input_descriptor.row_index().clone())
        .build()?
        .paged(budget, 0)?;
    let store = backend.create_store(label, &descriptor.shapes()?, Persistence::Scratch)?;
    let mut output = TpdmBuffer::new(descriptor, store)?;

    for h in 0..output.descriptor().n_irreps() {
        let h_in = output.descriptor().col_irrep(h);
        let (_, ncols) = output.descriptor().shape(h)?;
        let input_pages = input_descriptor.pages(h_in)?;
        let output_pages = output.descriptor().pages(h)?;
        log::debug!(
            "Transposing block {h_in} of `{}` into block {h} of `{label}` over {} page(s).",
            input_descriptor.label(),
            output_pages.len()
        );
        for (p, page) in output_pages.into_iter().enumerate() {
            let mut values = Array2::<f64>::zeros((page.len(), ncols));
            for input_page in input_pages.iter() {
                let chunk = input.read_rows(h_in, input_page.clone())?;
                values
                    .slice_mut(s![.., input_page.clone()])
                    .assign(&chunk.slice(s![.., page.clone()]).t());
            }
            output.write_rows(h, page.start, values.view(), p == 0)?;
        }
    }
    Ok(output)
}

/// Sorts rows of one block of a fully transformed tensor into the output pair layouts.
///
/// The transformed tensor holds $`D_{rs,pq}`$ with square pair layouts on both sides. Rows
/// `first_row..first_row + num_rows` of block `irrep` of the output $`D_{pq,rs}`$ are gathered
/// from it, packed into the pair layouts of the output and written.
///
/// # Arguments
///
/// * `transformed` - The fully transformed tensor, with output column pairs as rows.
/// * `output` - The output buffer.
/// * `irrep` - The output block to be written.
/// * `first_row` - The first output row to be written.
/// * `num_rows` - The number of output rows to be written.
/// * `first_run` - Whether this is the first write into the output block, in which case the
/// block is created afresh and `first_row` must be zero. Otherwise, `first_row` must be the
/// row following the previous write into the block.
///
/// # Errors
///
/// Errors with [`BacktransformError::DimensionMismatch`] if the rows overlap or leave a gap with
/// the rows already written, if they extend past the end of the block, or if the transformed
/// tensor does not hold the square counterparts of the output pair layouts.
pub fn sort_so_tpdm<S, O>(
    transformed: &TpdmBuffer<S>,
    output: &mut TpdmBuffer<O>,
    irrep: usize,
    first_row: usize,
    num_rows: usize,
    first_run: bool,
) -> Result<(), BacktransformError>
where
    S: BlockStore,
    O: BlockStore,
{
    output.check_write(irrep, first_row, num_rows, first_run)?;
    let g = output.descriptor().col_irrep(irrep);
    let row_layout = output.descriptor().row_layout(irrep)?.clone();
    let col_layout = output.descriptor().col_layout(irrep)?.clone();
    let (n_rs, n_pq) = transformed.descriptor().shape(g)?;
    if n_rs != col_layout.to_square().len() || n_pq != row_layout.to_square().len() {
        return Err(BacktransformError::DimensionMismatch(format!(
            "Block {g} of `{}` with shape ({n_rs}, {n_pq}) cannot be sorted into block {irrep} of `{}`",
            transformed.descriptor().label(),
            output.descriptor().label()
        )));
    }

    let row_sources = row_layout.square_sources();
    let row_sources = &row_sources[first_row..first_row + num_rows];

    // Gathered rows of the output in square column pairs.
    let mut gathered = Array2::<f64>::zeros((num_rows, n_rs));
    for page in transformed.descriptor().pages(g)? {
        let chunk = transformed.read_rows(g, page.clone())?;
        gathered
            .axis_iter_mut(Axis(0))
            .zip(row_sources.iter())
            .for_each(|(mut gathered_row, sources)| {
                let mut target = gathered_row.slice_mut(s![page.clone()]);
                sources
                    .iter()
                    .for_each(|&src| target += &chunk.column(src));
            });
    }

    let values = pack_triangular(gathered.view(), &col_layout)?;
    output.write_rows(irrep, first_row, values.view(), first_run)
}
