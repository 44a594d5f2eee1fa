//! Sorting of source-basis density quartets into symmetry blocks.

use indexmap::IndexMap;
use log;
use ndarray::Array2;

use crate::io::format::tpdm_warn;
use crate::storage::descriptor::{BlockDescriptor, TpdmBuffer};
use crate::storage::quartet::{TpdmElement, TpdmSource};
use crate::storage::{Persistence, StorageBackend};
use crate::symmetry::irrep_product;
use crate::transform::{BacktransformError, SpinCase};

#[cfg(test)]
#[path = "presort_tests.rs"]
mod presort_tests;

/// Location of a density element within a blocked tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockPosition {
    irrep: usize,
    row: usize,
    col: usize,
}

/// Locates a density element within a blocked tensor.
///
/// # Returns
///
/// `None` if the element touches an orbital excluded from the transformation.
///
/// # Errors
///
/// Errors with [`BacktransformError::DimensionMismatch`] if an index lies outside the orbital
/// range or if the element is forbidden by symmetry.
fn locate(
    element: &TpdmElement,
    orbital_map: &[Option<(usize, usize)>],
    descriptor: &BlockDescriptor,
) -> Result<Option<BlockPosition>, BacktransformError> {
    let mut legs = [None; 4];
    for (leg, index) in legs.iter_mut().zip(element.indices()) {
        *leg = *orbital_map.get(index).ok_or_else(|| {
            BacktransformError::DimensionMismatch(format!(
                "Orbital index {index} of element ({}, {}, {}, {}) exceeds the {} orbitals available",
                element.i,
                element.j,
                element.k,
                element.l,
                orbital_map.len()
            ))
        })?;
    }
    let [Some((gi, i)), Some((gj, j)), Some((gk, k)), Some((gl, l))] = legs else {
        return Ok(None);
    };
    let row_irrep = irrep_product(gi, gj);
    let col_irrep = irrep_product(gk, gl);
    if col_irrep != descriptor.col_irrep(row_irrep) {
        return Err(BacktransformError::DimensionMismatch(format!(
            "Element ({}, {}, {}, {}) with pair irreps {row_irrep} and {col_irrep} is forbidden by symmetry",
            element.i, element.j, element.k, element.l
        )));
    }
    let row = descriptor.row_layout(row_irrep)?.position(gi, i, j);
    let col = descriptor.col_layout(row_irrep)?.position(gk, k, l);
    match (row, col) {
        (Some(row), Some(col)) => Ok(Some(BlockPosition {
            irrep: row_irrep,
            row,
            col,
        })),
        _ => Err(BacktransformError::DimensionMismatch(format!(
            "Element ({}, {}, {}, {}) has no position in tensor `{}`",
            element.i,
            element.j,
            element.k,
            element.l,
            descriptor.label()
        ))),
    }
}

/// Sorts the source-basis density quartets of one spin case into symmetry blocks.
///
/// The source is streamed once per row page of every irrep block, and the elements falling into
/// the page are accumulated, so that only one page is held in memory at a time. Elements
/// touching excluded orbitals are dropped. Triangular pairs accumulate both orderings of each
/// pair.
///
/// # Arguments
///
/// * `source` - The source-basis density.
/// * `spin` - The spin case to be sorted.
/// * `orbital_map` - The irrep and irrep-local index of every absolute source orbital index, or
/// `None` for excluded orbitals.
/// * `descriptor` - The descriptor of the sorted tensor, including its paging.
/// * `backend` - The backend providing the scratch store of the sorted tensor.
///
/// # Returns
///
/// The buffer holding the sorted tensor.
pub fn presort_mo_tpdm<T, B>(
    source: &T,
    spin: SpinCase,
    orbital_map: &[Option<(usize, usize)>],
    descriptor: &BlockDescriptor,
    backend: &mut B,
) -> Result<TpdmBuffer<B::Store>, BacktransformError>
where
    T: TpdmSource + ?Sized,
    B: StorageBackend,
{
    let store = backend.create_store(
        descriptor.label(),
        &descriptor.shapes()?,
        Persistence::Scratch,
    )?;
    let mut buffer = TpdmBuffer::new(descriptor.clone(), store)?;

    let mut first_pass = true;
    let mut n_elements = 0usize;
    let mut n_dropped = 0usize;
    for h in 0..descriptor.n_irreps() {
        let (_, ncols) = descriptor.shape(h)?;
        for (p, page) in descriptor.pages(h)?.into_iter().enumerate() {
            let mut values = Array2::<f64>::zeros((page.len(), ncols));
            for element in source.elements(spin)? {
                let element = element?;
                let position = locate(&element, orbital_map, descriptor)?;
                if first_pass {
                    n_elements += 1;
                    if position.is_none() {
                        n_dropped += 1;
                    }
                }
                if let Some(BlockPosition { irrep, row, col }) = position {
                    if irrep == h && page.contains(&row) {
                        values[(row - page.start, col)] += element.value;
                    }
                }
            }
            first_pass = false;
            buffer.write_rows(h, page.start, values.view(), p == 0)?;
        }
    }
    log::debug!(
        "Presorted {n_elements} {spin} element(s) into `{}`, {n_dropped} of which touch excluded orbitals.",
        descriptor.label()
    );
    if n_dropped > 0 {
        tpdm_warn!(
            "{n_dropped} {spin} element(s) touching orbitals excluded from the transformation have been skipped."
        );
    }
    Ok(buffer)
}

/// Sorts the source-basis density quartets of the alpha-alpha, beta-beta and alpha-beta spin
/// cases into symmetry blocks.
///
/// # Arguments
///
/// * `source` - The source-basis density.
/// * `orbital_map` - The irrep and irrep-local index of every absolute source orbital index.
/// * `descriptor` - The descriptor of the sorted tensors. The label of each spin case is derived
/// from it.
/// * `backend` - The backend providing the scratch stores of the sorted tensors.
///
/// # Returns
///
/// The buffers holding the sorted tensors, in the order of [`SpinCase::UNRESTRICTED`].
pub fn presort_mo_tpdm_unrestricted<T, B>(
    source: &T,
    orbital_map: &[Option<(usize, usize)>],
    descriptor: &BlockDescriptor,
    backend: &mut B,
) -> Result<IndexMap<SpinCase, TpdmBuffer<B::Store>>, BacktransformError>
where
    T: TpdmSource + ?Sized,
    B: StorageBackend,
{
    SpinCase::UNRESTRICTED
        .iter()
        .map(|&spin| {
            let spin_descriptor =
                descriptor.relabelled(&format!("{}_{}", descriptor.label(), spin.tag()));
            let buffer = presort_mo_tpdm(source, spin, orbital_map, &spin_descriptor, backend)?;
            Ok((spin, buffer))
        })
        .collect()
}
