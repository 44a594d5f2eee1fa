//! Quarter transformations of pages of symmetry-blocked tensors.
//!
//! A page is a set of consecutive rows of one irrep block. Its columns run over the pairs of a
//! square [`PairLayout`], and a quarter transformation contracts one leg of these pairs with the
//! basis-change matrix of each irrep:
//!
//! ```math
//!     Y_{R,pt} = \sum_{s} X_{R,ps} M^{(g_q)}_{st}, \qquad
//!     Y_{R,tq} = \sum_{s} M^{(g_p)}_{st} X_{R,sq}.
//! ```

use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::storage::pair::{PairLayout, PairLeg};
use crate::symmetry::irrep_product;
use crate::transform::BacktransformError;

#[cfg(test)]
#[path = "quarter_tests.rs"]
mod quarter_tests;

/// Contracts one leg of the column pairs of a page with per-irrep basis-change matrices.
///
/// # Arguments
///
/// * `page` - The page, with one column per pair of `layout`.
/// * `layout` - The square layout of the column pairs of the page.
/// * `leg` - The leg to be contracted.
/// * `matrices` - One basis-change matrix per irrep, with one row per orbital of that irrep on
/// `leg` and one column per target function.
///
/// # Returns
///
/// A tuple of the transformed page and the square layout of its column pairs.
///
/// # Errors
///
/// Errors with [`BacktransformError::DimensionMismatch`] if the number of matrices is not the
/// number of irreps, if a matrix does not have one row per orbital on `leg`, if the layout is
/// triangular, or if the page does not have one column per pair.
pub fn quarter_transform(
    page: ArrayView2<f64>,
    layout: &PairLayout,
    leg: PairLeg,
    matrices: &[Array2<f64>],
) -> Result<(Array2<f64>, PairLayout), BacktransformError> {
    check_transform(page, layout, leg, matrices)?;
    let target_dims = matrices.iter().map(|mat| mat.ncols()).collect::<Vec<_>>();
    let layout_out = layout.with_leg_dims(leg, &target_dims)?;
    let n_irreps = layout.first_dims().len();
    let mut page_out = Array2::<f64>::zeros((page.nrows(), layout_out.len()));

    // (group offset in, group offset out, gp, gq) of every stored group.
    let groups = (0..n_irreps)
        .filter_map(|gp| {
            Some((
                layout.group_offset(gp)?,
                layout_out.group_offset(gp)?,
                gp,
                irrep_product(layout.irrep(), gp),
            ))
        })
        .collect::<Vec<_>>();

    match leg {
        PairLeg::Second => {
            // One matrix product per group over all rows of the page.
            for &(offset_in, offset_out, gp, gq) in groups.iter() {
                let np = layout.first_dims()[gp];
                let nq = layout.second_dims()[gq];
                let nt = target_dims[gq];
                if np * nq == 0 || np * nt == 0 {
                    continue;
                }
                let x = page
                    .slice(s![.., offset_in..offset_in + np * nq])
                    .as_standard_layout()
                    .into_owned()
                    .into_shape((page.nrows() * np, nq))
                    .map_err(|err| BacktransformError::DimensionMismatch(err.to_string()))?;
                let y = x
                    .dot(&matrices[gq])
                    .into_shape((page.nrows(), np * nt))
                    .map_err(|err| BacktransformError::DimensionMismatch(err.to_string()))?;
                page_out
                    .slice_mut(s![.., offset_out..offset_out + np * nt])
                    .assign(&y);
            }
        }
        PairLeg::First => {
            page_out
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(page.axis_iter(Axis(0)).into_par_iter())
                .try_for_each(|(mut row_out, row)| {
                    for &(offset_in, offset_out, gp, gq) in groups.iter() {
                        let np = layout.first_dims()[gp];
                        let nq = layout.second_dims()[gq];
                        let nt = target_dims[gp];
                        if np * nq == 0 || nt * nq == 0 {
                            continue;
                        }
                        let x = row
                            .slice(s![offset_in..offset_in + np * nq])
                            .to_owned()
                            .into_shape((np, nq))
                            .map_err(|err| {
                                BacktransformError::DimensionMismatch(err.to_string())
                            })?;
                        let y = matrices[gp].t().dot(&x);
                        row_out
                            .slice_mut(s![offset_out..offset_out + nt * nq])
                            .iter_mut()
                            .zip(y.iter())
                            .for_each(|(out, value)| *out = *value);
                    }
                    Ok::<(), BacktransformError>(())
                })?;
        }
    }
    Ok((page_out, layout_out))
}

/// Expands the columns of a page stored in a triangular layout into the square layout.
///
/// # Returns
///
/// A tuple of the expanded page and its square layout. Pages already in square layouts are
/// returned unchanged.
pub fn expand_triangular(
    page: ArrayView2<f64>,
    layout: &PairLayout,
) -> Result<(Array2<f64>, PairLayout), BacktransformError> {
    Ok((layout.expand_columns(page)?, layout.to_square()))
}

/// Packs the columns of a page stored in the square counterpart of `layout` into `layout`.
pub fn pack_triangular(
    page: ArrayView2<f64>,
    layout: &PairLayout,
) -> Result<Array2<f64>, BacktransformError> {
    layout.pack_columns(page)
}

/// Transforms both legs of the column pairs of a page, the second leg first.
///
/// # Arguments
///
/// * `page` - The page, with one column per pair of `layout`.
/// * `layout` - The layout of the column pairs of the page, which may be triangular.
/// * `first` - The basis-change matrices of the first leg.
/// * `second` - The basis-change matrices of the second leg.
///
/// # Returns
///
/// A tuple of the transformed page and the square layout of its column pairs.
pub fn half_transform(
    page: ArrayView2<f64>,
    layout: &PairLayout,
    first: &[Array2<f64>],
    second: &[Array2<f64>],
) -> Result<(Array2<f64>, PairLayout), BacktransformError> {
    let (expanded, square) = expand_triangular(page, layout)?;
    let (half, half_layout) = quarter_transform(expanded.view(), &square, PairLeg::Second, second)?;
    quarter_transform(half.view(), &half_layout, PairLeg::First, first)
}

fn check_transform(
    page: ArrayView2<f64>,
    layout: &PairLayout,
    leg: PairLeg,
    matrices: &[Array2<f64>],
) -> Result<(), BacktransformError> {
    if layout.is_triangular() {
        return Err(BacktransformError::DimensionMismatch(format!(
            "Pairs of irrep {} must be expanded into a square layout before a quarter transformation",
            layout.irrep()
        )));
    }
    if page.ncols() != layout.len() {
        return Err(BacktransformError::DimensionMismatch(format!(
            "A page with {} columns does not match a pair layout of irrep {} with {} pairs",
            page.ncols(),
            layout.irrep(),
            layout.len()
        )));
    }
    let leg_dims = layout.leg_dims(leg);
    if matrices.len() != leg_dims.len() {
        return Err(BacktransformError::DimensionMismatch(format!(
            "{} basis-change matrices supplied for {} irreps",
            matrices.len(),
            leg_dims.len()
        )));
    }
    if let Some((g, (mat, dim))) = matrices
        .iter()
        .zip(leg_dims.iter())
        .enumerate()
        .find(|(_, (mat, dim))| mat.nrows() != **dim)
    {
        return Err(BacktransformError::DimensionMismatch(format!(
            "The basis-change matrix of irrep {g} has {} rows, but the {leg:?} leg has {dim} orbitals in that irrep",
            mat.nrows()
        )));
    }
    Ok(())
}
