use std::env;
use std::fs;
use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use itertools::Itertools;
use ndarray::{s, Array2, Array4};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serial_test::serial;

use crate::basis::basis_change::{BasisChange, SpinBasisChange};
use crate::basis::space::{FrozenOrbitals, OrbitalSpace, OrbitalSpaceKind, SpaceSet};
use crate::storage::descriptor::{BlockDescriptor, TpdmBuffer};
use crate::storage::disk::DiskBackend;
use crate::storage::memory::{MemoryBackend, MemoryBlockStore};
use crate::storage::pair::{PairIndex, PairStorage};
use crate::storage::quartet::{QuartetFile, QuartetList, TpdmElement, TpdmSource};
use crate::storage::{BlockStore, StorageBackend};
use crate::symmetry::PointGroup;
use crate::transform::tpdm::{
    TpdmBackTransform, TpdmBackTransformParams, TpdmBackTransformResult,
};
use crate::transform::{
    BacktransformError, BasisTransform, MoOrdering, OutputType, SpinCase, TransformationType,
};

// -------
// Helpers
// -------

fn space(name: &str, kind: OrbitalSpaceKind, dims: &[usize]) -> OrbitalSpace {
    OrbitalSpace::builder()
        .name(name)
        .kind(kind)
        .dims(dims.to_vec())
        .build()
        .unwrap()
}

fn active_spaces(point_group: PointGroup, dims: &[usize]) -> SpaceSet {
    SpaceSet::new(point_group, vec![space("act", OrbitalSpaceKind::Active, dims)]).unwrap()
}

fn params(
    transformation_type: TransformationType,
    pair_storage: PairStorage,
    memory_mb: f64,
) -> TpdmBackTransformParams {
    TpdmBackTransformParams::builder()
        .transformation_type(Some(transformation_type))
        .pair_storage(pair_storage)
        .memory_mb(memory_mb)
        .build()
        .unwrap()
}

/// Irrep of every orbital numbered irrep by irrep.
fn orbital_irreps(dims: &[usize]) -> Vec<usize> {
    dims.iter()
        .enumerate()
        .flat_map(|(h, &n)| std::iter::repeat(h).take(n))
        .collect()
}

fn random_matrices(src_dims: &[usize], tgt_dims: &[usize], rng: &mut StdRng) -> Vec<Array2<f64>> {
    let dist = Uniform::new(-1.0, 1.0);
    src_dims
        .iter()
        .zip(tgt_dims.iter())
        .map(|(&ns, &nt)| Array2::from_shape_fn((ns, nt), |_| dist.sample(rng)))
        .collect()
}

/// Assembles per-irrep matrices into one block-diagonal matrix.
fn block_diagonal(matrices: &[Array2<f64>]) -> Array2<f64> {
    let nrows = matrices.iter().map(|m| m.nrows()).sum();
    let ncols = matrices.iter().map(|m| m.ncols()).sum();
    let mut full = Array2::<f64>::zeros((nrows, ncols));
    let (mut r0, mut c0) = (0, 0);
    for mat in matrices {
        for ((r, c), x) in mat.indexed_iter() {
            full[(r0 + r, c0 + c)] = *x;
        }
        r0 += mat.nrows();
        c0 += mat.ncols();
    }
    full
}

/// Generates a random totally symmetric density over orbitals of the given irreps.
fn random_tpdm(irreps: &[usize], pair_symmetric: bool, rng: &mut StdRng) -> Array4<f64> {
    let n = irreps.len();
    let dist = Uniform::new(-1.0, 1.0);
    let gamma = Array4::from_shape_fn((n, n, n, n), |(i, j, k, l)| {
        if irreps[i] ^ irreps[j] ^ irreps[k] ^ irreps[l] == 0 {
            dist.sample(rng)
        } else {
            0.0
        }
    });
    if pair_symmetric {
        (gamma.clone()
            + &gamma.view().permuted_axes([1, 0, 2, 3])
            + &gamma.view().permuted_axes([0, 1, 3, 2])
            + &gamma.view().permuted_axes([1, 0, 3, 2]))
            * 0.25
    } else {
        gamma
    }
}

fn contract_leg(tensor: &Array4<f64>, mat: &Array2<f64>, axis: usize) -> Array4<f64> {
    let (a, b, c, d) = tensor.dim();
    let mut shape = [a, b, c, d];
    shape[axis] = mat.ncols();
    Array4::from_shape_fn(shape, |(p, q, r, s)| {
        let out = [p, q, r, s];
        let mut sum = 0.0;
        for x in 0..mat.nrows() {
            let mut index = out;
            index[axis] = x;
            sum += tensor[index] * mat[(x, out[axis])];
        }
        sum
    })
}

/// Transforms a dense density with `row` on the row pair and `col` on the column pair.
fn reference(gamma: &Array4<f64>, row: &Array2<f64>, col: &Array2<f64>) -> Array4<f64> {
    let t = contract_leg(gamma, col, 3);
    let t = contract_leg(&t, col, 2);
    let t = contract_leg(&t, row, 1);
    contract_leg(&t, row, 0)
}

/// Lists the non-zero elements of a dense density, renumbering orbitals with `absolute`.
fn elements(gamma: &Array4<f64>, absolute: &[usize]) -> Vec<TpdmElement> {
    gamma
        .indexed_iter()
        .filter(|(_, value)| **value != 0.0)
        .map(|((i, j, k, l), value)| {
            TpdmElement::new(absolute[i], absolute[j], absolute[k], absolute[l], *value)
        })
        .collect()
}

/// Checks every stored element of a buffer against a dense reference.
fn assert_matches_reference<S: BlockStore>(
    buffer: &TpdmBuffer<S>,
    expected: &Array4<f64>,
    storage: PairStorage,
) {
    let orderings = |a: usize, b: usize| {
        if a == b || storage == PairStorage::Square {
            vec![(a, b)]
        } else {
            vec![(a, b), (b, a)]
        }
    };
    let mut count = 0;
    buffer
        .for_each_quartet(-1.0, |element| {
            let value: f64 = orderings(element.i, element.j)
                .into_iter()
                .cartesian_product(orderings(element.k, element.l))
                .map(|((i, j), (k, l))| expected[[i, j, k, l]])
                .sum();
            assert_abs_diff_eq!(element.value, value, epsilon = 1e-10);
            count += 1;
            Ok(())
        })
        .unwrap();
    let n_stored = buffer
        .descriptor()
        .shapes()
        .unwrap()
        .into_iter()
        .map(|(nrows, ncols)| nrows * ncols)
        .sum::<usize>();
    assert_eq!(count, n_stored);
}

fn run<T: TpdmSource, B: StorageBackend>(
    parameters: &TpdmBackTransformParams,
    spaces: &SpaceSet,
    target_dims: &[usize],
    basis_change: &SpinBasisChange,
    source: &T,
    backend: B,
) -> Result<TpdmBackTransformResult<B::Store>, BacktransformError> {
    let mut driver = TpdmBackTransform::builder()
        .parameters(parameters)
        .spaces(spaces)
        .target_dims(target_dims.to_vec())
        .basis_change(basis_change)
        .source(source)
        .backend(backend)
        .build()?;
    driver.run()?;
    driver.finalise()?;
    driver.result()?;
    Ok(driver
        .into_result()
        .expect("A finalised transformation must hold a result."))
}

fn scratch_dir(name: &str) -> PathBuf {
    env::temp_dir().join(format!("tpdm-backtransform-tpdm-{name}-{}", std::process::id()))
}

// -----
// Tests
// -----

#[test]
fn test_backtransform_identity_c1() {
    let _ = env_logger::builder().is_test(true).try_init();
    let spaces = active_spaces(PointGroup::C1, &[2]);
    let basis_change =
        SpinBasisChange::Restricted(BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap());
    let source = QuartetList::from(
        (0..2)
            .cartesian_product(0..2)
            .cartesian_product((0..2).cartesian_product(0..2))
            .enumerate()
            .map(|(n, ((i, j), (k, l)))| TpdmElement::new(i, j, k, l, n as f64 + 1.0))
            .collect_vec(),
    );
    let parameters = params(TransformationType::Restricted, PairStorage::Square, 1.0);
    let result = run(&parameters, &spaces, &[2], &basis_change, &source, MemoryBackend).unwrap();

    let output = result.output(SpinCase::Total).unwrap();
    assert_eq!(output.descriptor().label(), "so_tpdm");
    let block = output.block(0).unwrap();
    let expected = Array2::from_shape_fn((4, 4), |(row, col)| (row * 4 + col) as f64 + 1.0);
    assert_abs_diff_eq!(block, expected, epsilon = 1e-14);
    assert_eq!(result.outputs().len(), 1);
    assert_eq!(result.transformation_type(), TransformationType::Restricted);
}

#[test]
fn test_backtransform_matches_dense_reference() {
    let cases: [(PointGroup, Vec<usize>, Vec<usize>); 3] = [
        (PointGroup::C1, vec![3], vec![4]),
        (PointGroup::C2v, vec![2, 1, 1, 1], vec![3, 1, 2, 1]),
        (
            PointGroup::D2h,
            vec![1, 1, 0, 1, 1, 0, 1, 0],
            vec![2, 1, 1, 1, 1, 0, 1, 1],
        ),
    ];
    for (seed, (point_group, src_dims, tgt_dims)) in cases.into_iter().enumerate() {
        for storage in [PairStorage::Square, PairStorage::Triangular] {
            let mut rng = StdRng::seed_from_u64(seed as u64);
            let spaces = active_spaces(point_group, &src_dims);
            let matrices = random_matrices(&src_dims, &tgt_dims, &mut rng);
            let full = block_diagonal(&matrices);
            let basis_change =
                SpinBasisChange::Restricted(BasisChange::new().with_space("act", matrices));

            let irreps = orbital_irreps(&src_dims);
            let gamma = random_tpdm(&irreps, storage == PairStorage::Triangular, &mut rng);
            let absolute = (0..irreps.len()).collect_vec();
            let source = QuartetList::from(elements(&gamma, &absolute));

            let parameters = params(TransformationType::Restricted, storage, 1.0);
            let result =
                run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend)
                    .unwrap();
            assert_matches_reference(
                result.output(SpinCase::Total).unwrap(),
                &reference(&gamma, &full, &full),
                storage,
            );
        }
    }
}

#[test]
fn test_backtransform_symmetry_isolation() {
    // A density confined to the totally symmetric pair block stays there.
    let src_dims = [2, 1, 1, 1];
    let tgt_dims = [3, 2, 1, 2];
    let mut rng = StdRng::seed_from_u64(11);
    let spaces = active_spaces(PointGroup::C2v, &src_dims);
    let matrices = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let basis_change = SpinBasisChange::Restricted(BasisChange::new().with_space("act", matrices));
    let source = QuartetList::from(vec![
        TpdmElement::new(0, 1, 1, 0, 0.7),
        TpdmElement::new(2, 2, 0, 0, -0.3),
        TpdmElement::new(3, 3, 4, 4, 1.2),
    ]);
    let parameters = params(TransformationType::Restricted, PairStorage::Square, 1.0);
    let result = run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend)
        .unwrap();
    let output = result.output(SpinCase::Total).unwrap();
    assert!(output.block(0).unwrap().iter().any(|x| x.abs() > 1e-12));
    for h in 1..4 {
        assert!(output.block(h).unwrap().iter().all(|x| *x == 0.0));
    }
}

#[test]
fn test_backtransform_diagonal_scaling() {
    let spaces = active_spaces(PointGroup::C1, &[2]);
    let basis_change =
        SpinBasisChange::Restricted(BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap());
    let source = QuartetList::from(vec![
        TpdmElement::new(0, 1, 0, 0, 1.0),
        TpdmElement::new(1, 0, 0, 0, 1.0),
        TpdmElement::new(1, 1, 1, 1, 3.0),
    ]);
    let parameters = params(TransformationType::Restricted, PairStorage::Triangular, 1.0);
    let result = run(&parameters, &spaces, &[2], &basis_change, &source, MemoryBackend).unwrap();
    let block = result.output(SpinCase::Total).unwrap().block(0).unwrap();
    // Pairs: (00), (10), (11). Off-diagonal pairs carry both orderings.
    assert_abs_diff_eq!(block[(1, 0)], 2.0, epsilon = 1e-14);
    assert_abs_diff_eq!(block[(0, 1)], 0.0, epsilon = 1e-14);
    assert_abs_diff_eq!(block[(2, 2)], 3.0, epsilon = 1e-14);
}

#[test]
fn test_backtransform_frozen_orbitals_and_ordering() {
    // Cs with a frozen core orbital in A' and an active A' + A" space.
    let spaces = SpaceSet::new(
        PointGroup::Cs,
        vec![
            space("fzc", OrbitalSpaceKind::FrozenOccupied, &[1, 0]),
            space("act", OrbitalSpaceKind::Active, &[2, 1]),
        ],
    )
    .unwrap();
    let tgt_dims = [3, 2];
    let mut rng = StdRng::seed_from_u64(5);
    let matrices = random_matrices(&[2, 1], &tgt_dims, &mut rng);
    let full = block_diagonal(&matrices);
    let basis_change = SpinBasisChange::Restricted(BasisChange::new().with_space("act", matrices));

    let irreps = [0, 0, 1];
    let gamma = random_tpdm(&irreps, true, &mut rng);
    let expected = reference(&gamma, &full, &full);

    // QT order numbers fzc(A'), act(A'), act(A"); Pitzer order fzc(A'), act(A'), act(A").
    // The participating orbitals are therefore 1, 2, 3 in both cases here, and the frozen
    // orbital is 0.
    let mut qt_elements = elements(&gamma, &[1, 2, 3]);
    qt_elements.push(TpdmElement::new(0, 0, 0, 0, 9.0));
    qt_elements.push(TpdmElement::new(0, 1, 1, 0, 9.0));
    let source = QuartetList::from(qt_elements.clone());

    for mo_ordering in [MoOrdering::QtOrder, MoOrdering::PitzerOrder] {
        let parameters = TpdmBackTransformParams::builder()
            .transformation_type(Some(TransformationType::Restricted))
            .mo_ordering(mo_ordering)
            .frozen_orbitals(FrozenOrbitals::OccAndVir)
            .build()
            .unwrap();
        let result = run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend)
            .unwrap();
        assert_matches_reference(
            result.output(SpinCase::Total).unwrap(),
            &expected,
            PairStorage::Triangular,
        );
    }

    // Including the frozen orbital requires matrices for its space.
    let parameters = TpdmBackTransformParams::builder()
        .transformation_type(Some(TransformationType::Restricted))
        .frozen_orbitals(FrozenOrbitals::None)
        .build()
        .unwrap();
    assert!(matches!(
        run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend),
        Err(BacktransformError::Configuration(_))
    ));
}

#[test]
fn test_backtransform_pitzer_order_renumbering() {
    // Two spaces in Cs: occ (1, 1) and vir (1, 0).
    // QT order: occ A', occ A", vir A'. Pitzer order: occ A', vir A', occ A".
    let spaces = SpaceSet::new(
        PointGroup::Cs,
        vec![
            space("occ", OrbitalSpaceKind::Occupied, &[1, 1]),
            space("vir", OrbitalSpaceKind::Virtual, &[1, 0]),
        ],
    )
    .unwrap();
    let tgt_dims = [2, 2];
    let mut rng = StdRng::seed_from_u64(21);
    let occ = random_matrices(&[1, 1], &tgt_dims, &mut rng);
    let vir = random_matrices(&[1, 0], &tgt_dims, &mut rng);
    let basis_change = SpinBasisChange::Restricted(
        BasisChange::new()
            .with_space("occ", occ)
            .with_space("vir", vir),
    );
    let qt_irreps = [0, 1, 0];
    let gamma = random_tpdm(&qt_irreps, false, &mut rng);
    let qt_source = QuartetList::from(elements(&gamma, &[0, 1, 2]));
    let pitzer_source = QuartetList::from(elements(&gamma, &[0, 2, 1]));

    let outputs = [
        (MoOrdering::QtOrder, &qt_source),
        (MoOrdering::PitzerOrder, &pitzer_source),
    ]
    .into_iter()
    .map(|(mo_ordering, source)| {
        let parameters = TpdmBackTransformParams::builder()
            .transformation_type(Some(TransformationType::Restricted))
            .pair_storage(PairStorage::Square)
            .mo_ordering(mo_ordering)
            .build()
            .unwrap();
        let result = run(&parameters, &spaces, &tgt_dims, &basis_change, source, MemoryBackend)
            .unwrap();
        let output = result.output(SpinCase::Total).unwrap();
        (0..2).map(|h| output.block(h).unwrap()).collect_vec()
    })
    .collect_vec();
    for h in 0..2 {
        assert_abs_diff_eq!(outputs[0][h], outputs[1][h], epsilon = 1e-12);
    }
}

#[test]
fn test_backtransform_unrestricted() {
    let src_dims = [2, 1];
    let tgt_dims = [2, 2];
    let mut rng = StdRng::seed_from_u64(8);
    let spaces = active_spaces(PointGroup::C2, &src_dims);
    let alpha = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let beta = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let (alpha_full, beta_full) = (block_diagonal(&alpha), block_diagonal(&beta));
    let basis_change = SpinBasisChange::Unrestricted {
        alpha: BasisChange::new().with_space("act", alpha),
        beta: BasisChange::new().with_space("act", beta),
    };

    let irreps = orbital_irreps(&src_dims);
    let absolute = (0..irreps.len()).collect_vec();
    let densities = SpinCase::UNRESTRICTED
        .iter()
        .map(|&spin| (spin, random_tpdm(&irreps, true, &mut rng)))
        .collect_vec();
    let source = densities
        .iter()
        .fold(QuartetList::new(), |list, (spin, gamma)| {
            list.with_spin(*spin, elements(gamma, &absolute))
        });

    let parameters = params(TransformationType::Unrestricted, PairStorage::Triangular, 1.0);
    let result =
        run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend).unwrap();
    assert_eq!(
        result.outputs().keys().copied().collect_vec(),
        SpinCase::UNRESTRICTED.to_vec()
    );
    for (spin, gamma) in densities.iter() {
        let (row, col) = match spin {
            SpinCase::AlphaAlpha => (&alpha_full, &alpha_full),
            SpinCase::BetaBeta => (&beta_full, &beta_full),
            _ => (&alpha_full, &beta_full),
        };
        let output = result.output(*spin).unwrap();
        assert_eq!(output.descriptor().label(), format!("so_tpdm_{}", spin.tag()));
        assert_matches_reference(output, &reference(gamma, row, col), PairStorage::Triangular);
    }
}

#[test]
fn test_backtransform_restricted_equals_unrestricted_with_shared_matrices() {
    let src_dims = [1, 2];
    let tgt_dims = [2, 3];
    let mut rng = StdRng::seed_from_u64(13);
    let spaces = active_spaces(PointGroup::Ci, &src_dims);
    let matrices = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let shared = BasisChange::new().with_space("act", matrices);
    let irreps = orbital_irreps(&src_dims);
    let gamma = random_tpdm(&irreps, true, &mut rng);
    let list = elements(&gamma, &(0..irreps.len()).collect_vec());

    let restricted = run(
        &params(TransformationType::Restricted, PairStorage::Triangular, 1.0),
        &spaces,
        &tgt_dims,
        &SpinBasisChange::Restricted(shared.clone()),
        &QuartetList::from(list.clone()),
        MemoryBackend,
    )
    .unwrap();
    let unrestricted_source = SpinCase::UNRESTRICTED
        .iter()
        .fold(QuartetList::new(), |source, spin| {
            source.with_spin(*spin, list.clone())
        });
    let unrestricted = run(
        &params(TransformationType::Unrestricted, PairStorage::Triangular, 1.0),
        &spaces,
        &tgt_dims,
        &SpinBasisChange::Unrestricted {
            alpha: shared.clone(),
            beta: shared,
        },
        &unrestricted_source,
        MemoryBackend,
    )
    .unwrap();

    let total = restricted.output(SpinCase::Total).unwrap();
    for spin in SpinCase::UNRESTRICTED {
        let output = unrestricted.output(spin).unwrap();
        for h in 0..2 {
            assert_eq!(output.block(h).unwrap(), total.block(h).unwrap());
        }
    }
}

#[test]
fn test_backtransform_paging_independence() {
    let src_dims = [2, 1, 1, 1];
    let tgt_dims = [3, 1, 2, 2];
    let mut rng = StdRng::seed_from_u64(17);
    let spaces = active_spaces(PointGroup::C2v, &src_dims);
    let matrices = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let basis_change = SpinBasisChange::Restricted(BasisChange::new().with_space("act", matrices));
    let irreps = orbital_irreps(&src_dims);
    let gamma = random_tpdm(&irreps, true, &mut rng);
    let source = QuartetList::from(elements(&gamma, &(0..irreps.len()).collect_vec()));

    for storage in [PairStorage::Square, PairStorage::Triangular] {
        // A budget this small holds a single row per page.
        let tiny = run(
            &params(TransformationType::Restricted, storage, 1e-9),
            &spaces,
            &tgt_dims,
            &basis_change,
            &source,
            MemoryBackend,
        )
        .unwrap();
        let large = run(
            &params(TransformationType::Restricted, storage, 256.0),
            &spaces,
            &tgt_dims,
            &basis_change,
            &source,
            MemoryBackend,
        )
        .unwrap();
        let tiny = tiny.output(SpinCase::Total).unwrap();
        let large = large.output(SpinCase::Total).unwrap();
        for h in 0..4 {
            assert_eq!(tiny.descriptor().rows_per_page(h).unwrap(), 1);
            assert_abs_diff_eq!(
                tiny.block(h).unwrap(),
                large.block(h).unwrap(),
                epsilon = 1e-12
            );
        }
    }
}

#[test]
#[serial]
fn test_backtransform_disk_matches_memory() {
    let src_dims = [2, 1];
    let tgt_dims = [3, 2];
    let mut rng = StdRng::seed_from_u64(23);
    let spaces = active_spaces(PointGroup::Cs, &src_dims);
    let matrices = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let basis_change = SpinBasisChange::Restricted(BasisChange::new().with_space("act", matrices));
    let irreps = orbital_irreps(&src_dims);
    let gamma = random_tpdm(&irreps, true, &mut rng);
    let source = QuartetList::from(elements(&gamma, &(0..irreps.len()).collect_vec()));
    let parameters = params(TransformationType::Restricted, PairStorage::Triangular, 1e-9);

    let memory =
        run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend).unwrap();

    let dir = scratch_dir("disk");
    let backend = DiskBackend::new(&dir).unwrap();
    let disk = run(&parameters, &spaces, &tgt_dims, &basis_change, &source, backend).unwrap();

    let memory_output = memory.output(SpinCase::Total).unwrap();
    let disk_output = disk.output(SpinCase::Total).unwrap();
    for h in 0..2 {
        assert_abs_diff_eq!(
            disk_output.block(h).unwrap(),
            memory_output.block(h).unwrap(),
            epsilon = 1e-12
        );
    }

    // Only the persistent output survives the transformation.
    let files = fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .sorted()
        .collect_vec();
    assert_eq!(files, vec!["so_tpdm.blk".to_string()]);
    assert_eq!(disk_output.store().path(), dir.join("so_tpdm.blk"));

    drop(disk);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_backtransform_quartet_output() {
    let dir = scratch_dir("quartets");
    fs::create_dir_all(&dir).unwrap();
    let src_dims = [1, 1];
    let tgt_dims = [2, 1];
    let mut rng = StdRng::seed_from_u64(29);
    let spaces = active_spaces(PointGroup::C2, &src_dims);
    let matrices = random_matrices(&src_dims, &tgt_dims, &mut rng);
    let basis_change = SpinBasisChange::Restricted(BasisChange::new().with_space("act", matrices));
    let irreps = orbital_irreps(&src_dims);
    let gamma = random_tpdm(&irreps, true, &mut rng);
    let source = QuartetList::from(elements(&gamma, &[0, 1]));

    let quartet_file = dir.join("so_tpdm.qrt");
    let parameters = TpdmBackTransformParams::builder()
        .transformation_type(Some(TransformationType::Restricted))
        .output_type(OutputType::BlocksAndQuartets)
        .quartet_file(Some(quartet_file.clone()))
        .quartet_threshold(1e-10)
        .build()
        .unwrap();
    let result =
        run(&parameters, &spaces, &tgt_dims, &basis_change, &source, MemoryBackend).unwrap();

    let output = result.output(SpinCase::Total).unwrap();
    let expected = output.quartets(1e-10).unwrap();
    assert!(!expected.is_empty());
    assert_eq!(result.quartet_count(SpinCase::Total), Some(expected.len()));

    let written = QuartetFile::new()
        .with_spin(SpinCase::Total, &quartet_file)
        .elements(SpinCase::Total)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(written, expected);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_backtransform_quartet_paths() {
    let parameters = TpdmBackTransformParams::builder()
        .quartet_file(Some(PathBuf::from("/tmp/out/tpdm.qrt")))
        .build()
        .unwrap();
    assert_eq!(
        parameters.quartet_path(SpinCase::Total),
        Some(PathBuf::from("/tmp/out/tpdm.qrt"))
    );
    assert_eq!(
        parameters.quartet_path(SpinCase::AlphaBeta),
        Some(PathBuf::from("/tmp/out/tpdm_ab.qrt"))
    );
    assert_eq!(TpdmBackTransformParams::default().quartet_path(SpinCase::Total), None);
}

#[test]
fn test_backtransform_params_defaults() {
    let parameters = TpdmBackTransformParams::default();
    assert_eq!(parameters.transformation_type, None);
    assert_eq!(parameters.output_type, OutputType::BlocksOnly);
    assert_eq!(parameters.mo_ordering, MoOrdering::QtOrder);
    assert_eq!(parameters.frozen_orbitals, FrozenOrbitals::OccAndVir);
    assert_eq!(parameters.pair_storage, PairStorage::Triangular);
    assert_eq!(parameters.budget(), 256 * 1024 * 1024 / 8);
    assert_eq!(parameters.output_label, "so_tpdm");

    let parsed: TpdmBackTransformParams =
        serde_yaml::from_str("transformation_type: Unrestricted\nmemory_mb: 0.5\n").unwrap();
    assert_eq!(
        parsed.transformation_type,
        Some(TransformationType::Unrestricted)
    );
    assert_eq!(parsed.budget(), 65536);
    assert_eq!(parsed.quartet_threshold, 1e-14);
}

#[test]
fn test_backtransform_configuration_errors() {
    let spaces = active_spaces(PointGroup::C2, &[1, 1]);
    let restricted =
        SpinBasisChange::Restricted(BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap());
    let unrestricted = SpinBasisChange::Unrestricted {
        alpha: BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap(),
        beta: BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap(),
    };
    let source = QuartetList::from(vec![TpdmElement::new(0, 0, 0, 0, 1.0)]);
    let build = |parameters: &TpdmBackTransformParams,
                 target_dims: Vec<usize>,
                 basis_change: &SpinBasisChange| {
        TpdmBackTransform::builder()
            .parameters(parameters)
            .spaces(&spaces)
            .target_dims(target_dims)
            .basis_change(basis_change)
            .source(&source)
            .backend(MemoryBackend)
            .build()
            .map(|_| ())
    };
    let is_configuration_error =
        |res: Result<(), BacktransformError>| matches!(res, Err(BacktransformError::Configuration(_)));

    // Unset transformation type.
    assert!(is_configuration_error(build(
        &TpdmBackTransformParams::default(),
        vec![1, 1],
        &restricted
    )));
    // Non-positive memory.
    assert!(is_configuration_error(build(
        &params(TransformationType::Restricted, PairStorage::Square, 0.0),
        vec![1, 1],
        &restricted
    )));
    // Quartets without a file.
    let quartets = TpdmBackTransformParams::builder()
        .transformation_type(Some(TransformationType::Restricted))
        .output_type(OutputType::QuartetsOnly)
        .build()
        .unwrap();
    assert!(is_configuration_error(build(&quartets, vec![1, 1], &restricted)));
    // Spin treatment mismatches.
    assert!(is_configuration_error(build(
        &params(TransformationType::Restricted, PairStorage::Square, 1.0),
        vec![1, 1],
        &unrestricted
    )));
    assert!(is_configuration_error(build(
        &params(TransformationType::Unrestricted, PairStorage::Square, 1.0),
        vec![1, 1],
        &restricted
    )));
    // Missing matrices for a participating space.
    assert!(is_configuration_error(build(
        &params(TransformationType::Restricted, PairStorage::Square, 1.0),
        vec![1, 1],
        &SpinBasisChange::Restricted(BasisChange::new())
    )));
    // Wrong number of target irreps.
    assert!(is_configuration_error(build(
        &params(TransformationType::Restricted, PairStorage::Square, 1.0),
        vec![1],
        &restricted
    )));
    // Everything in order.
    assert!(build(
        &params(TransformationType::Restricted, PairStorage::Square, 1.0),
        vec![1, 1],
        &restricted
    )
    .is_ok());
}

#[test]
fn test_backtransform_runtime_errors() {
    let spaces = active_spaces(PointGroup::C2, &[1, 1]);
    let basis_change =
        SpinBasisChange::Restricted(BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap());
    let parameters = params(TransformationType::Restricted, PairStorage::Square, 1.0);

    // Target dimensions disagreeing with the matrices.
    let source = QuartetList::from(vec![TpdmElement::new(0, 0, 0, 0, 1.0)]);
    assert!(matches!(
        run(&parameters, &spaces, &[1, 2], &basis_change, &source, MemoryBackend),
        Err(BacktransformError::DimensionMismatch(_))
    ));

    // A symmetry-forbidden element.
    let forbidden = QuartetList::from(vec![TpdmElement::new(0, 1, 0, 0, 1.0)]);
    assert!(matches!(
        run(&parameters, &spaces, &[1, 1], &basis_change, &forbidden, MemoryBackend),
        Err(BacktransformError::DimensionMismatch(_))
    ));

    // An orbital index beyond the orbital spaces.
    let out_of_range = QuartetList::from(vec![TpdmElement::new(0, 0, 2, 2, 1.0)]);
    assert!(matches!(
        run(&parameters, &spaces, &[1, 1], &basis_change, &out_of_range, MemoryBackend),
        Err(BacktransformError::DimensionMismatch(_))
    ));

    // A missing spin case.
    let unrestricted = SpinBasisChange::Unrestricted {
        alpha: BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap(),
        beta: BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap(),
    };
    assert!(matches!(
        run(
            &params(TransformationType::Unrestricted, PairStorage::Square, 1.0),
            &spaces,
            &[1, 1],
            &unrestricted,
            &source,
            MemoryBackend
        ),
        Err(BacktransformError::Configuration(_))
    ));
}

#[test]
fn test_backtransform_per_space_row_counts() {
    let spaces = SpaceSet::new(
        PointGroup::C1,
        vec![
            space("occ", OrbitalSpaceKind::Occupied, &[1]),
            space("vir", OrbitalSpaceKind::Virtual, &[2]),
        ],
    )
    .unwrap();
    let source = QuartetList::from(vec![TpdmElement::new(0, 0, 0, 0, 1.0)]);
    let parameters = params(TransformationType::Restricted, PairStorage::Square, 1.0);

    // Three stacked rows over three orbitals, split the wrong way between the spaces.
    let swapped = SpinBasisChange::Restricted(
        BasisChange::new()
            .with_space("occ", vec![Array2::<f64>::eye(3).slice(s![0..2, ..]).to_owned()])
            .with_space("vir", vec![Array2::<f64>::eye(3).slice(s![2..3, ..]).to_owned()]),
    );
    assert!(matches!(
        run(&parameters, &spaces, &[3], &swapped, &source, MemoryBackend),
        Err(BacktransformError::DimensionMismatch(_))
    ));

    let consistent = SpinBasisChange::Restricted(
        BasisChange::new()
            .with_space("occ", vec![Array2::<f64>::eye(3).slice(s![0..1, ..]).to_owned()])
            .with_space("vir", vec![Array2::<f64>::eye(3).slice(s![1..3, ..]).to_owned()]),
    );
    let result = run(&parameters, &spaces, &[3], &consistent, &source, MemoryBackend).unwrap();
    let block = result.output(SpinCase::Total).unwrap().block(0).unwrap();
    assert_eq!(block[(0, 0)], 1.0);
    assert_eq!(block.sum(), 1.0);
}

#[test]
fn test_backtransform_result_before_run() {
    let spaces = active_spaces(PointGroup::C1, &[1]);
    let basis_change =
        SpinBasisChange::Restricted(BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap());
    let source = QuartetList::from(vec![TpdmElement::new(0, 0, 0, 0, 1.0)]);
    let parameters = params(TransformationType::Restricted, PairStorage::Square, 1.0);
    let mut driver = TpdmBackTransform::builder()
        .parameters(&parameters)
        .spaces(&spaces)
        .target_dims(vec![1])
        .basis_change(&basis_change)
        .source(&source)
        .backend(MemoryBackend)
        .build()
        .unwrap();
    assert!(matches!(
        driver.result(),
        Err(BacktransformError::Configuration(_))
    ));
    assert!(driver.finalise().is_err());
    assert!(driver.output(SpinCase::Total).is_none());
    driver.prepare().unwrap();
    driver.run().unwrap();
    let output = driver.output(SpinCase::Total).unwrap();
    assert_eq!(output.block(0).unwrap()[(0, 0)], 1.0);
}

#[test]
fn test_setup_tpdm_buffer() {
    let spaces = active_spaces(PointGroup::C2v, &[1, 1, 1, 1]);
    let basis_change =
        SpinBasisChange::Restricted(BasisChange::identity(&spaces, FrozenOrbitals::None).unwrap());
    let source = QuartetList::new();
    let parameters = params(TransformationType::Restricted, PairStorage::Triangular, 1.0);
    let mut driver = TpdmBackTransform::builder()
        .parameters(&parameters)
        .spaces(&spaces)
        .target_dims(vec![2, 1, 1, 0])
        .basis_change(&basis_change)
        .source(&source)
        .backend(MemoryBackend)
        .build()
        .unwrap();

    let index = PairIndex::new(&[1, 1, 1, 1], &[1, 1, 1, 1], PairStorage::Triangular).unwrap();
    let source_descriptor = BlockDescriptor::builder()
        .label("mo")
        .rows(index.clone())
        .cols(index)
        .build()
        .unwrap();
    let buffer: TpdmBuffer<MemoryBlockStore> = driver
        .setup_tpdm_buffer(&source_descriptor, SpinCase::Total)
        .unwrap();
    assert_eq!(buffer.descriptor().label(), "so_tpdm");
    assert_eq!(buffer.descriptor().target_irrep(), 0);
    // Over target dims (2, 1, 1, 0), A1 holds three A1 pairs and one pair each of A2 and B1,
    // while B2 only holds the B1 x A2 pair.
    assert_eq!(buffer.descriptor().shape(0).unwrap(), (5, 5));
    assert_eq!(buffer.descriptor().shape(3).unwrap(), (1, 1));

    let wrong_index = PairIndex::new(&[1, 1], &[1, 1], PairStorage::Triangular).unwrap();
    let wrong = BlockDescriptor::builder()
        .label("mo")
        .rows(wrong_index.clone())
        .cols(wrong_index)
        .build()
        .unwrap();
    assert!(matches!(
        driver.setup_tpdm_buffer(&wrong, SpinCase::Total),
        Err(BacktransformError::Configuration(_))
    ));
}
