use std::env;
use std::path::PathBuf;

use ndarray::{array, Array2};
use serial_test::serial;

use crate::storage::disk::DiskBackend;
use crate::storage::{BlockStore, Persistence, StorageBackend, WriteMode};

fn scratch_dir(name: &str) -> PathBuf {
    env::temp_dir().join(format!("tpdm-backtransform-disk-{name}-{}", std::process::id()))
}

#[test]
#[serial]
fn test_disk_store_read_write() {
    let dir = scratch_dir("rw");
    let mut backend = DiskBackend::new(&dir).unwrap();
    let mut store = backend
        .create_store("blocks", &[(3, 2), (2, 3)], Persistence::Scratch)
        .unwrap();
    assert_eq!(store.n_irreps(), 2);
    assert_eq!(store.shape(1).unwrap(), (2, 3));
    assert_eq!(store.read_block(0, 0..3).unwrap(), Array2::<f64>::zeros((3, 2)));

    store
        .write_block(1, 0, array![[1.0, 2.0, 3.0]].view(), WriteMode::Create)
        .unwrap();
    store
        .write_block(1, 1, array![[4.0, 5.0, 6.0]].view(), WriteMode::Append)
        .unwrap();
    store
        .write_block(0, 1, array![[-1.5, 2.5]].view(), WriteMode::Append)
        .unwrap();
    assert_eq!(
        store.read_block(1, 0..2).unwrap(),
        array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
    );
    assert_eq!(
        store.read_block(0, 0..3).unwrap(),
        array![[0.0, 0.0], [-1.5, 2.5], [0.0, 0.0]]
    );

    // Creating a block clears the rows not being written and leaves other blocks alone.
    store
        .write_block(1, 1, array![[7.0, 8.0, 9.0]].view(), WriteMode::Create)
        .unwrap();
    assert_eq!(
        store.read_block(1, 0..2).unwrap(),
        array![[0.0, 0.0, 0.0], [7.0, 8.0, 9.0]]
    );
    assert_eq!(store.read_block(0, 1..2).unwrap(), array![[-1.5, 2.5]]);

    // Non-contiguous views are written in logical order.
    let transposed = array![[1.0, 3.0], [2.0, 4.0], [5.0, 6.0]];
    store
        .write_block(1, 0, transposed.t(), WriteMode::Append)
        .unwrap();
    assert_eq!(
        store.read_block(1, 0..2).unwrap(),
        array![[1.0, 2.0, 5.0], [3.0, 4.0, 6.0]]
    );

    let path = store.path().to_path_buf();
    assert!(path.exists());
    drop(store);
    assert!(!path.exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_disk_store_persistent_reopen() {
    let dir = scratch_dir("persist");
    let mut backend = DiskBackend::new(&dir).unwrap();
    let shapes = [(2, 2)];
    let mut store = backend
        .create_store("out", &shapes, Persistence::Persistent)
        .unwrap();
    store
        .write_block(0, 0, array![[1.0, 2.0], [3.0, 4.0]].view(), WriteMode::Create)
        .unwrap();
    let path = store.path().to_path_buf();
    drop(store);
    assert!(path.exists());

    let reopened = backend.open_store("out", &shapes).unwrap();
    assert_eq!(
        reopened.read_block(0, 0..2).unwrap(),
        array![[1.0, 2.0], [3.0, 4.0]]
    );
    assert!(backend.open_store("out", &[(3, 2)]).is_err());
    drop(reopened);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_disk_store_out_of_range() {
    let dir = scratch_dir("range");
    let mut backend = DiskBackend::new(&dir).unwrap();
    let mut store = backend
        .create_store("blocks", &[(1, 2)], Persistence::Scratch)
        .unwrap();
    assert!(store.read_block(0, 0..2).is_err());
    assert!(store
        .write_block(0, 1, array![[1.0, 2.0]].view(), WriteMode::Append)
        .is_err());
    drop(store);
    std::fs::remove_dir_all(&dir).unwrap();
}
