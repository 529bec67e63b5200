//! # Integration Tests: Handle Lifecycle
//!
//! ## What is tested
//! - Library init/dispose pairing and dispose idempotence
//! - Dataset and pool handles are closed exactly once
//! - Objects outliving a disposed library fail instead of touching freed state
//! - Ancestors are created root to leaf
//!
//! All tests run against the in-memory backend; no ZFS installation needed.

use std::collections::BTreeMap;
use std::sync::Arc;
use zfs_native::zfs::{Config, DatasetKind, ErrorCode, LibZfs, MemoryZfs, ZfsError, ZfsProp};

fn library(pools: &[&str]) -> (Arc<MemoryZfs>, LibZfs) {
    let builder = pools
        .iter()
        .fold(MemoryZfs::builder(), |b, pool| b.pool(pool));
    let mem = Arc::new(builder.build());
    let lib = LibZfs::with_backend(mem.clone(), Config::default()).unwrap();
    (mem, lib)
}

#[test]
fn test_every_handle_closed_once() {
    let (mem, lib) = library(&["tank"]);
    mem.add_filesystem("tank/a");
    mem.add_snapshot("tank/a@s");

    {
        let a = lib.open("tank/a").unwrap().unwrap();
        let snaps = a.snapshots().unwrap();
        assert_eq!(snaps.len(), 1);
        let _pool = a.pool().unwrap().unwrap();
        assert_eq!(lib.live_handles(), 3);
    }

    assert_eq!(lib.live_handles(), 0);
    assert_eq!(mem.open_zfs_handles(), 0);
    assert_eq!(mem.open_zpool_handles(), 0);
    assert_eq!(mem.stray_closes(), 0);
}

#[test]
fn test_double_close_is_harmless() {
    let (mem, lib) = library(&["tank"]);
    let mut root = lib.open("tank").unwrap().unwrap();
    let mut pool = lib.pool("tank").unwrap().unwrap();

    root.close();
    root.close();
    pool.close();
    pool.close();
    drop(root);
    drop(pool);

    assert_eq!(mem.call_count("zfs_close"), 1);
    assert_eq!(mem.call_count("zpool_close"), 1);
    assert_eq!(mem.stray_closes(), 0);
}

#[test]
fn test_dispose_is_idempotent() {
    let (mem, lib) = library(&["tank"]);
    let root = lib.open("tank").unwrap().unwrap();

    assert!(lib.dispose());
    assert!(!lib.dispose());
    drop(lib);

    assert_eq!(mem.call_count("libzfs_init"), 1);
    assert_eq!(mem.call_count("libzfs_fini"), 1);
    assert!(matches!(
        root.property(ZfsProp::Name),
        Err(ZfsError::LibraryUnavailable(_))
    ));
    drop(root);
    assert_eq!(mem.stray_closes(), 0);
}

#[test]
fn test_libraries_are_independent() {
    let mem = Arc::new(MemoryZfs::builder().pool("tank").build());
    let first = LibZfs::with_backend(mem.clone(), Config::default()).unwrap();
    let second = LibZfs::with_backend(mem.clone(), Config::default()).unwrap();
    let root = first.open("tank").unwrap().unwrap();
    assert_eq!(mem.live_libs(), 2);

    second.dispose();
    assert_eq!(root.property(ZfsProp::Name).unwrap().as_deref(), Some("tank"));
    assert_eq!(first.live_handles(), 1);
}

#[test]
fn test_create_nested_path() {
    let (mem, lib) = library(&["tank"]);
    let mut props = BTreeMap::new();
    props.insert("volsize".to_string(), "1G".to_string());

    let vol = lib
        .create("tank/vms/disks/root", DatasetKind::Volume, &props)
        .unwrap()
        .unwrap();
    assert_eq!(vol.kind(), DatasetKind::Volume);

    let order: Vec<String> = mem
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("zfs_create "))
        .collect();
    assert_eq!(
        order,
        vec![
            "zfs_create tank/vms",
            "zfs_create tank/vms/disks",
            "zfs_create tank/vms/disks/root",
        ]
    );
    // intermediate filesystems get no properties
    assert_eq!(mem.prop("tank/vms", "volsize"), None);
    assert_eq!(mem.prop("tank/vms/disks/root", "volsize").as_deref(), Some("1G"));
}

#[test]
fn test_create_existing_fails() {
    let (_, lib) = library(&["tank"]);
    lib.create("tank/a", DatasetKind::FileSystem, &BTreeMap::new())
        .unwrap();
    let err = lib
        .create("tank/a", DatasetKind::FileSystem, &BTreeMap::new())
        .unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::Exists));
}

#[test]
fn test_not_found_is_none() {
    let (_, lib) = library(&["tank"]);
    assert!(lib.open("tank/nothing").unwrap().is_none());
    assert!(lib.open("ghost").unwrap().is_none());
    assert!(lib.pool("ghost").unwrap().is_none());
    assert_eq!(lib.live_handles(), 0);
}

#[test]
fn test_permission_denied_code() {
    let (mem, lib) = library(&["tank"]);
    mem.add_filesystem("tank/private");
    mem.deny("tank/private");

    let err = lib.open("tank/private").unwrap_err();
    assert_eq!(err.code(), Some(2032));
    assert_eq!(err.error_code(), Some(ErrorCode::Perm));
    assert!(err.to_string().contains("permission denied"));
}
