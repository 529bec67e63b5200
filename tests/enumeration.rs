//! # Integration Tests: Enumeration
//!
//! ## What is tested
//! - Pool roots, children, snapshots and recursive descendants
//! - Each descendant appears exactly once, in depth-first order
//! - Handles filtered out of a listing are released

use std::collections::HashSet;
use std::sync::Arc;
use zfs_native::zfs::{Config, Dataset, DatasetKind, ErrorCode, LibZfs, MemoryZfs};

fn library() -> (Arc<MemoryZfs>, LibZfs) {
    let mem = Arc::new(MemoryZfs::builder().pool("tank").build());
    mem.add_snapshot("tank@mon");
    mem.add_snapshot("tank@tue");
    mem.add_filesystem("tank/x");
    mem.add_filesystem("tank/x/y");
    mem.add_snapshot("tank/x@mon");
    mem.add_volume("tank/vol");
    mem.add_snapshot("tank/vol@base");
    let lib = LibZfs::with_backend(mem.clone(), Config::default()).unwrap();
    (mem, lib)
}

fn names(datasets: &[Dataset]) -> Vec<String> {
    datasets.iter().map(|d| d.name().to_string()).collect()
}

#[test]
fn test_descendants_each_once() {
    let (_, lib) = library();
    let root = lib.open("tank").unwrap().unwrap();
    let all = names(&root.descendants().unwrap());

    assert_eq!(
        all,
        vec![
            "tank@mon",
            "tank@tue",
            "tank/vol",
            "tank/vol@base",
            "tank/x",
            "tank/x@mon",
            "tank/x/y",
        ]
    );
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(unique.len(), all.len());
}

#[test]
fn test_descendants_of_kind() {
    let (_, lib) = library();
    let root = lib.open("tank").unwrap().unwrap();
    let filesystems = root.descendants_of(DatasetKind::FileSystem).unwrap();
    assert_eq!(names(&filesystems), vec!["tank/x", "tank/x/y"]);
    assert_eq!(lib.live_handles(), 3);
}

#[test]
fn test_descendants_of_leaf() {
    let (_, lib) = library();
    let leaf = lib.open("tank/x/y").unwrap().unwrap();
    assert!(leaf.descendants().unwrap().is_empty());
}

#[test]
fn test_roots() {
    let (mem, lib) = library();
    mem.add_pool("backup");
    let roots = lib.roots().unwrap();
    assert_eq!(names(&roots), vec!["backup", "tank"]);
    assert!(roots.iter().all(|d| d.kind() == DatasetKind::FileSystem));
}

#[test]
fn test_snapshot_order_follows_creation() {
    let (mem, lib) = library();
    let x = lib.open("tank/x").unwrap().unwrap();
    x.snapshot("aaa", false).unwrap();
    mem.add_snapshot("tank/x@000");

    let snaps = names(&x.snapshots().unwrap());
    assert_eq!(snaps, vec!["tank/x@mon", "tank/x@aaa", "tank/x@000"]);
}

#[test]
fn test_volume_lists_snapshots_only() {
    let (_, lib) = library();
    let vol = lib.open("tank/vol").unwrap().unwrap();
    assert_eq!(names(&vol.snapshots().unwrap()), vec!["tank/vol@base"]);
    assert!(vol.children().is_err());
    assert_eq!(lib.live_handles(), 1);
}

#[test]
fn test_iteration_hands_out_own_handles() {
    let (mem, lib) = library();
    let root = lib.open("tank").unwrap().unwrap();
    // a failing zfs_open does not affect handles produced by iteration
    mem.fail("zfs_open", ErrorCode::NoMem);
    assert_eq!(root.children().unwrap().len(), 4);
    assert_eq!(mem.call_count("zfs_open"), 1);
}
