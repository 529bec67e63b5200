//! # Integration Tests: nvlist Marshalling
//!
//! ## What is tested
//! - Lists allocated through a library are freed exactly once
//! - Nested lists are copied in and borrowed out
//! - Allocation failures stop an operation before any libzfs call

use std::collections::BTreeMap;
use std::sync::Arc;
use zfs_native::zfs::{Config, DatasetKind, LibZfs, MemoryZfs, NvList, ZfsError};

fn library(mem: MemoryZfs) -> (Arc<MemoryZfs>, LibZfs) {
    let mem = Arc::new(mem);
    let lib = LibZfs::with_backend(mem.clone(), Config::default()).unwrap();
    (mem, lib)
}

#[test]
fn test_borrowed_nested_lists() {
    let (mem, lib) = library(MemoryZfs::new());

    let mut leaf = lib.new_nvlist().unwrap();
    leaf.put("value", "gold").unwrap();
    leaf.put("inherited", false).unwrap();

    let mut middle = lib.new_nvlist().unwrap();
    middle.put("com.example:tier", &leaf).unwrap();

    let mut top = lib.new_nvlist().unwrap();
    top.put("props", &middle).unwrap();
    drop(leaf);
    drop(middle);

    let props = top.get_nested("props").unwrap().unwrap();
    let tier = props.get_nested("com.example:tier").unwrap().unwrap();
    assert_eq!(tier.get_string("value").unwrap().as_deref(), Some("gold"));
    assert_eq!(tier.get_bool("inherited").unwrap(), Some(false));
    assert!(props.get_nested("missing").unwrap().is_none());
    assert_eq!(props.keys(), vec!["com.example:tier".to_string()]);

    drop(top);
    assert_eq!(mem.live_nvlists(), 0);
    assert_eq!(mem.double_frees(), 0);
}

#[test]
fn test_wrong_type_lookup() {
    let (_, lib) = library(MemoryZfs::new());
    let mut list = lib.new_nvlist().unwrap();
    list.put("name", "tank").unwrap();
    let err = list.get_bool("name").unwrap_err();
    assert!(matches!(err, ZfsError::Marshalling { errno, .. } if errno == libc::EINVAL));
}

#[test]
fn test_from_map_owns_copies() {
    let (mem, lib) = library(MemoryZfs::new());
    let mut pairs = BTreeMap::new();
    pairs.insert("atime".to_string(), "off".to_string());
    pairs.insert("compression".to_string(), "zstd".to_string());

    let list = NvList::from_map(lib.native(), &pairs).unwrap();
    pairs.clear();
    assert_eq!(list.get_string("compression").unwrap().as_deref(), Some("zstd"));
    assert_eq!(list.keys().len(), 2);
    drop(list);
    assert_eq!(mem.live_nvlists(), 0);
}

#[test]
fn test_alloc_failure_stops_create() {
    let (mem, lib) = library(MemoryZfs::builder().pool("tank").fail_nvlist_alloc().build());
    let err = lib
        .create("tank/a", DatasetKind::FileSystem, &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, ZfsError::Marshalling { .. }));
    assert_eq!(mem.call_count("zfs_create"), 0);
    assert!(!mem.contains("tank/a"));
}
