// lib.rs
// zfs_native: libzfs/libnvpair bindings with runtime ABI selection

pub mod avl;
pub mod zfs;

pub use zfs::{Config, Dataset, DatasetKind, LibZfs, Result, ZfsError, ZfsPool};
