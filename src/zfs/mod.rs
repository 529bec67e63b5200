// zfs/mod.rs
// Handle-safe libzfs/libnvpair bindings

mod abi;
mod acl;
mod backend;
mod byref;
mod config;
mod dataset;
mod error;
mod handle;
mod helpers;
mod library;
mod memory;
mod nvlist;
mod pool;
mod session;
mod types;

#[cfg(feature = "native")]
mod ffi;
#[cfg(feature = "native")]
mod native;

#[cfg(test)]
mod tests;

// Entry point and domain objects
pub use dataset::Dataset;
pub use library::LibZfs;
pub use pool::ZfsPool;

// Native seam
pub use backend::{NativeZfs, ZfsIterFn, ZpoolIterFn, NV_UNIQUE_NAME, ZPROP_INVAL};
pub use handle::{LibHandle, NvListPtr, OpaqueHandle, ZfsHandle, ZpoolHandle};
pub use byref::{BooleanSlot, EnumSlot, NativeEnum, PropBuf, PtrSlot, ZFS_MAXPROPLEN, ZPOOL_MAXPROPLEN};
pub use memory::{MemoryZfs, MemoryZfsBuilder};
#[cfg(feature = "native")]
pub use native::NativeLibzfs;

// Configuration, ABI selection, errors
pub use abi::{AbiFeature, AbiFeatureSet, AbiMode, AbiSource, ABI_ENV_KEY, PROBE_SYMBOLS};
pub use config::Config;
pub use error::{ErrorCode, Result, ZfsError, EZFS_BASE};

// Marshalling and value tables
pub use acl::{AclBuilder, PermissionBuilder, Principal, ZfsPermission};
pub use helpers::{ancestors, parse_size, pool_of};
pub use nvlist::{NvList, NvListRef, NvValue};
pub use types::{
    Capabilities, DatasetKind, MountFlags, PoolState, PoolStatus, PropSource, ShareProtocol,
    TypeMask, ZfsProp, ZpoolProp,
};
