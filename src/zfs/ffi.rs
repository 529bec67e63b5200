// zfs/ffi.rs
// Raw libzfs/libnvpair declarations and the per-ABI function pointer shapes

#![allow(non_camel_case_types)]

use libzfs_sys::libzfs_handle_t;
use nvpair_sys::nvlist_t;
use std::ffi::{c_char, c_int, c_void};

// ============================================================================
// Opaque types
// ============================================================================

/// Opaque handle to a filesystem, snapshot or volume (libzfs)
#[repr(C)]
pub struct zfs_handle_t {
    _private: [u8; 0],
}

/// Opaque handle to a ZFS pool (libzfs)
#[repr(C)]
pub struct zpool_handle_t {
    _private: [u8; 0],
}

/// Opaque name/value pair inside an nvlist (libnvpair)
#[repr(C)]
pub struct nvpair_t {
    _private: [u8; 0],
}

/// `boolean_t` is an `int`-sized enum on every supported platform
pub type boolean_t = c_int;

pub const B_FALSE: boolean_t = 0;
pub const B_TRUE: boolean_t = 1;

pub fn boolean(value: bool) -> boolean_t {
    if value {
        B_TRUE
    } else {
        B_FALSE
    }
}

/// `KM_SLEEP`, the only allocation flag meaningful in userland
pub const KM_SLEEP: c_int = 0;

/// `enum sa_protocol` (OpenZFS 2.2+)
pub const SA_PROTOCOL_NFS: c_int = 0;
pub const SA_PROTOCOL_SMB: c_int = 1;
/// List terminator; libzfs walks protocol arrays until it sees this.
pub const SA_NO_PROTOCOL: c_int = -1;

pub type zfs_iter_f = extern "C" fn(*mut zfs_handle_t, *mut c_void) -> c_int;
pub type zpool_iter_f = extern "C" fn(*mut zpool_handle_t, *mut c_void) -> c_int;

/// `renameflags_t`: three one-bit `int` fields packed from the low bit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct renameflags_t(c_int);

impl renameflags_t {
    const RECURSIVE: c_int = 1 << 0;
    const FORCEUNMOUNT: c_int = 1 << 2;

    pub fn new(recursive: bool, force_unmount: bool) -> Self {
        let mut bits = 0;
        if recursive {
            bits |= Self::RECURSIVE;
        }
        if force_unmount {
            bits |= Self::FORCEUNMOUNT;
        }
        renameflags_t(bits)
    }
}

// ============================================================================
// Entry points with one signature across every supported libzfs
// ============================================================================
// Anything whose shape differs between generations, or that only some
// generations export, is resolved at runtime instead; see the aliases below.

#[link(name = "zfs")]
extern "C" {
    pub fn libzfs_print_on_error(hdl: *mut libzfs_handle_t, enabled: boolean_t);

    pub fn zfs_open(hdl: *mut libzfs_handle_t, name: *const c_char, types: c_int) -> *mut zfs_handle_t;
    pub fn zfs_close(zhp: *mut zfs_handle_t);
    pub fn zfs_get_type(zhp: *const zfs_handle_t) -> c_int;
    pub fn zfs_get_name(zhp: *const zfs_handle_t) -> *const c_char;
    pub fn zfs_get_pool_name(zhp: *const zfs_handle_t) -> *const c_char;
    pub fn zfs_dataset_exists(hdl: *mut libzfs_handle_t, name: *const c_char, types: c_int) -> boolean_t;
    pub fn zfs_create(
        hdl: *mut libzfs_handle_t,
        path: *const c_char,
        kind: c_int,
        props: *mut nvlist_t,
    ) -> c_int;
    pub fn zfs_clone(zhp: *mut zfs_handle_t, target: *const c_char, props: *mut nvlist_t) -> c_int;
    pub fn zfs_rollback(zhp: *mut zfs_handle_t, snap: *mut zfs_handle_t, force: boolean_t) -> c_int;
    pub fn zfs_promote(zhp: *mut zfs_handle_t) -> c_int;
    pub fn zfs_iter_root(hdl: *mut libzfs_handle_t, f: zfs_iter_f, data: *mut c_void) -> c_int;

    pub fn zfs_name_to_prop(name: *const c_char) -> c_int;
    pub fn zfs_prop_get(
        zhp: *mut zfs_handle_t,
        prop: c_int,
        buf: *mut c_char,
        len: usize,
        src: *mut c_int,
        statbuf: *mut c_char,
        statlen: usize,
        literal: boolean_t,
    ) -> c_int;
    pub fn zfs_prop_set(zhp: *mut zfs_handle_t, name: *const c_char, value: *const c_char) -> c_int;
    pub fn zfs_refresh_properties(zhp: *mut zfs_handle_t);
    pub fn zfs_get_user_props(zhp: *mut zfs_handle_t) -> *mut nvlist_t;

    /// `where` receives a `strdup`ed mountpoint the caller frees.
    pub fn zfs_is_mounted(zhp: *mut zfs_handle_t, where_: *mut *mut c_char) -> boolean_t;
    pub fn zfs_mount(zhp: *mut zfs_handle_t, options: *const c_char, flags: c_int) -> c_int;
    pub fn zfs_unmount(zhp: *mut zfs_handle_t, mountpoint: *const c_char, flags: c_int) -> c_int;

    pub fn zpool_open_canfail(hdl: *mut libzfs_handle_t, name: *const c_char) -> *mut zpool_handle_t;
    pub fn zpool_close(zhp: *mut zpool_handle_t);
    pub fn zpool_get_name(zhp: *mut zpool_handle_t) -> *const c_char;
    pub fn zpool_name_to_prop(name: *const c_char) -> c_int;
    pub fn zpool_get_state(zhp: *mut zpool_handle_t) -> c_int;
    pub fn zpool_disable_datasets(zhp: *mut zpool_handle_t, force: boolean_t) -> c_int;
    pub fn zpool_iter(hdl: *mut libzfs_handle_t, f: zpool_iter_f, data: *mut c_void) -> c_int;
}

// nvpair-sys covers alloc, free, string adds and nested lookups; the rest
// is declared here with the shapes of the system header.
#[link(name = "nvpair")]
extern "C" {
    pub fn nvlist_add_boolean(nvl: *mut nvlist_t, name: *const c_char) -> c_int;
    pub fn nvlist_add_boolean_value(nvl: *mut nvlist_t, name: *const c_char, value: boolean_t) -> c_int;
    pub fn nvlist_add_nvlist(nvl: *mut nvlist_t, name: *const c_char, value: *mut nvlist_t) -> c_int;
    pub fn nvlist_lookup_string(nvl: *mut nvlist_t, name: *const c_char, value: *mut *const c_char) -> c_int;
    pub fn nvlist_lookup_boolean_value(nvl: *mut nvlist_t, name: *const c_char, value: *mut boolean_t) -> c_int;
    pub fn nvlist_exists(nvl: *mut nvlist_t, name: *const c_char) -> boolean_t;
    pub fn nvlist_next_nvpair(nvl: *mut nvlist_t, prev: *mut nvpair_t) -> *mut nvpair_t;
    pub fn nvpair_name(nvp: *mut nvpair_t) -> *const c_char;
}

// ============================================================================
// Runtime-resolved entry points, one alias per calling convention
// ============================================================================

pub type zfs_destroy_legacy = unsafe extern "C" fn(*mut zfs_handle_t) -> c_int;
pub type zfs_destroy_openzfs = unsafe extern "C" fn(*mut zfs_handle_t, boolean_t) -> c_int;

pub type zfs_snapshot_legacy = unsafe extern "C" fn(*mut libzfs_handle_t, *const c_char, boolean_t) -> c_int;
pub type zfs_snapshot_openzfs =
    unsafe extern "C" fn(*mut libzfs_handle_t, *const c_char, boolean_t, *mut nvlist_t) -> c_int;

pub type zfs_rename_legacy = unsafe extern "C" fn(*mut zfs_handle_t, *const c_char, boolean_t) -> c_int;
pub type zfs_rename_openzfs = unsafe extern "C" fn(*mut zfs_handle_t, *const c_char, renameflags_t) -> c_int;

pub type zfs_prop_inherit_legacy = unsafe extern "C" fn(*mut zfs_handle_t, *const c_char) -> c_int;
pub type zfs_prop_inherit_openzfs = unsafe extern "C" fn(*mut zfs_handle_t, *const c_char, boolean_t) -> c_int;

/// `zfs_iter_children`, `zfs_iter_filesystems`
pub type zfs_iter_legacy = unsafe extern "C" fn(*mut zfs_handle_t, zfs_iter_f, *mut c_void) -> c_int;
/// `zfs_iter_children_v2`, `zfs_iter_filesystems_v2`
pub type zfs_iter_v2 = unsafe extern "C" fn(*mut zfs_handle_t, c_int, zfs_iter_f, *mut c_void) -> c_int;

/// Solaris-era `zfs_iter_snapshots`: no `simple` flag, no txg bounds.
pub type zfs_iter_snapshots_legacy = unsafe extern "C" fn(*mut zfs_handle_t, zfs_iter_f, *mut c_void) -> c_int;
pub type zfs_iter_snapshots_openzfs =
    unsafe extern "C" fn(*mut zfs_handle_t, boolean_t, zfs_iter_f, *mut c_void, u64, u64) -> c_int;
pub type zfs_iter_snapshots_v2 =
    unsafe extern "C" fn(*mut zfs_handle_t, c_int, zfs_iter_f, *mut c_void, u64, u64) -> c_int;

/// `zfs_share`, `zfs_unshare`, `zfs_share_nfs`, `zfs_share_smb` before 2.2
pub type zfs_share_legacy = unsafe extern "C" fn(*mut zfs_handle_t) -> c_int;
/// `zfs_unshare_nfs`, `zfs_unshare_smb`
pub type zfs_unshare_proto_legacy = unsafe extern "C" fn(*mut zfs_handle_t, *const c_char) -> c_int;
pub type zfs_share_v2 = unsafe extern "C" fn(*mut zfs_handle_t, *const c_int) -> c_int;
pub type zfs_unshare_v2 = unsafe extern "C" fn(*mut zfs_handle_t, *const c_char, *const c_int) -> c_int;
pub type zfs_commit_shares = unsafe extern "C" fn(*const c_int);
pub type zfs_is_shared_legacy = unsafe extern "C" fn(*mut zfs_handle_t) -> boolean_t;
pub type zfs_is_shared_v2 = unsafe extern "C" fn(*mut zfs_handle_t, *mut *mut c_char, *const c_int) -> boolean_t;

/// `zfs_share_iscsi`, `zfs_unshare_iscsi` (Solaris only)
pub type zfs_iscsi = unsafe extern "C" fn(*mut zfs_handle_t) -> c_int;

/// `zfs_perm_set`, `zfs_perm_remove`
pub type zfs_perm_legacy = unsafe extern "C" fn(*mut zfs_handle_t, *mut nvlist_t) -> c_int;
pub type zfs_set_fsacl = unsafe extern "C" fn(*mut zfs_handle_t, boolean_t, *mut nvlist_t) -> c_int;

pub type zpool_get_prop_legacy =
    unsafe extern "C" fn(*mut zpool_handle_t, c_int, *mut c_char, usize, *mut c_int) -> c_int;
pub type zpool_get_prop_openzfs =
    unsafe extern "C" fn(*mut zpool_handle_t, c_int, *mut c_char, usize, *mut c_int, boolean_t) -> c_int;

pub type zpool_get_status_legacy = unsafe extern "C" fn(*mut zpool_handle_t, *mut *mut c_char) -> c_int;
pub type zpool_get_status_openzfs =
    unsafe extern "C" fn(*mut zpool_handle_t, *mut *mut c_char, *mut c_int) -> c_int;

pub type zpool_export_legacy = unsafe extern "C" fn(*mut zpool_handle_t, boolean_t) -> c_int;
pub type zpool_export_openzfs = unsafe extern "C" fn(*mut zpool_handle_t, boolean_t, *const c_char) -> c_int;
pub type zpool_export_force_legacy = unsafe extern "C" fn(*mut zpool_handle_t) -> c_int;
pub type zpool_export_force_openzfs = unsafe extern "C" fn(*mut zpool_handle_t, *const c_char) -> c_int;

// ============================================================================
// RAII guards
// ============================================================================

/// Guard for a `malloc`ed C string handed to us by libzfs - frees on drop
pub struct CStringGuard(pub *mut c_char);

impl Drop for CStringGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::free(self.0 as *mut c_void) }
        }
    }
}
