// zfs/backend.rs
// The native collaborator contract: libzfs/libnvpair entry points one-to-one

use super::abi::AbiMode;
use super::byref::{BooleanSlot, EnumSlot, PropBuf, PtrSlot};
use super::handle::{LibHandle, NvListPtr, ZfsHandle, ZpoolHandle};
use super::types::{PropSource, ShareProtocol};
use std::ffi::{c_int, c_uint, CStr};

/// Callback handed to the `zfs_iter_*` family. It receives a fresh handle
/// it now owns; a nonzero return stops the iteration.
pub type ZfsIterFn<'a> = &'a mut dyn FnMut(ZfsHandle) -> c_int;

/// Callback handed to `zpool_iter`.
pub type ZpoolIterFn<'a> = &'a mut dyn FnMut(ZpoolHandle) -> c_int;

/// `NV_UNIQUE_NAME`
pub const NV_UNIQUE_NAME: c_uint = 0x1;

/// `ZPROP_INVAL`, returned by the name-to-prop lookups.
pub const ZPROP_INVAL: c_int = -1;

/// Entry points consumed from libzfs and libnvpair.
///
/// Methods keep the C shapes: status returns are `0` on success, names are
/// `&CStr`, out-parameters are slots. Entry points whose signature differs
/// between library generations take the resolved [`AbiMode`] of their
/// feature and the implementation picks the matching variant.
///
/// Implementations are not required to be reentrant per library handle;
/// the session serialises every call on one handle.
pub trait NativeZfs: Send + Sync {
    /// Whether the loaded library exports `symbol`. Used for ABI probing.
    fn has_symbol(&self, symbol: &str) -> bool;

    // --- library ---------------------------------------------------------

    fn libzfs_init(&self) -> Option<LibHandle>;
    fn libzfs_fini(&self, lib: LibHandle);
    /// `EZFS_*` code of the last failure on `lib`, `0` if none.
    fn libzfs_errno(&self, lib: LibHandle) -> c_int;
    fn libzfs_error_description(&self, lib: LibHandle) -> String;
    fn libzfs_print_on_error(&self, lib: LibHandle, enabled: bool);

    // --- datasets --------------------------------------------------------

    fn zfs_open(&self, lib: LibHandle, name: &CStr, types: c_int) -> Option<ZfsHandle>;
    fn zfs_close(&self, zhp: ZfsHandle);
    fn zfs_get_type(&self, zhp: ZfsHandle) -> c_int;
    fn zfs_get_name(&self, zhp: ZfsHandle) -> String;
    fn zfs_dataset_exists(&self, lib: LibHandle, name: &CStr, types: c_int) -> bool;
    fn zfs_create(&self, lib: LibHandle, name: &CStr, kind: c_int, props: Option<NvListPtr>) -> c_int;
    /// legacy `zfs_destroy(zhp)`; OpenZFS `zfs_destroy(zhp, defer)`
    fn zfs_destroy(&self, zhp: ZfsHandle, defer: bool, abi: &AbiMode) -> c_int;
    /// legacy `zfs_snapshot(hdl, path, recursive)`; OpenZFS adds a props list
    fn zfs_snapshot(
        &self,
        lib: LibHandle,
        path: &CStr,
        recursive: bool,
        props: Option<NvListPtr>,
        abi: &AbiMode,
    ) -> c_int;
    fn zfs_clone(&self, zhp: ZfsHandle, target: &CStr, props: Option<NvListPtr>) -> c_int;
    fn zfs_rollback(&self, zhp: ZfsHandle, snap: ZfsHandle, force: bool) -> c_int;
    /// legacy `zfs_rename(zhp, target, recursive)`; OpenZFS takes a flags
    /// struct with `recursive` and `forceunmount`
    fn zfs_rename(
        &self,
        zhp: ZfsHandle,
        target: &CStr,
        recursive: bool,
        force_unmount: bool,
        abi: &AbiMode,
    ) -> c_int;
    fn zfs_promote(&self, zhp: ZfsHandle) -> c_int;

    // --- iteration -------------------------------------------------------

    fn zfs_iter_root(&self, lib: LibHandle, f: ZfsIterFn<'_>) -> c_int;
    /// `_v2` variants with a flags word under `openzfs-2.2`
    fn zfs_iter_children(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int;
    fn zfs_iter_filesystems(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int;
    fn zfs_iter_snapshots(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int;
    fn zpool_iter(&self, lib: LibHandle, f: ZpoolIterFn<'_>) -> c_int;

    // --- dataset properties ----------------------------------------------

    fn zfs_name_to_prop(&self, name: &CStr) -> c_int;
    fn zfs_prop_get(
        &self,
        zhp: ZfsHandle,
        prop: c_int,
        buf: &mut PropBuf,
        source: &mut EnumSlot<PropSource>,
        literal: bool,
    ) -> c_int;
    fn zfs_prop_set(&self, zhp: ZfsHandle, name: &CStr, value: &CStr) -> c_int;
    /// legacy `zfs_prop_inherit(zhp, name)`; OpenZFS adds `received`
    fn zfs_prop_inherit(&self, zhp: ZfsHandle, name: &CStr, received: bool, abi: &AbiMode) -> c_int;
    fn zfs_refresh_properties(&self, zhp: ZfsHandle);
    /// Borrowed from `zhp`; valid until the handle is closed or refreshed.
    fn zfs_get_user_props(&self, zhp: ZfsHandle) -> Option<NvListPtr>;
    /// Name of the pool containing `zhp`.
    fn zfs_get_pool_name(&self, zhp: ZfsHandle) -> String;

    // --- mount and share -------------------------------------------------

    /// `zfs_is_mounted(zhp, &where)`; `mountpoint` receives a copy of
    /// `where`.
    fn zfs_is_mounted(&self, zhp: ZfsHandle, mountpoint: &mut Option<String>) -> bool;
    fn zfs_mount(&self, zhp: ZfsHandle, options: Option<&CStr>, flags: c_int) -> c_int;
    fn zfs_unmount(&self, zhp: ZfsHandle, mountpoint: Option<&CStr>, flags: c_int) -> c_int;
    /// All protocols enabled by properties. Under `openzfs-2.2` the
    /// implementation follows with `zfs_commit_shares`.
    fn zfs_share(&self, zhp: ZfsHandle, abi: &AbiMode) -> c_int;
    fn zfs_unshare(&self, zhp: ZfsHandle, abi: &AbiMode) -> c_int;
    /// legacy `zfs_share_nfs`/`zfs_share_smb`; OpenZFS 2.2 `zfs_share` with
    /// a protocol list
    fn zfs_share_proto(&self, zhp: ZfsHandle, proto: ShareProtocol, abi: &AbiMode) -> c_int;
    fn zfs_unshare_proto(&self, zhp: ZfsHandle, proto: ShareProtocol, abi: &AbiMode) -> c_int;
    fn zfs_is_shared(&self, zhp: ZfsHandle) -> bool;
    fn zfs_share_iscsi(&self, zhp: ZfsHandle) -> c_int;
    fn zfs_unshare_iscsi(&self, zhp: ZfsHandle) -> c_int;

    // --- delegation ------------------------------------------------------

    /// legacy `zfs_perm_set`; OpenZFS `zfs_set_fsacl(zhp, B_FALSE, nvl)`
    fn zfs_perm_set(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode) -> c_int;
    /// legacy `zfs_perm_remove`; OpenZFS `zfs_set_fsacl(zhp, B_TRUE, nvl)`
    fn zfs_perm_remove(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode) -> c_int;

    // --- pools -----------------------------------------------------------

    /// `zpool_open_canfail`: null without printing when the pool is absent
    fn zpool_open(&self, lib: LibHandle, name: &CStr) -> Option<ZpoolHandle>;
    fn zpool_close(&self, zph: ZpoolHandle);
    fn zpool_get_name(&self, zph: ZpoolHandle) -> String;
    fn zpool_name_to_prop(&self, name: &CStr) -> c_int;
    /// OpenZFS adds a `literal` flag
    fn zpool_get_prop(
        &self,
        zph: ZpoolHandle,
        prop: c_int,
        buf: &mut PropBuf,
        source: &mut EnumSlot<PropSource>,
        abi: &AbiMode,
    ) -> c_int;
    /// Raw `zpool_status_t`; decode with `PoolStatus::from_ordinal`.
    fn zpool_get_status(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int;
    /// Raw `pool_state_t`; decode with `PoolState::from_ordinal`. The
    /// call itself is ABI-stable, `abi` only selects the numbering.
    fn zpool_get_state(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int;
    fn zpool_disable_datasets(&self, zph: ZpoolHandle, force: bool) -> c_int;
    /// OpenZFS adds a history `log_str`
    fn zpool_export(&self, zph: ZpoolHandle, force: bool, abi: &AbiMode) -> c_int;
    fn zpool_export_force(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int;

    // --- nvlist ----------------------------------------------------------

    fn nvlist_alloc(&self, out: &mut PtrSlot<NvListPtr>, flags: c_uint) -> c_int;
    fn nvlist_free(&self, nvl: NvListPtr);
    fn nvlist_add_string(&self, nvl: NvListPtr, name: &CStr, value: &CStr) -> c_int;
    fn nvlist_add_boolean_value(&self, nvl: NvListPtr, name: &CStr, value: bool) -> c_int;
    /// Value-less boolean pair; presence is the value.
    fn nvlist_add_boolean(&self, nvl: NvListPtr, name: &CStr) -> c_int;
    /// Copies `value` into `nvl`; the caller keeps ownership of `value`.
    fn nvlist_add_nvlist(&self, nvl: NvListPtr, name: &CStr, value: NvListPtr) -> c_int;
    fn nvlist_lookup_string(&self, nvl: NvListPtr, name: &CStr, out: &mut Option<String>) -> c_int;
    fn nvlist_lookup_boolean_value(&self, nvl: NvListPtr, name: &CStr, out: &mut BooleanSlot) -> c_int;
    /// The pointer written to `out` is owned by `nvl`.
    fn nvlist_lookup_nvlist(&self, nvl: NvListPtr, name: &CStr, out: &mut PtrSlot<NvListPtr>) -> c_int;
    fn nvlist_exists(&self, nvl: NvListPtr, name: &CStr) -> bool;
    /// Pair names in insertion order (`nvlist_next_nvpair` + `nvpair_name`).
    fn nvlist_names(&self, nvl: NvListPtr) -> Vec<String>;
}
