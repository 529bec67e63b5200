// zfs/native.rs
// NativeZfs over the host libzfs/libnvpair

use super::abi::AbiMode;
use super::backend::{NativeZfs, ZfsIterFn, ZpoolIterFn};
use super::byref::{BooleanSlot, EnumSlot, PropBuf, PtrSlot};
use super::ffi::{self, boolean, zfs_handle_t, zpool_handle_t, B_FALSE};
use super::handle::{LibHandle, NvListPtr, OpaqueHandle, ZfsHandle, ZpoolHandle};
use super::types::{PropSource, ShareProtocol};
use libzfs_sys::libzfs_handle_t;
use nvpair_sys::nvlist_t;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Mutex;
use tracing::{error, trace, warn};

/// Returned when a runtime-resolved entry point is not exported, or when a
/// disabled feature reaches the library anyway.
const UNAVAILABLE: c_int = -1;

// ============================================================================
// Pointer conversions
// ============================================================================

fn lib_ptr(lib: LibHandle) -> *mut libzfs_handle_t {
    lib.addr() as *mut libzfs_handle_t
}

fn zfs_ptr(zhp: ZfsHandle) -> *mut zfs_handle_t {
    zhp.addr() as *mut zfs_handle_t
}

fn zpool_ptr(zph: ZpoolHandle) -> *mut zpool_handle_t {
    zph.addr() as *mut zpool_handle_t
}

fn nvl_ptr(nvl: NvListPtr) -> *mut nvlist_t {
    nvl.addr() as *mut nvlist_t
}

fn opt_nvl_ptr(nvl: Option<NvListPtr>) -> *mut nvlist_t {
    nvl.map_or(ptr::null_mut(), nvl_ptr)
}

fn opt_cstr(value: Option<&CStr>) -> *const c_char {
    value.map_or(ptr::null(), CStr::as_ptr)
}

/// Copy a borrowed C string. Null reads as empty.
fn owned(p: *const c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
}

fn dlsym_addr(symbol: &str) -> Option<usize> {
    let name = CString::new(symbol).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    (!addr.is_null()).then_some(addr as usize)
}

// ============================================================================
// Calling conventions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conv {
    Legacy,
    /// OpenZFS 2.0 and 2.1
    OpenZfs,
    /// OpenZFS 2.2 and later
    V2_2,
}

fn conv(abi: &AbiMode) -> Option<Conv> {
    match abi {
        AbiMode::Disabled => None,
        AbiMode::Legacy => Some(Conv::Legacy),
        _ if abi.at_least(2, 2) => Some(Conv::V2_2),
        _ => Some(Conv::OpenZfs),
    }
}

fn sa_protocol(proto: ShareProtocol) -> [c_int; 2] {
    let code = match proto {
        ShareProtocol::Nfs => ffi::SA_PROTOCOL_NFS,
        ShareProtocol::Smb => ffi::SA_PROTOCOL_SMB,
    };
    [code, ffi::SA_NO_PROTOCOL]
}

/// Resolve `$symbol` and reinterpret it as the function pointer `$ty`.
macro_rules! resolve {
    ($self:expr, $symbol:expr, $ty:ty) => {
        $self
            .lookup($symbol)
            .map(|addr| unsafe { std::mem::transmute::<*mut c_void, $ty>(addr as *mut c_void) })
    };
}

// ============================================================================
// Iteration trampolines
// ============================================================================
// The callback travels through libzfs as `data`, a pointer to the caller's
// `&mut dyn FnMut`. A panic must not unwind into C; it stops the walk and
// the handle it was given is left open.

extern "C" fn zfs_iter_trampoline(zhp: *mut zfs_handle_t, data: *mut c_void) -> c_int {
    let f = unsafe { &mut *(data as *mut ZfsIterFn<'_>) };
    let Some(handle) = ZfsHandle::from_addr(zhp as usize) else {
        return 0;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(handle))) {
        Ok(ret) => ret,
        Err(_) => {
            error!(%handle, "dataset iteration callback panicked");
            1
        }
    }
}

extern "C" fn zpool_iter_trampoline(zph: *mut zpool_handle_t, data: *mut c_void) -> c_int {
    let f = unsafe { &mut *(data as *mut ZpoolIterFn<'_>) };
    let Some(handle) = ZpoolHandle::from_addr(zph as usize) else {
        return 0;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(handle))) {
        Ok(ret) => ret,
        Err(_) => {
            error!(%handle, "pool iteration callback panicked");
            1
        }
    }
}

// ============================================================================
// NativeLibzfs
// ============================================================================

/// The host libzfs, linked at build time. Entry points whose signature
/// depends on the library generation are looked up with `dlsym` on first
/// use and called through the shape the session's [`AbiMode`] selects.
pub struct NativeLibzfs {
    symbols: Mutex<HashMap<&'static str, Option<usize>>>,
}

impl NativeLibzfs {
    pub fn new() -> NativeLibzfs {
        NativeLibzfs {
            symbols: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, symbol: &'static str) -> Option<usize> {
        let mut symbols = self.symbols.lock().unwrap_or_else(|e| e.into_inner());
        *symbols.entry(symbol).or_insert_with(|| {
            let addr = dlsym_addr(symbol);
            match addr {
                Some(addr) => trace!(symbol, addr = %format!("{:#x}", addr), "entry point resolved"),
                None => warn!(symbol, "entry point not exported by the loaded libzfs"),
            }
            addr
        })
    }

    fn disabled(&self, op: &str) -> c_int {
        warn!(op, "disabled libzfs entry point called");
        UNAVAILABLE
    }

    fn commit_shares(&self, protos: *const c_int) {
        if let Some(commit) = resolve!(self, "zfs_commit_shares", ffi::zfs_commit_shares) {
            unsafe { commit(protos) }
        }
    }

    /// `zfs_iter_children`/`zfs_iter_filesystems` and their `_v2` forms.
    fn iter_dataset(
        &self,
        zhp: ZfsHandle,
        mut f: ZfsIterFn<'_>,
        abi: &AbiMode,
        legacy: &'static str,
        v2: &'static str,
    ) -> c_int {
        let Some(conv) = conv(abi) else {
            return self.disabled(legacy);
        };
        let data = &mut f as *mut ZfsIterFn<'_> as *mut c_void;
        let raw = zfs_ptr(zhp);
        if conv == Conv::V2_2 {
            match resolve!(self, v2, ffi::zfs_iter_v2) {
                Some(iter) => unsafe { iter(raw, 0, zfs_iter_trampoline, data) },
                None => UNAVAILABLE,
            }
        } else {
            match resolve!(self, legacy, ffi::zfs_iter_legacy) {
                Some(iter) => unsafe { iter(raw, zfs_iter_trampoline, data) },
                None => UNAVAILABLE,
            }
        }
    }

    /// `zfs_perm_set`/`zfs_perm_remove`, or `zfs_set_fsacl`.
    fn set_perms(&self, zhp: ZfsHandle, perms: NvListPtr, un: bool, abi: &AbiMode) -> c_int {
        let legacy = if un { "zfs_perm_remove" } else { "zfs_perm_set" };
        match conv(abi) {
            None => self.disabled(legacy),
            Some(Conv::Legacy) => match resolve!(self, legacy, ffi::zfs_perm_legacy) {
                Some(set) => unsafe { set(zfs_ptr(zhp), nvl_ptr(perms)) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_set_fsacl", ffi::zfs_set_fsacl) {
                Some(set) => unsafe { set(zfs_ptr(zhp), boolean(un), nvl_ptr(perms)) },
                None => UNAVAILABLE,
            },
        }
    }
}

impl Default for NativeLibzfs {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeZfs for NativeLibzfs {
    fn has_symbol(&self, symbol: &str) -> bool {
        dlsym_addr(symbol).is_some()
    }

    // --- library ---------------------------------------------------------

    fn libzfs_init(&self) -> Option<LibHandle> {
        LibHandle::from_addr(unsafe { libzfs_sys::libzfs_init() } as usize)
    }

    fn libzfs_fini(&self, lib: LibHandle) {
        unsafe { libzfs_sys::libzfs_fini(lib_ptr(lib)) }
    }

    fn libzfs_errno(&self, lib: LibHandle) -> c_int {
        unsafe { libzfs_sys::libzfs_errno(lib_ptr(lib)) }
    }

    fn libzfs_error_description(&self, lib: LibHandle) -> String {
        owned(unsafe { libzfs_sys::libzfs_error_description(lib_ptr(lib)) } as *const c_char)
    }

    fn libzfs_print_on_error(&self, lib: LibHandle, enabled: bool) {
        unsafe { ffi::libzfs_print_on_error(lib_ptr(lib), boolean(enabled)) }
    }

    // --- datasets --------------------------------------------------------

    fn zfs_open(&self, lib: LibHandle, name: &CStr, types: c_int) -> Option<ZfsHandle> {
        ZfsHandle::from_addr(unsafe { ffi::zfs_open(lib_ptr(lib), name.as_ptr(), types) } as usize)
    }

    fn zfs_close(&self, zhp: ZfsHandle) {
        unsafe { ffi::zfs_close(zfs_ptr(zhp)) }
    }

    fn zfs_get_type(&self, zhp: ZfsHandle) -> c_int {
        unsafe { ffi::zfs_get_type(zfs_ptr(zhp)) }
    }

    fn zfs_get_name(&self, zhp: ZfsHandle) -> String {
        owned(unsafe { ffi::zfs_get_name(zfs_ptr(zhp)) })
    }

    fn zfs_dataset_exists(&self, lib: LibHandle, name: &CStr, types: c_int) -> bool {
        unsafe { ffi::zfs_dataset_exists(lib_ptr(lib), name.as_ptr(), types) != B_FALSE }
    }

    fn zfs_create(&self, lib: LibHandle, name: &CStr, kind: c_int, props: Option<NvListPtr>) -> c_int {
        unsafe { ffi::zfs_create(lib_ptr(lib), name.as_ptr(), kind, opt_nvl_ptr(props)) }
    }

    fn zfs_destroy(&self, zhp: ZfsHandle, defer: bool, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_destroy"),
            Some(Conv::Legacy) => match resolve!(self, "zfs_destroy", ffi::zfs_destroy_legacy) {
                Some(destroy) => unsafe { destroy(zfs_ptr(zhp)) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_destroy", ffi::zfs_destroy_openzfs) {
                Some(destroy) => unsafe { destroy(zfs_ptr(zhp), boolean(defer)) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zfs_snapshot(
        &self,
        lib: LibHandle,
        path: &CStr,
        recursive: bool,
        props: Option<NvListPtr>,
        abi: &AbiMode,
    ) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_snapshot"),
            Some(Conv::Legacy) => match resolve!(self, "zfs_snapshot", ffi::zfs_snapshot_legacy) {
                Some(snap) => unsafe { snap(lib_ptr(lib), path.as_ptr(), boolean(recursive)) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_snapshot", ffi::zfs_snapshot_openzfs) {
                Some(snap) => unsafe {
                    snap(lib_ptr(lib), path.as_ptr(), boolean(recursive), opt_nvl_ptr(props))
                },
                None => UNAVAILABLE,
            },
        }
    }

    fn zfs_clone(&self, zhp: ZfsHandle, target: &CStr, props: Option<NvListPtr>) -> c_int {
        unsafe { ffi::zfs_clone(zfs_ptr(zhp), target.as_ptr(), opt_nvl_ptr(props)) }
    }

    fn zfs_rollback(&self, zhp: ZfsHandle, snap: ZfsHandle, force: bool) -> c_int {
        unsafe { ffi::zfs_rollback(zfs_ptr(zhp), zfs_ptr(snap), boolean(force)) }
    }

    fn zfs_rename(
        &self,
        zhp: ZfsHandle,
        target: &CStr,
        recursive: bool,
        force_unmount: bool,
        abi: &AbiMode,
    ) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_rename"),
            Some(Conv::Legacy) => match resolve!(self, "zfs_rename", ffi::zfs_rename_legacy) {
                Some(rename) => unsafe { rename(zfs_ptr(zhp), target.as_ptr(), boolean(recursive)) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_rename", ffi::zfs_rename_openzfs) {
                Some(rename) => unsafe {
                    let flags = ffi::renameflags_t::new(recursive, force_unmount);
                    rename(zfs_ptr(zhp), target.as_ptr(), flags)
                },
                None => UNAVAILABLE,
            },
        }
    }

    fn zfs_promote(&self, zhp: ZfsHandle) -> c_int {
        unsafe { ffi::zfs_promote(zfs_ptr(zhp)) }
    }

    // --- iteration -------------------------------------------------------

    fn zfs_iter_root(&self, lib: LibHandle, mut f: ZfsIterFn<'_>) -> c_int {
        let data = &mut f as *mut ZfsIterFn<'_> as *mut c_void;
        unsafe { ffi::zfs_iter_root(lib_ptr(lib), zfs_iter_trampoline, data) }
    }

    fn zfs_iter_children(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int {
        self.iter_dataset(zhp, f, abi, "zfs_iter_children", "zfs_iter_children_v2")
    }

    fn zfs_iter_filesystems(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int {
        self.iter_dataset(zhp, f, abi, "zfs_iter_filesystems", "zfs_iter_filesystems_v2")
    }

    fn zfs_iter_snapshots(&self, zhp: ZfsHandle, mut f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int {
        let Some(conv) = conv(abi) else {
            return self.disabled("zfs_iter_snapshots");
        };
        let data = &mut f as *mut ZfsIterFn<'_> as *mut c_void;
        let raw = zfs_ptr(zhp);
        match conv {
            Conv::Legacy => match resolve!(self, "zfs_iter_snapshots", ffi::zfs_iter_snapshots_legacy) {
                Some(iter) => unsafe { iter(raw, zfs_iter_trampoline, data) },
                None => UNAVAILABLE,
            },
            Conv::OpenZfs => match resolve!(self, "zfs_iter_snapshots", ffi::zfs_iter_snapshots_openzfs) {
                Some(iter) => unsafe { iter(raw, B_FALSE, zfs_iter_trampoline, data, 0, 0) },
                None => UNAVAILABLE,
            },
            Conv::V2_2 => match resolve!(self, "zfs_iter_snapshots_v2", ffi::zfs_iter_snapshots_v2) {
                Some(iter) => unsafe { iter(raw, 0, zfs_iter_trampoline, data, 0, 0) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zpool_iter(&self, lib: LibHandle, mut f: ZpoolIterFn<'_>) -> c_int {
        let data = &mut f as *mut ZpoolIterFn<'_> as *mut c_void;
        unsafe { ffi::zpool_iter(lib_ptr(lib), zpool_iter_trampoline, data) }
    }

    // --- dataset properties ----------------------------------------------

    fn zfs_name_to_prop(&self, name: &CStr) -> c_int {
        unsafe { ffi::zfs_name_to_prop(name.as_ptr()) }
    }

    fn zfs_prop_get(
        &self,
        zhp: ZfsHandle,
        prop: c_int,
        buf: &mut PropBuf,
        source: &mut EnumSlot<PropSource>,
        literal: bool,
    ) -> c_int {
        unsafe {
            ffi::zfs_prop_get(
                zfs_ptr(zhp),
                prop,
                buf.as_mut_ptr(),
                buf.capacity(),
                source.as_mut_ptr(),
                ptr::null_mut(),
                0,
                boolean(literal),
            )
        }
    }

    fn zfs_prop_set(&self, zhp: ZfsHandle, name: &CStr, value: &CStr) -> c_int {
        unsafe { ffi::zfs_prop_set(zfs_ptr(zhp), name.as_ptr(), value.as_ptr()) }
    }

    fn zfs_prop_inherit(&self, zhp: ZfsHandle, name: &CStr, received: bool, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_prop_inherit"),
            Some(Conv::Legacy) => match resolve!(self, "zfs_prop_inherit", ffi::zfs_prop_inherit_legacy) {
                Some(inherit) => unsafe { inherit(zfs_ptr(zhp), name.as_ptr()) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_prop_inherit", ffi::zfs_prop_inherit_openzfs) {
                Some(inherit) => unsafe { inherit(zfs_ptr(zhp), name.as_ptr(), boolean(received)) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zfs_refresh_properties(&self, zhp: ZfsHandle) {
        unsafe { ffi::zfs_refresh_properties(zfs_ptr(zhp)) }
    }

    fn zfs_get_user_props(&self, zhp: ZfsHandle) -> Option<NvListPtr> {
        NvListPtr::from_addr(unsafe { ffi::zfs_get_user_props(zfs_ptr(zhp)) } as usize)
    }

    fn zfs_get_pool_name(&self, zhp: ZfsHandle) -> String {
        owned(unsafe { ffi::zfs_get_pool_name(zfs_ptr(zhp)) })
    }

    // --- mount and share -------------------------------------------------

    fn zfs_is_mounted(&self, zhp: ZfsHandle, mountpoint: &mut Option<String>) -> bool {
        let mut where_: *mut c_char = ptr::null_mut();
        let mounted = unsafe { ffi::zfs_is_mounted(zfs_ptr(zhp), &mut where_) } != B_FALSE;
        let where_ = ffi::CStringGuard(where_);
        *mountpoint = (!where_.0.is_null()).then(|| owned(where_.0));
        mounted
    }

    fn zfs_mount(&self, zhp: ZfsHandle, options: Option<&CStr>, flags: c_int) -> c_int {
        unsafe { ffi::zfs_mount(zfs_ptr(zhp), opt_cstr(options), flags) }
    }

    fn zfs_unmount(&self, zhp: ZfsHandle, mountpoint: Option<&CStr>, flags: c_int) -> c_int {
        unsafe { ffi::zfs_unmount(zfs_ptr(zhp), opt_cstr(mountpoint), flags) }
    }

    fn zfs_share(&self, zhp: ZfsHandle, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_share"),
            Some(Conv::V2_2) => match resolve!(self, "zfs_share", ffi::zfs_share_v2) {
                Some(share) => {
                    let ret = unsafe { share(zfs_ptr(zhp), ptr::null()) };
                    self.commit_shares(ptr::null());
                    ret
                }
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_share", ffi::zfs_share_legacy) {
                Some(share) => unsafe { share(zfs_ptr(zhp)) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zfs_unshare(&self, zhp: ZfsHandle, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_unshare"),
            Some(Conv::V2_2) => match resolve!(self, "zfs_unshare", ffi::zfs_unshare_v2) {
                Some(unshare) => {
                    let ret = unsafe { unshare(zfs_ptr(zhp), ptr::null(), ptr::null()) };
                    self.commit_shares(ptr::null());
                    ret
                }
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zfs_unshare", ffi::zfs_share_legacy) {
                Some(unshare) => unsafe { unshare(zfs_ptr(zhp)) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zfs_share_proto(&self, zhp: ZfsHandle, proto: ShareProtocol, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_share_proto"),
            Some(Conv::V2_2) => match resolve!(self, "zfs_share", ffi::zfs_share_v2) {
                Some(share) => {
                    let protos = sa_protocol(proto);
                    let ret = unsafe { share(zfs_ptr(zhp), protos.as_ptr()) };
                    self.commit_shares(protos.as_ptr());
                    ret
                }
                None => UNAVAILABLE,
            },
            Some(_) => {
                let symbol = match proto {
                    ShareProtocol::Nfs => "zfs_share_nfs",
                    ShareProtocol::Smb => "zfs_share_smb",
                };
                match resolve!(self, symbol, ffi::zfs_share_legacy) {
                    Some(share) => unsafe { share(zfs_ptr(zhp)) },
                    None => UNAVAILABLE,
                }
            }
        }
    }

    fn zfs_unshare_proto(&self, zhp: ZfsHandle, proto: ShareProtocol, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zfs_unshare_proto"),
            Some(Conv::V2_2) => match resolve!(self, "zfs_unshare", ffi::zfs_unshare_v2) {
                Some(unshare) => {
                    let protos = sa_protocol(proto);
                    let ret = unsafe { unshare(zfs_ptr(zhp), ptr::null(), protos.as_ptr()) };
                    self.commit_shares(protos.as_ptr());
                    ret
                }
                None => UNAVAILABLE,
            },
            Some(_) => {
                let symbol = match proto {
                    ShareProtocol::Nfs => "zfs_unshare_nfs",
                    ShareProtocol::Smb => "zfs_unshare_smb",
                };
                match resolve!(self, symbol, ffi::zfs_unshare_proto_legacy) {
                    Some(unshare) => unsafe { unshare(zfs_ptr(zhp), ptr::null()) },
                    None => UNAVAILABLE,
                }
            }
        }
    }

    fn zfs_is_shared(&self, zhp: ZfsHandle) -> bool {
        // 2.2 grew `where` and protocol arguments along with zfs_commit_shares
        let shared = if self.has_symbol("zfs_commit_shares") {
            resolve!(self, "zfs_is_shared", ffi::zfs_is_shared_v2)
                .map(|is_shared| unsafe { is_shared(zfs_ptr(zhp), ptr::null_mut(), ptr::null()) })
        } else {
            resolve!(self, "zfs_is_shared", ffi::zfs_is_shared_legacy)
                .map(|is_shared| unsafe { is_shared(zfs_ptr(zhp)) })
        };
        shared.is_some_and(|b| b != B_FALSE)
    }

    fn zfs_share_iscsi(&self, zhp: ZfsHandle) -> c_int {
        match resolve!(self, "zfs_share_iscsi", ffi::zfs_iscsi) {
            Some(share) => unsafe { share(zfs_ptr(zhp)) },
            None => UNAVAILABLE,
        }
    }

    fn zfs_unshare_iscsi(&self, zhp: ZfsHandle) -> c_int {
        match resolve!(self, "zfs_unshare_iscsi", ffi::zfs_iscsi) {
            Some(unshare) => unsafe { unshare(zfs_ptr(zhp)) },
            None => UNAVAILABLE,
        }
    }

    // --- delegation ------------------------------------------------------

    fn zfs_perm_set(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode) -> c_int {
        self.set_perms(zhp, perms, false, abi)
    }

    fn zfs_perm_remove(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode) -> c_int {
        self.set_perms(zhp, perms, true, abi)
    }

    // --- pools -----------------------------------------------------------

    fn zpool_open(&self, lib: LibHandle, name: &CStr) -> Option<ZpoolHandle> {
        ZpoolHandle::from_addr(unsafe { ffi::zpool_open_canfail(lib_ptr(lib), name.as_ptr()) } as usize)
    }

    fn zpool_close(&self, zph: ZpoolHandle) {
        unsafe { ffi::zpool_close(zpool_ptr(zph)) }
    }

    fn zpool_get_name(&self, zph: ZpoolHandle) -> String {
        owned(unsafe { ffi::zpool_get_name(zpool_ptr(zph)) })
    }

    fn zpool_name_to_prop(&self, name: &CStr) -> c_int {
        unsafe { ffi::zpool_name_to_prop(name.as_ptr()) }
    }

    fn zpool_get_prop(
        &self,
        zph: ZpoolHandle,
        prop: c_int,
        buf: &mut PropBuf,
        source: &mut EnumSlot<PropSource>,
        abi: &AbiMode,
    ) -> c_int {
        let (raw, len) = (zpool_ptr(zph), buf.capacity());
        match conv(abi) {
            None => self.disabled("zpool_get_prop"),
            Some(Conv::Legacy) => match resolve!(self, "zpool_get_prop", ffi::zpool_get_prop_legacy) {
                Some(get) => unsafe { get(raw, prop, buf.as_mut_ptr(), len, source.as_mut_ptr()) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zpool_get_prop", ffi::zpool_get_prop_openzfs) {
                Some(get) => unsafe { get(raw, prop, buf.as_mut_ptr(), len, source.as_mut_ptr(), B_FALSE) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zpool_get_status(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int {
        // msgid points at static storage inside libzfs
        let mut msgid: *mut c_char = ptr::null_mut();
        match conv(abi) {
            None => self.disabled("zpool_get_status"),
            Some(Conv::Legacy) => match resolve!(self, "zpool_get_status", ffi::zpool_get_status_legacy) {
                Some(status) => unsafe { status(zpool_ptr(zph), &mut msgid) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zpool_get_status", ffi::zpool_get_status_openzfs) {
                Some(status) => {
                    let mut errata: c_int = 0;
                    unsafe { status(zpool_ptr(zph), &mut msgid, &mut errata) }
                }
                None => UNAVAILABLE,
            },
        }
    }

    fn zpool_get_state(&self, zph: ZpoolHandle, _abi: &AbiMode) -> c_int {
        unsafe { ffi::zpool_get_state(zpool_ptr(zph)) }
    }

    fn zpool_disable_datasets(&self, zph: ZpoolHandle, force: bool) -> c_int {
        unsafe { ffi::zpool_disable_datasets(zpool_ptr(zph), boolean(force)) }
    }

    fn zpool_export(&self, zph: ZpoolHandle, force: bool, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zpool_export"),
            Some(Conv::Legacy) => match resolve!(self, "zpool_export", ffi::zpool_export_legacy) {
                Some(export) => unsafe { export(zpool_ptr(zph), boolean(force)) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zpool_export", ffi::zpool_export_openzfs) {
                Some(export) => unsafe { export(zpool_ptr(zph), boolean(force), ptr::null()) },
                None => UNAVAILABLE,
            },
        }
    }

    fn zpool_export_force(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int {
        match conv(abi) {
            None => self.disabled("zpool_export_force"),
            Some(Conv::Legacy) => match resolve!(self, "zpool_export_force", ffi::zpool_export_force_legacy) {
                Some(export) => unsafe { export(zpool_ptr(zph)) },
                None => UNAVAILABLE,
            },
            Some(_) => match resolve!(self, "zpool_export_force", ffi::zpool_export_force_openzfs) {
                Some(export) => unsafe { export(zpool_ptr(zph), ptr::null()) },
                None => UNAVAILABLE,
            },
        }
    }

    // --- nvlist ----------------------------------------------------------

    fn nvlist_alloc(&self, out: &mut PtrSlot<NvListPtr>, flags: c_uint) -> c_int {
        unsafe { nvpair_sys::nvlist_alloc(out.as_mut_ptr() as *mut *mut nvlist_t, flags, ffi::KM_SLEEP) }
    }

    fn nvlist_free(&self, nvl: NvListPtr) {
        unsafe { nvpair_sys::nvlist_free(nvl_ptr(nvl)) }
    }

    fn nvlist_add_string(&self, nvl: NvListPtr, name: &CStr, value: &CStr) -> c_int {
        unsafe { nvpair_sys::nvlist_add_string(nvl_ptr(nvl), name.as_ptr(), value.as_ptr()) }
    }

    fn nvlist_add_boolean_value(&self, nvl: NvListPtr, name: &CStr, value: bool) -> c_int {
        unsafe { ffi::nvlist_add_boolean_value(nvl_ptr(nvl), name.as_ptr(), boolean(value)) }
    }

    fn nvlist_add_boolean(&self, nvl: NvListPtr, name: &CStr) -> c_int {
        unsafe { ffi::nvlist_add_boolean(nvl_ptr(nvl), name.as_ptr()) }
    }

    fn nvlist_add_nvlist(&self, nvl: NvListPtr, name: &CStr, value: NvListPtr) -> c_int {
        unsafe { ffi::nvlist_add_nvlist(nvl_ptr(nvl), name.as_ptr(), nvl_ptr(value)) }
    }

    fn nvlist_lookup_string(&self, nvl: NvListPtr, name: &CStr, out: &mut Option<String>) -> c_int {
        let mut value: *const c_char = ptr::null();
        let ret = unsafe { ffi::nvlist_lookup_string(nvl_ptr(nvl), name.as_ptr(), &mut value) };
        if ret == 0 {
            *out = Some(owned(value));
        }
        ret
    }

    fn nvlist_lookup_boolean_value(&self, nvl: NvListPtr, name: &CStr, out: &mut BooleanSlot) -> c_int {
        unsafe { ffi::nvlist_lookup_boolean_value(nvl_ptr(nvl), name.as_ptr(), out.as_mut_ptr()) }
    }

    fn nvlist_lookup_nvlist(&self, nvl: NvListPtr, name: &CStr, out: &mut PtrSlot<NvListPtr>) -> c_int {
        unsafe {
            nvpair_sys::nvlist_lookup_nvlist(nvl_ptr(nvl), name.as_ptr(), out.as_mut_ptr() as *mut *mut nvlist_t)
        }
    }

    fn nvlist_exists(&self, nvl: NvListPtr, name: &CStr) -> bool {
        unsafe { ffi::nvlist_exists(nvl_ptr(nvl), name.as_ptr()) != B_FALSE }
    }

    fn nvlist_names(&self, nvl: NvListPtr) -> Vec<String> {
        let raw = nvl_ptr(nvl);
        let mut names = Vec::new();
        let mut pair = unsafe { ffi::nvlist_next_nvpair(raw, ptr::null_mut()) };
        while !pair.is_null() {
            names.push(owned(unsafe { ffi::nvpair_name(pair) }));
            pair = unsafe { ffi::nvlist_next_nvpair(raw, pair) };
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_follows_mode() {
        assert_eq!(conv(&AbiMode::Disabled), None);
        assert_eq!(conv(&AbiMode::Legacy), Some(Conv::Legacy));
        assert_eq!(conv(&AbiMode::OpenZfs), Some(Conv::OpenZfs));
        assert_eq!(conv(&AbiMode::Tagged("openzfs-2.1".to_string())), Some(Conv::OpenZfs));
        assert_eq!(conv(&AbiMode::Tagged("openzfs-2.2".to_string())), Some(Conv::V2_2));
        assert_eq!(conv(&AbiMode::Tagged("openzfs-2.3".to_string())), Some(Conv::V2_2));
    }

    #[test]
    fn test_protocol_list_is_terminated() {
        assert_eq!(sa_protocol(ShareProtocol::Nfs), [0, -1]);
        assert_eq!(sa_protocol(ShareProtocol::Smb), [1, -1]);
    }

    unsafe extern "C" fn walk_two_snapshots(
        _zhp: *mut zfs_handle_t,
        func: ffi::zfs_iter_f,
        data: *mut c_void,
    ) -> c_int {
        for addr in [0x1000usize, 0x2000] {
            let ret = func(addr as *mut zfs_handle_t, data);
            if ret != 0 {
                return ret;
            }
        }
        0
    }

    /// Test: the Solaris-era snapshot walk receives the callback in its second slot
    #[test]
    fn test_legacy_snapshot_walk_reaches_callback() {
        let iter: ffi::zfs_iter_snapshots_legacy = walk_two_snapshots;
        let mut seen = Vec::new();
        let mut cb = |zhp: ZfsHandle| {
            seen.push(zhp.addr());
            0
        };
        let mut f: ZfsIterFn<'_> = &mut cb;
        let data = &mut f as *mut ZfsIterFn<'_> as *mut c_void;
        let ret = unsafe { iter(std::ptr::null_mut(), zfs_iter_trampoline, data) };
        assert_eq!(ret, 0);
        assert_eq!(seen, vec![0x1000, 0x2000]);
    }

    #[test]
    #[ignore = "Requires ZFS to be installed"]
    fn test_symbol_probe() {
        let native = NativeLibzfs::new();
        assert!(native.has_symbol("libzfs_init"));
        assert!(!native.has_symbol("zfs_no_such_entry_point"));
    }
}
