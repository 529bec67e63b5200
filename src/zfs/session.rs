// zfs/session.rs
// Library session: the libzfs handle, live-handle bookkeeping and error capture

use super::abi::{AbiFeature, AbiFeatureSet, AbiMode};
use super::backend::{NativeZfs, ZfsIterFn, ZpoolIterFn};
use super::config::Config;
use super::error::{ErrorCode, Result, ZfsError};
use super::handle::{LibHandle, ZfsHandle, ZpoolHandle};
use super::helpers::to_cstring;
use super::types::{DatasetKind, TypeMask};
use std::collections::HashSet;
use std::ffi::c_int;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct State {
    lib: Option<LibHandle>,
    live_zfs: HashSet<ZfsHandle>,
    live_zpool: HashSet<ZpoolHandle>,
}

/// A dataset handle adopted into the live set, with its resolved type.
pub(crate) type Adopted = (ZfsHandle, DatasetKind, String);

/// Shared by `LibZfs` and every object opened through it. All native calls
/// made on behalf of one library handle run under `state`, so a failing
/// call and the read of its last-error state cannot interleave with
/// another call.
pub(crate) struct Session {
    pub(crate) native: Arc<dyn NativeZfs>,
    pub(crate) features: AbiFeatureSet,
    state: Mutex<State>,
    noop_logged: Mutex<HashSet<String>>,
}

/// Access to the native side while the session lock is held.
pub(crate) struct Ctx<'a> {
    pub(crate) native: &'a dyn NativeZfs,
    pub(crate) lib: LibHandle,
    pub(crate) features: &'a AbiFeatureSet,
    state: &'a mut State,
}

impl<'a> Ctx<'a> {
    pub(crate) fn abi(&self, feature: AbiFeature) -> &'a AbiMode {
        self.features.mode(feature)
    }

    /// Native failure built from the library's last-error state. Must be
    /// called before any other native call on the same handle.
    pub(crate) fn native_error(&self, op: &str) -> ZfsError {
        let errno = self.native.libzfs_errno(self.lib);
        let code = ErrorCode::from_code(errno);
        let mut description = self.native.libzfs_error_description(self.lib);
        if description.is_empty() {
            description = code.description().to_string();
        }
        ZfsError::Native {
            op: op.to_string(),
            code,
            errno,
            description,
        }
    }

    pub(crate) fn check(&self, op: &str, ret: c_int) -> Result<()> {
        if ret == 0 {
            Ok(())
        } else {
            Err(self.native_error(op))
        }
    }

    /// True when the last failure means "does not exist" rather than an
    /// error: no error recorded, or `EZFS_NOENT`.
    pub(crate) fn is_not_found(&self) -> bool {
        let errno = self.native.libzfs_errno(self.lib);
        errno == 0 || ErrorCode::from_code(errno) == ErrorCode::NoEnt
    }

    /// Resolve the type of a fresh handle and add it to the live set.
    /// Handles with an unknown tag are closed and reported.
    pub(crate) fn adopt(&mut self, zhp: ZfsHandle) -> Result<Adopted> {
        let tag = self.native.zfs_get_type(zhp);
        let name = self.native.zfs_get_name(zhp);
        match DatasetKind::from_tag(tag) {
            Some(kind) => {
                self.state.live_zfs.insert(zhp);
                debug!(%zhp, name = %name, %kind, "dataset handle opened");
                Ok((zhp, kind, name))
            }
            None => {
                self.native.zfs_close(zhp);
                Err(ZfsError::Inconsistent { name, tag })
            }
        }
    }

    pub(crate) fn adopt_pool(&mut self, zph: ZpoolHandle) -> String {
        self.state.live_zpool.insert(zph);
        let name = self.native.zpool_get_name(zph);
        debug!(%zph, name = %name, "pool handle opened");
        name
    }

    pub(crate) fn release(&mut self, zhp: ZfsHandle) {
        if self.state.live_zfs.remove(&zhp) {
            self.native.zfs_close(zhp);
        }
    }

    pub(crate) fn release_pool(&mut self, zph: ZpoolHandle) {
        if self.state.live_zpool.remove(&zph) {
            self.native.zpool_close(zph);
        }
    }

    /// Adopt every handle yielded by one `zfs_iter_*` call. If any handle
    /// fails to adopt, or the iteration itself reports failure, every
    /// handle from this call is released again.
    pub(crate) fn collect(
        &mut self,
        op: &str,
        iterate: impl FnOnce(&dyn NativeZfs, ZfsIterFn<'_>) -> c_int,
    ) -> Result<Vec<Adopted>> {
        let mut raw = Vec::new();
        let ret = iterate(self.native, &mut |zhp| {
            raw.push(zhp);
            0
        });
        if ret != 0 {
            let err = self.native_error(op);
            for zhp in raw {
                self.native.zfs_close(zhp);
            }
            return Err(err);
        }

        let mut adopted = Vec::with_capacity(raw.len());
        let mut failure = None;
        for zhp in raw {
            if failure.is_some() {
                self.native.zfs_close(zhp);
                continue;
            }
            match self.adopt(zhp) {
                Ok(entry) => adopted.push(entry),
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            for (zhp, _, _) in adopted {
                self.release(zhp);
            }
            return Err(e);
        }
        Ok(adopted)
    }
}

impl Session {
    /// Resolve the ABI and, unless the wrapper is disabled, initialise
    /// libzfs. A disabled session makes no native call at all.
    pub(crate) fn open(native: Arc<dyn NativeZfs>, config: &Config) -> Result<Arc<Session>> {
        let features = AbiFeatureSet::detect(native.as_ref(), config);
        let lib = if features.is_enabled() {
            let lib = native
                .libzfs_init()
                .ok_or_else(|| ZfsError::LibraryUnavailable("libzfs_init failed".to_string()))?;
            native.libzfs_print_on_error(lib, false);
            debug!(%lib, "libzfs initialised");
            Some(lib)
        } else {
            None
        };

        Ok(Arc::new(Session {
            native,
            features,
            state: Mutex::new(State {
                lib,
                ..State::default()
            }),
            noop_logged: Mutex::new(HashSet::new()),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.lock().lib.is_some()
    }

    /// Run `f` with the library handle under the session lock.
    pub(crate) fn with_lib<T>(&self, f: impl FnOnce(&mut Ctx<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let lib = guard.lib.ok_or_else(|| {
            ZfsError::LibraryUnavailable(if self.features.is_enabled() {
                "library handle disposed".to_string()
            } else {
                "libzfs wrapper disabled".to_string()
            })
        })?;
        let mut ctx = Ctx {
            native: self.native.as_ref(),
            lib,
            features: &self.features,
            state: &mut guard,
        };
        f(&mut ctx)
    }

    /// Log, once per operation name, that `op` was short-circuited.
    pub(crate) fn note_noop(&self, op: &str) {
        let mut logged = self.noop_logged.lock().unwrap_or_else(|e| e.into_inner());
        if logged.insert(op.to_string()) {
            warn!(op, "libzfs operation disabled by configuration, returning empty result");
        }
    }

    /// Whether a query may reach the library; logs the short-circuit if not.
    pub(crate) fn query_enabled(&self, op: &str, feature: Option<AbiFeature>) -> bool {
        let enabled = match feature {
            Some(f) => self.features.is_operation_enabled(f),
            None => self.features.is_enabled(),
        };
        if !enabled {
            self.note_noop(op);
        }
        enabled
    }

    /// Like [`Session::query_enabled`] for mutating operations, which fail
    /// instead of returning an empty value.
    pub(crate) fn require(&self, op: &str, feature: Option<AbiFeature>) -> Result<()> {
        if self.query_enabled(op, feature) {
            Ok(())
        } else {
            Err(ZfsError::LibraryUnavailable(format!("{} is disabled", op)))
        }
    }

    /// `zfs_open` with not-found mapped to `None`.
    pub(crate) fn open_dataset(&self, name: &str, mask: TypeMask) -> Result<Option<Adopted>> {
        let c_name = to_cstring(name)?;
        self.with_lib(|ctx| match ctx.native.zfs_open(ctx.lib, &c_name, mask.bits()) {
            Some(zhp) => ctx.adopt(zhp).map(Some),
            None if ctx.is_not_found() => Ok(None),
            None => Err(ctx.native_error("zfs_open")),
        })
    }

    /// `zpool_open_canfail` with not-found mapped to `None`.
    pub(crate) fn open_pool(&self, name: &str) -> Result<Option<(ZpoolHandle, String)>> {
        let c_name = to_cstring(name)?;
        self.with_lib(|ctx| match ctx.native.zpool_open(ctx.lib, &c_name) {
            Some(zph) => Ok(Some((zph, ctx.adopt_pool(zph)))),
            None if ctx.is_not_found() => Ok(None),
            None => Err(ctx.native_error("zpool_open")),
        })
    }

    pub(crate) fn iter_pools(&self) -> Result<Vec<(ZpoolHandle, String)>> {
        self.with_lib(|ctx| {
            let mut raw = Vec::new();
            let mut collect = |zph: ZpoolHandle| {
                raw.push(zph);
                0
            };
            let f: ZpoolIterFn<'_> = &mut collect;
            let ret = ctx.native.zpool_iter(ctx.lib, f);
            if ret != 0 {
                let err = ctx.native_error("zpool_iter");
                for zph in raw {
                    ctx.native.zpool_close(zph);
                }
                return Err(err);
            }
            Ok(raw.into_iter().map(|zph| (zph, ctx.adopt_pool(zph))).collect())
        })
    }

    /// Close a dataset handle if it is still live. Closing twice, or after
    /// the session was disposed, does nothing.
    pub(crate) fn close_zfs(&self, zhp: ZfsHandle) {
        let mut state = self.lock();
        if state.live_zfs.remove(&zhp) {
            self.native.zfs_close(zhp);
            debug!(%zhp, "dataset handle closed");
        }
    }

    pub(crate) fn close_zpool(&self, zph: ZpoolHandle) {
        let mut state = self.lock();
        if state.live_zpool.remove(&zph) {
            self.native.zpool_close(zph);
            debug!(%zph, "pool handle closed");
        }
    }

    pub(crate) fn is_live(&self, zhp: ZfsHandle) -> bool {
        self.lock().live_zfs.contains(&zhp)
    }

    pub(crate) fn live_handles(&self) -> usize {
        let state = self.lock();
        state.live_zfs.len() + state.live_zpool.len()
    }

    /// Close every live handle, then release the library handle. Returns
    /// false if the session was already disposed.
    pub(crate) fn dispose(&self) -> bool {
        let mut state = self.lock();
        let Some(lib) = state.lib.take() else {
            return false;
        };
        let zfs: Vec<ZfsHandle> = state.live_zfs.drain().collect();
        let zpool: Vec<ZpoolHandle> = state.live_zpool.drain().collect();
        if !zfs.is_empty() || !zpool.is_empty() {
            debug!(
                datasets = zfs.len(),
                pools = zpool.len(),
                "closing handles still open at dispose"
            );
        }
        for zhp in zfs {
            self.native.zfs_close(zhp);
        }
        for zph in zpool {
            self.native.zpool_close(zph);
        }
        self.native.libzfs_fini(lib);
        debug!(%lib, "libzfs released");
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.lock())
            .field("features", &self.features)
            .finish()
    }
}
