// zfs/library.rs
// LibZfs: the library context every dataset and pool is opened through

use super::abi::{AbiFeature, AbiFeatureSet};
use super::backend::NativeZfs;
use super::config::Config;
use super::dataset::Dataset;
use super::error::{Result, ZfsError};
use super::helpers::{ancestors, to_cstring};
use super::nvlist::NvList;
use super::pool::ZfsPool;
use super::session::Session;
use super::types::{DatasetKind, TypeMask};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An initialised libzfs context.
///
/// Construct one explicitly and open datasets and pools through it.
/// Objects opened through a `LibZfs` keep its session alive, but
/// [`dispose`](LibZfs::dispose) (or dropping the `LibZfs`) closes every
/// handle still open and releases the library; later calls on those
/// objects fail with [`ZfsError::LibraryUnavailable`].
///
/// When the wrapper is disabled through `LIBZFS4J_ABI`, no native call is
/// made at all: queries return empty results and
/// [`is_enabled`](LibZfs::is_enabled) reports `false`.
pub struct LibZfs {
    session: Arc<Session>,
}

impl LibZfs {
    /// Link against the system libzfs, configured from the process
    /// environment.
    #[cfg(feature = "native")]
    pub fn new() -> Result<LibZfs> {
        let native: Arc<dyn NativeZfs> = Arc::new(super::native::NativeLibzfs::new());
        Self::with_backend(native, Config::from_env())
    }

    /// Use `native` as the libzfs implementation.
    pub fn with_backend(native: Arc<dyn NativeZfs>, config: Config) -> Result<LibZfs> {
        Ok(LibZfs {
            session: Session::open(native, &config)?,
        })
    }

    pub fn native(&self) -> Arc<dyn NativeZfs> {
        self.session.native.clone()
    }

    // ------------------------------------------------------------------
    // ABI queries
    // ------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.session.features.is_enabled()
    }

    pub fn is_operation_enabled(&self, feature: AbiFeature) -> bool {
        self.session.features.is_operation_enabled(feature)
    }

    pub fn features(&self) -> &AbiFeatureSet {
        &self.session.features
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Root filesystem of every imported pool.
    pub fn roots(&self) -> Result<Vec<Dataset>> {
        if !self.session.query_enabled("roots", None) {
            return Ok(Vec::new());
        }
        let adopted = self.session.with_lib(|ctx| {
            let lib = ctx.lib;
            ctx.collect("zfs_iter_root", |native, f| native.zfs_iter_root(lib, f))
        })?;
        Ok(Dataset::wrap_all(&self.session, adopted))
    }

    pub fn pools(&self) -> Result<Vec<ZfsPool>> {
        if !self.session.query_enabled("pools", None) {
            return Ok(Vec::new());
        }
        Ok(self
            .session
            .iter_pools()?
            .into_iter()
            .map(|(zph, name)| ZfsPool::wrap(self.session.clone(), zph, name))
            .collect())
    }

    pub fn pool(&self, name: &str) -> Result<Option<ZfsPool>> {
        if !self.session.query_enabled("pool", None) {
            return Ok(None);
        }
        Ok(self
            .session
            .open_pool(name)?
            .map(|(zph, name)| ZfsPool::wrap(self.session.clone(), zph, name)))
    }

    // ------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------

    /// Whether a filesystem, snapshot or volume called `name` exists.
    pub fn exists(&self, name: &str) -> Result<bool> {
        self.exists_as(name, TypeMask::DATASET)
    }

    pub fn exists_as(&self, name: &str, mask: TypeMask) -> Result<bool> {
        if !self.session.query_enabled("exists", None) {
            return Ok(false);
        }
        let c_name = to_cstring(name)?;
        self.session
            .with_lib(|ctx| Ok(ctx.native.zfs_dataset_exists(ctx.lib, &c_name, mask.bits())))
    }

    /// Open a filesystem, snapshot or volume. A name that does not exist
    /// is `Ok(None)`.
    pub fn open(&self, name: &str) -> Result<Option<Dataset>> {
        self.open_as(name, TypeMask::DATASET)
    }

    pub fn open_as(&self, name: &str, mask: TypeMask) -> Result<Option<Dataset>> {
        if !self.session.query_enabled("open", None) {
            return Ok(None);
        }
        Ok(self
            .session
            .open_dataset(name, mask)?
            .map(|a| Dataset::wrap(self.session.clone(), a)))
    }

    /// Create a filesystem or volume and open it.
    ///
    /// Missing intermediate filesystems are created first, root to leaf,
    /// each without properties. If one of them fails the error is returned
    /// and the ancestors created so far are left in place.
    pub fn create(
        &self,
        name: &str,
        kind: DatasetKind,
        props: &BTreeMap<String, String>,
    ) -> Result<Option<Dataset>> {
        if !self.session.query_enabled("create", None) {
            return Ok(None);
        }
        if !matches!(kind, DatasetKind::FileSystem | DatasetKind::Volume) {
            return Err(ZfsError::unsupported("create", kind));
        }
        let c_name = to_cstring(name)?;
        let props = NvList::from_map(self.native(), props)?;
        let mut missing = Vec::new();
        for ancestor in ancestors(name) {
            missing.push((ancestor, to_cstring(ancestor)?));
        }

        self.session.with_lib(|ctx| {
            for (ancestor, c_ancestor) in &missing {
                let fs = TypeMask::FILESYSTEM.bits();
                if ctx.native.zfs_dataset_exists(ctx.lib, c_ancestor, fs) {
                    continue;
                }
                let ret = ctx
                    .native
                    .zfs_create(ctx.lib, c_ancestor, DatasetKind::FileSystem.tag(), None);
                ctx.check("zfs_create", ret)?;
                debug!(dataset = %ancestor, "intermediate filesystem created");
            }
            let ret = ctx
                .native
                .zfs_create(ctx.lib, &c_name, kind.tag(), Some(props.as_ptr()));
            ctx.check("zfs_create", ret)
        })?;
        debug!(dataset = %name, %kind, "dataset created");

        self.open(name)
    }

    /// Allocate an empty unique-name nvlist on this library's backend.
    pub fn new_nvlist(&self) -> Result<NvList> {
        NvList::alloc_map(self.native())
    }

    /// Number of dataset and pool handles currently open.
    pub fn live_handles(&self) -> usize {
        self.session.live_handles()
    }

    /// Close every open handle and release the library. Returns `false`
    /// when already disposed.
    pub fn dispose(&self) -> bool {
        self.session.dispose()
    }
}

impl Drop for LibZfs {
    fn drop(&mut self) {
        self.session.dispose();
    }
}

impl fmt::Debug for LibZfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibZfs")
            .field("session", &self.session)
            .finish()
    }
}
