// zfs/pool.rs
// Pool objects: status, capacity and export through a zpool handle

use super::abi::AbiFeature;
use super::backend::ZPROP_INVAL;
use super::byref::{EnumSlot, PropBuf};
use super::dataset::Dataset;
use super::error::{Result, ZfsError};
use super::handle::ZpoolHandle;
use super::helpers::{parse_size, to_cstring};
use super::session::{Ctx, Session};
use super::types::{PoolState, PoolStatus, PropSource, TypeMask, ZpoolProp};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// `zpool_get_prop` by name. Names are translated for the active ABI
/// before lookup; a failed read is `None`.
pub(crate) fn read_pool_prop(ctx: &Ctx<'_>, zph: ZpoolHandle, prop: ZpoolProp) -> Result<Option<String>> {
    let abi = ctx.abi(AbiFeature::ZpoolGetProp);
    let c_name = to_cstring(prop.native_name(abi))?;
    let id = ctx.native.zpool_name_to_prop(&c_name);
    if id == ZPROP_INVAL {
        return Ok(None);
    }
    let mut buf = PropBuf::new();
    let mut source = EnumSlot::<PropSource>::default();
    if ctx.native.zpool_get_prop(zph, id, &mut buf, &mut source, abi) != 0 {
        trace!(%zph, prop = %prop, "pool property has no value");
        return Ok(None);
    }
    Ok(Some(buf.read()))
}

/// An open storage pool.
pub struct ZfsPool {
    session: Arc<Session>,
    raw: ZpoolHandle,
    name: String,
    closed: bool,
}

impl ZfsPool {
    pub(crate) fn wrap(session: Arc<Session>, raw: ZpoolHandle, name: String) -> ZfsPool {
        ZfsPool {
            session,
            raw,
            name,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> ZpoolHandle {
        self.raw
    }

    fn call<T>(&self, f: impl FnOnce(&mut Ctx<'_>, ZpoolHandle) -> Result<T>) -> Result<T> {
        if self.closed {
            return Err(ZfsError::Closed);
        }
        let raw = self.raw;
        self.session.with_lib(|ctx| f(ctx, raw))
    }

    pub fn property(&self, prop: ZpoolProp) -> Result<Option<String>> {
        if !self
            .session
            .query_enabled("pool_property", Some(AbiFeature::ZpoolGetProp))
        {
            return Ok(None);
        }
        self.call(|ctx, raw| read_pool_prop(ctx, raw, prop))
    }

    /// Health summary as reported by `zpool status`.
    pub fn status(&self) -> Result<PoolStatus> {
        if !self
            .session
            .query_enabled("status", Some(AbiFeature::ZpoolGetStatus))
        {
            return Ok(PoolStatus::Unknown);
        }
        self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZpoolGetStatus);
            Ok(PoolStatus::from_ordinal(ctx.native.zpool_get_status(raw, abi), abi))
        })
    }

    pub fn state(&self) -> Result<PoolState> {
        if !self
            .session
            .query_enabled("state", Some(AbiFeature::ZpoolState))
        {
            return Ok(PoolState::Unknown);
        }
        self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZpoolState);
            Ok(PoolState::from_ordinal(ctx.native.zpool_get_state(raw, abi), abi))
        })
    }

    fn size_of(&self, prop: ZpoolProp) -> Result<Option<u64>> {
        Ok(self.property(prop)?.as_deref().and_then(parse_size))
    }

    /// Total size in bytes.
    pub fn size(&self) -> Result<Option<u64>> {
        self.size_of(ZpoolProp::Size)
    }

    pub fn available_size(&self) -> Result<Option<u64>> {
        self.size_of(ZpoolProp::Free)
    }

    pub fn used_size(&self) -> Result<Option<u64>> {
        self.size_of(ZpoolProp::Allocated)
    }

    /// Unmount and unshare every dataset of the pool.
    pub fn disable_datasets(&self, force: bool) -> Result<()> {
        self.call(|ctx, raw| {
            let ret = ctx.native.zpool_disable_datasets(raw, force);
            ctx.check("zpool_disable_datasets", ret)
        })
    }

    /// Export the pool. Datasets are disabled first; `hard_force` exports
    /// even when the pool is in use.
    pub fn export(mut self, force: bool, hard_force: bool) -> Result<()> {
        self.session
            .require("export", Some(AbiFeature::ZpoolExport))?;
        self.disable_datasets(force)?;
        self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZpoolExport);
            if hard_force {
                ctx.check("zpool_export_force", ctx.native.zpool_export_force(raw, abi))
            } else {
                ctx.check("zpool_export", ctx.native.zpool_export(raw, force, abi))
            }
        })?;
        info!(pool = %self.name, force, hard_force, "pool exported");
        self.close();
        Ok(())
    }

    /// Root filesystem of the pool.
    pub fn root(&self) -> Result<Option<Dataset>> {
        if self.closed {
            return Err(ZfsError::Closed);
        }
        Ok(self
            .session
            .open_dataset(&self.name, TypeMask::FILESYSTEM)?
            .map(|a| Dataset::wrap(self.session.clone(), a)))
    }

    /// Release the pool handle. Calling it again does nothing.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close_zpool(self.raw);
            debug!(pool = %self.name, "pool closed");
        }
    }
}

impl Drop for ZfsPool {
    fn drop(&mut self) {
        if !self.closed {
            trace!(pool = %self.name, handle = %self.raw, "releasing unclosed pool handle on drop");
        }
        self.close();
    }
}

impl PartialEq for ZfsPool {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ZfsPool {}

impl std::hash::Hash for ZfsPool {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for ZfsPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZfsPool")
            .field("name", &self.name)
            .field("handle", &self.raw)
            .field("closed", &self.closed)
            .finish()
    }
}
