// zfs/dataset.rs
// Dataset objects: filesystems, snapshots and volumes behind one open handle

use super::abi::AbiFeature;
use super::acl::AclBuilder;
use super::backend::ZPROP_INVAL;
use super::byref::{EnumSlot, PropBuf};
use super::error::{Result, ZfsError};
use super::handle::ZfsHandle;
use super::helpers::{pool_of, to_cstring};
use super::nvlist::NvList;
use super::pool::ZfsPool;
use super::session::{Adopted, Ctx, Session};
use super::types::{
    Capabilities, DatasetKind, MountFlags, PropSource, ShareProtocol, TypeMask, ZfsProp, ZpoolProp,
};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// Property reads shared with the pool and library objects
// ============================================================================

/// `zfs_prop_get` by name. A property the running library does not know,
/// or one it cannot read for this dataset, is `None`. The library's last
/// error is left over from earlier calls, so a failed read says nothing
/// about this one.
pub(crate) fn read_prop(ctx: &Ctx<'_>, zhp: ZfsHandle, prop: ZfsProp) -> Result<Option<String>> {
    let c_name = to_cstring(prop.name())?;
    let id = ctx.native.zfs_name_to_prop(&c_name);
    if id == ZPROP_INVAL {
        return Ok(None);
    }
    let mut buf = PropBuf::new();
    let mut source = EnumSlot::<PropSource>::default();
    if ctx.native.zfs_prop_get(zhp, id, &mut buf, &mut source, true) != 0 {
        trace!(%zhp, prop = %prop, "property has no value");
        return Ok(None);
    }
    Ok(Some(buf.read()))
}

fn createtxg(ctx: &Ctx<'_>, zhp: ZfsHandle) -> Result<u64> {
    Ok(read_prop(ctx, zhp, ZfsProp::Createtxg)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

// ============================================================================
// Dataset
// ============================================================================

/// An open filesystem, snapshot or volume.
///
/// Owns one native dataset handle. The handle is released by [`close`],
/// by [`destroy`], or as a fallback when the value is dropped; dropping is
/// not a substitute for closing when handle lifetime matters. Equality and
/// hashing follow the native handle, not the name.
///
/// Operations a kind does not support fail with [`ZfsError::Unsupported`];
/// see [`Capabilities::of`].
///
/// [`close`]: Dataset::close
/// [`destroy`]: Dataset::destroy
pub struct Dataset {
    session: Arc<Session>,
    raw: ZfsHandle,
    kind: DatasetKind,
    name: String,
    closed: bool,
}

impl Dataset {
    pub(crate) fn wrap(session: Arc<Session>, (raw, kind, name): Adopted) -> Dataset {
        Dataset {
            session,
            raw,
            kind,
            name,
            closed: false,
        }
    }

    pub(crate) fn wrap_all(session: &Arc<Session>, adopted: Vec<Adopted>) -> Vec<Dataset> {
        adopted
            .into_iter()
            .map(|a| Dataset::wrap(session.clone(), a))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::of(self.kind)
    }

    pub fn handle(&self) -> ZfsHandle {
        self.raw
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn require(&self, op: &str, cap: Capabilities) -> Result<()> {
        if self.closed {
            return Err(ZfsError::Closed);
        }
        if !self.capabilities().contains(cap) {
            return Err(ZfsError::unsupported(op, self.kind));
        }
        Ok(())
    }

    /// Run `f` on this handle under the session lock.
    fn call<T>(&self, f: impl FnOnce(&mut Ctx<'_>, ZfsHandle) -> Result<T>) -> Result<T> {
        if self.closed {
            return Err(ZfsError::Closed);
        }
        let raw = self.raw;
        self.session.with_lib(|ctx| f(ctx, raw))
    }

    fn open_sibling(&self, name: &str, mask: TypeMask) -> Result<Option<Dataset>> {
        Ok(self
            .session
            .open_dataset(name, mask)?
            .map(|a| Dataset::wrap(self.session.clone(), a)))
    }

    // --- enumeration ------------------------------------------------------

    /// Direct children: filesystems, volumes and snapshots, not recursive.
    pub fn children(&self) -> Result<Vec<Dataset>> {
        self.require("children", Capabilities::CHILDREN)?;
        if !self.session.query_enabled("children", Some(AbiFeature::ZfsIter)) {
            return Ok(Vec::new());
        }
        let adopted = self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZfsIter);
            ctx.collect("zfs_iter_children", |native, f| {
                native.zfs_iter_children(raw, f, abi)
            })
        })?;
        Ok(Dataset::wrap_all(&self.session, adopted))
    }

    /// Direct children of one kind. Handles of other kinds are closed.
    pub fn children_of(&self, kind: DatasetKind) -> Result<Vec<Dataset>> {
        Ok(self
            .children()?
            .into_iter()
            .filter(|d| d.kind == kind)
            .collect())
    }

    /// Child filesystems and volumes, not recursive.
    pub fn filesystems(&self) -> Result<Vec<Dataset>> {
        self.require("filesystems", Capabilities::CHILDREN)?;
        if !self
            .session
            .query_enabled("filesystems", Some(AbiFeature::ZfsIter))
        {
            return Ok(Vec::new());
        }
        let adopted = self.call(|ctx, raw| iter_filesystems(ctx, raw))?;
        Ok(Dataset::wrap_all(&self.session, adopted))
    }

    /// Snapshots of this dataset, oldest first (by `createtxg`).
    pub fn snapshots(&self) -> Result<Vec<Dataset>> {
        self.require("snapshots", Capabilities::SNAPSHOT)?;
        if !self.session.query_enabled("snapshots", Some(AbiFeature::ZfsIter)) {
            return Ok(Vec::new());
        }
        let adopted = self.call(|ctx, raw| iter_snapshots(ctx, raw))?;
        Ok(Dataset::wrap_all(&self.session, adopted))
    }

    /// Everything below this dataset, depth first. Each node's snapshots
    /// come before its child filesystems, and each child is followed by its
    /// own subtree. `self` is not included.
    pub fn descendants(&self) -> Result<Vec<Dataset>> {
        self.require("descendants", Capabilities::CHILDREN)?;
        if !self
            .session
            .query_enabled("descendants", Some(AbiFeature::ZfsIter))
        {
            return Ok(Vec::new());
        }
        let adopted = self.call(|ctx, raw| {
            let mut out = Vec::new();
            let mut visited = HashSet::new();
            visited.insert(ctx.native.zfs_get_name(raw));
            match descend(ctx, raw, true, &mut visited, &mut out) {
                Ok(()) => Ok(out),
                Err(e) => {
                    for (zhp, _, _) in out {
                        ctx.release(zhp);
                    }
                    Err(e)
                }
            }
        })?;
        Ok(Dataset::wrap_all(&self.session, adopted))
    }

    pub fn descendants_of(&self, kind: DatasetKind) -> Result<Vec<Dataset>> {
        Ok(self
            .descendants()?
            .into_iter()
            .filter(|d| d.kind == kind)
            .collect())
    }

    // --- mount ------------------------------------------------------------

    pub fn mount(&self) -> Result<()> {
        self.mount_with(None, MountFlags::NONE)
    }

    pub fn mount_with(&self, options: Option<&str>, flags: MountFlags) -> Result<()> {
        self.require("mount", Capabilities::MOUNT)?;
        let options = options.map(to_cstring).transpose()?;
        self.call(|ctx, raw| {
            let ret = ctx.native.zfs_mount(raw, options.as_deref(), flags.bits());
            ctx.check("zfs_mount", ret)
        })?;
        debug!(dataset = %self.name, "mounted");
        Ok(())
    }

    pub fn unmount(&self) -> Result<()> {
        self.unmount_with(MountFlags::NONE)
    }

    pub fn unmount_with(&self, flags: MountFlags) -> Result<()> {
        self.require("unmount", Capabilities::MOUNT)?;
        self.call(|ctx, raw| {
            let ret = ctx.native.zfs_unmount(raw, None, flags.bits());
            ctx.check("zfs_unmount", ret)
        })?;
        debug!(dataset = %self.name, "unmounted");
        Ok(())
    }

    pub fn is_mounted(&self) -> Result<bool> {
        self.require("is_mounted", Capabilities::MOUNT)?;
        self.call(|ctx, raw| {
            let mut mountpoint = None;
            Ok(ctx.native.zfs_is_mounted(raw, &mut mountpoint))
        })
    }

    /// Where the filesystem is mounted, or its configured mountpoint when
    /// it is not. `none` and `legacy` mountpoints yield `None`.
    pub fn mountpoint(&self) -> Result<Option<PathBuf>> {
        self.require("mountpoint", Capabilities::MOUNT)?;
        self.call(|ctx, raw| {
            let mut current = None;
            if ctx.native.zfs_is_mounted(raw, &mut current) {
                if let Some(path) = current {
                    return Ok(Some(PathBuf::from(path)));
                }
            }
            Ok(read_prop(ctx, raw, ZfsProp::Mountpoint)?
                .filter(|v| !matches!(v.as_str(), "none" | "legacy" | "-" | ""))
                .map(PathBuf::from))
        })
    }

    pub fn set_mountpoint(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.require("set_mountpoint", Capabilities::MOUNT)?;
        let path = path.into();
        self.set_property(ZfsProp::Mountpoint.name(), &path.to_string_lossy())
    }

    // --- share ------------------------------------------------------------

    /// Share over every protocol enabled by the `share*` properties.
    pub fn share(&self) -> Result<()> {
        self.require("share", Capabilities::SHARE)?;
        self.session.require("share", Some(AbiFeature::ZfsShare))?;
        self.call(|ctx, raw| {
            let ret = ctx.native.zfs_share(raw, ctx.abi(AbiFeature::ZfsShare));
            ctx.check("zfs_share", ret)
        })
    }

    pub fn unshare(&self) -> Result<()> {
        self.require("unshare", Capabilities::SHARE)?;
        self.session.require("unshare", Some(AbiFeature::ZfsShare))?;
        self.call(|ctx, raw| {
            let ret = ctx.native.zfs_unshare(raw, ctx.abi(AbiFeature::ZfsShare));
            ctx.check("zfs_unshare", ret)
        })
    }

    fn share_proto(&self, op: &str, proto: ShareProtocol, on: bool) -> Result<()> {
        self.require(op, Capabilities::SHARE)?;
        self.session.require(op, Some(AbiFeature::ZfsShare))?;
        self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZfsShare);
            let ret = if on {
                ctx.native.zfs_share_proto(raw, proto, abi)
            } else {
                ctx.native.zfs_unshare_proto(raw, proto, abi)
            };
            ctx.check(op, ret)
        })
    }

    pub fn share_nfs(&self) -> Result<()> {
        self.share_proto("zfs_share_nfs", ShareProtocol::Nfs, true)
    }

    pub fn share_smb(&self) -> Result<()> {
        self.share_proto("zfs_share_smb", ShareProtocol::Smb, true)
    }

    pub fn unshare_nfs(&self) -> Result<()> {
        self.share_proto("zfs_unshare_nfs", ShareProtocol::Nfs, false)
    }

    pub fn unshare_smb(&self) -> Result<()> {
        self.share_proto("zfs_unshare_smb", ShareProtocol::Smb, false)
    }

    pub fn is_shared(&self) -> Result<bool> {
        if self.closed {
            return Err(ZfsError::Closed);
        }
        if !self.capabilities().contains(Capabilities::SHARE)
            && !self.capabilities().contains(Capabilities::SHARE_ISCSI)
        {
            return Err(ZfsError::unsupported("is_shared", self.kind));
        }
        self.call(|ctx, raw| Ok(ctx.native.zfs_is_shared(raw)))
    }

    /// Volumes only. Absent from OpenZFS; the feature is `NO-OP` unless the
    /// library exports `zfs_share_iscsi`.
    pub fn share_iscsi(&self) -> Result<()> {
        self.require("share_iscsi", Capabilities::SHARE_ISCSI)?;
        self.session
            .require("share_iscsi", Some(AbiFeature::ZfsShareIscsi))?;
        self.call(|ctx, raw| ctx.check("zfs_share_iscsi", ctx.native.zfs_share_iscsi(raw)))
    }

    pub fn unshare_iscsi(&self) -> Result<()> {
        self.require("unshare_iscsi", Capabilities::SHARE_ISCSI)?;
        self.session
            .require("unshare_iscsi", Some(AbiFeature::ZfsShareIscsi))?;
        self.call(|ctx, raw| ctx.check("zfs_unshare_iscsi", ctx.native.zfs_unshare_iscsi(raw)))
    }

    // --- snapshot, clone, rollback, rename, promote, destroy ---------------

    /// Create `<name>@<snapshot>`, optionally for every descendant too, and
    /// open it.
    pub fn snapshot(&self, snapshot: &str, recursive: bool) -> Result<Option<Dataset>> {
        self.require("snapshot", Capabilities::SNAPSHOT)?;
        if snapshot.is_empty() || snapshot.contains(|c: char| c == '@' || c == '/') {
            return Err(ZfsError::InvalidName(snapshot.to_string()));
        }
        self.session
            .require("snapshot", Some(AbiFeature::ZfsSnapshot))?;
        let full = format!("{}@{}", self.name, snapshot);
        let c_full = to_cstring(&full)?;
        self.call(|ctx, _| {
            let abi = ctx.abi(AbiFeature::ZfsSnapshot);
            let ret = ctx.native.zfs_snapshot(ctx.lib, &c_full, recursive, None, abi);
            ctx.check("zfs_snapshot", ret)
        })?;
        debug!(snapshot = %full, recursive, "snapshot created");
        self.open_sibling(&full, TypeMask::SNAPSHOT)
    }

    /// Clone this snapshot to `target`, then mount and share the clone the
    /// way `zfs clone` does. The share step is skipped when sharing is
    /// switched off for the running ABI.
    pub fn clone_to(&self, target: &str) -> Result<Option<Dataset>> {
        self.require("clone", Capabilities::CLONE)?;
        let c_target = to_cstring(target)?;
        self.call(|ctx, raw| ctx.check("zfs_clone", ctx.native.zfs_clone(raw, &c_target, None)))?;
        debug!(origin = %self.name, clone = %target, "clone created");

        let Some(clone) = self.open_sibling(target, TypeMask::FILESYSTEM)? else {
            return Ok(None);
        };
        clone.mount()?;
        if self.session.query_enabled("share", Some(AbiFeature::ZfsShare)) {
            clone.share()?;
        }
        Ok(Some(clone))
    }

    /// Roll back to `snapshot`, which must be a snapshot of this dataset.
    /// Later snapshots are destroyed by the library.
    pub fn rollback(&self, snapshot: &Dataset, force: bool) -> Result<()> {
        self.require("rollback", Capabilities::ROLLBACK)?;
        if snapshot.kind != DatasetKind::Snapshot {
            return Err(ZfsError::unsupported("rollback target", snapshot.kind));
        }
        if snapshot.closed {
            return Err(ZfsError::Closed);
        }
        let snap = snapshot.raw;
        self.call(|ctx, raw| {
            ctx.check("zfs_rollback", ctx.native.zfs_rollback(raw, snap, force))
        })
    }

    /// Rename this dataset. The handle stays valid and follows the new name.
    pub fn rename(&mut self, target: &str, recursive: bool, force_unmount: bool) -> Result<()> {
        self.require("rename", Capabilities::RENAME)?;
        self.session.require("rename", Some(AbiFeature::ZfsRename))?;
        let c_target = to_cstring(target)?;
        self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZfsRename);
            let ret = ctx
                .native
                .zfs_rename(raw, &c_target, recursive, force_unmount, abi);
            ctx.check("zfs_rename", ret)
        })?;
        debug!(from = %self.name, to = %target, "dataset renamed");
        self.name = target.to_string();
        Ok(())
    }

    /// Make this clone independent of its origin snapshot.
    pub fn promote(&self) -> Result<()> {
        if self.kind != DatasetKind::FileSystem {
            return Err(ZfsError::unsupported("promote", self.kind));
        }
        self.call(|ctx, raw| ctx.check("zfs_promote", ctx.native.zfs_promote(raw)))
    }

    /// Destroy the dataset and release its handle.
    pub fn destroy(mut self) -> Result<()> {
        self.require("destroy", Capabilities::DESTROY)?;
        self.session.require("destroy", Some(AbiFeature::ZfsDestroy))?;
        self.call(|ctx, raw| {
            let ret = ctx
                .native
                .zfs_destroy(raw, false, ctx.abi(AbiFeature::ZfsDestroy));
            ctx.check("zfs_destroy", ret)
        })?;
        debug!(dataset = %self.name, "dataset destroyed");
        self.close();
        Ok(())
    }

    // --- properties -------------------------------------------------------

    pub fn set_property(&self, name: &str, value: &str) -> Result<()> {
        self.require("set_property", Capabilities::DATASET_PROPS)?;
        let c_name = to_cstring(name)?;
        let c_value = std::ffi::CString::new(value)
            .map_err(|_| ZfsError::InvalidName(value.to_string()))?;
        self.call(|ctx, raw| {
            ctx.check("zfs_prop_set", ctx.native.zfs_prop_set(raw, &c_name, &c_value))
        })
    }

    /// Native property value, `None` when the property does not apply.
    pub fn property(&self, prop: ZfsProp) -> Result<Option<String>> {
        self.require("property", Capabilities::DATASET_PROPS)?;
        self.call(|ctx, raw| read_prop(ctx, raw, prop))
    }

    /// Values of `props`. Properties without a value are left out.
    pub fn properties(&self, props: &[ZfsProp]) -> Result<BTreeMap<ZfsProp, String>> {
        self.require("properties", Capabilities::DATASET_PROPS)?;
        self.call(|ctx, raw| {
            let mut out = BTreeMap::new();
            for &prop in props {
                if let Some(value) = read_prop(ctx, raw, prop)? {
                    out.insert(prop, value);
                }
            }
            Ok(out)
        })
    }

    /// User property (`module:name`), local or inherited.
    pub fn user_property(&self, key: &str) -> Result<Option<String>> {
        self.require("user_property", Capabilities::DATASET_PROPS)?;
        self.call(|ctx, raw| {
            let Some(props) = ctx.native.zfs_get_user_props(raw) else {
                return Ok(None);
            };
            let props = super::nvlist::NvListRef::new(ctx.native, props);
            match props.get_nested(key)? {
                Some(entry) => entry.get_string("value"),
                None => Ok(None),
            }
        })
    }

    /// Every user property visible on this dataset.
    pub fn user_properties(&self) -> Result<BTreeMap<String, String>> {
        self.require("user_properties", Capabilities::DATASET_PROPS)?;
        self.call(|ctx, raw| {
            let mut out = BTreeMap::new();
            let Some(props) = ctx.native.zfs_get_user_props(raw) else {
                return Ok(out);
            };
            let props = super::nvlist::NvListRef::new(ctx.native, props);
            for key in props.keys() {
                if let Some(value) = props
                    .get_nested(&key)?
                    .map(|entry| entry.get_string("value"))
                    .transpose()?
                    .flatten()
                {
                    out.insert(key, value);
                }
            }
            Ok(out)
        })
    }

    /// Clear the local value of `name` so it is inherited again. Cached
    /// properties of this handle are refreshed once afterwards.
    pub fn inherit_property(&self, name: &str) -> Result<()> {
        self.require("inherit_property", Capabilities::DATASET_PROPS)?;
        self.session
            .require("inherit_property", Some(AbiFeature::ZfsPropInherit))?;
        let c_name = to_cstring(name)?;
        self.call(|ctx, raw| {
            let abi = ctx.abi(AbiFeature::ZfsPropInherit);
            let ret = ctx.native.zfs_prop_inherit(raw, &c_name, false, abi);
            ctx.check("zfs_prop_inherit", ret)?;
            ctx.native.zfs_refresh_properties(raw);
            Ok(())
        })
    }

    // --- pool -------------------------------------------------------------

    /// The pool containing this dataset.
    pub fn pool(&self) -> Result<Option<ZfsPool>> {
        let pool_name = self.call(|ctx, raw| Ok(ctx.native.zfs_get_pool_name(raw)))?;
        Ok(self
            .session
            .open_pool(&pool_name)?
            .map(|(zph, name)| ZfsPool::wrap(self.session.clone(), zph, name)))
    }

    /// Property of the containing pool. The pool handle is opened for the
    /// read and closed again.
    pub fn pool_property(&self, prop: ZpoolProp) -> Result<Option<String>> {
        if self.closed {
            return Err(ZfsError::Closed);
        }
        if !self
            .session
            .query_enabled("pool_property", Some(AbiFeature::ZpoolGetProp))
        {
            return Ok(None);
        }
        let c_pool = to_cstring(pool_of(&self.name))?;
        self.call(|ctx, _| {
            let Some(zph) = ctx.native.zpool_open(ctx.lib, &c_pool) else {
                return if ctx.is_not_found() {
                    Ok(None)
                } else {
                    Err(ctx.native_error("zpool_open"))
                };
            };
            let value = super::pool::read_pool_prop(ctx, zph, prop);
            ctx.native.zpool_close(zph);
            value
        })
    }

    // --- delegation -------------------------------------------------------

    /// Grant the permissions in `acl`.
    pub fn allow(&self, acl: &AclBuilder) -> Result<()> {
        self.update_permissions("allow", acl, false)
    }

    /// Revoke the permissions in `acl`.
    pub fn unallow(&self, acl: &AclBuilder) -> Result<()> {
        self.update_permissions("unallow", acl, true)
    }

    fn update_permissions(&self, op: &str, acl: &AclBuilder, remove: bool) -> Result<()> {
        self.require(op, Capabilities::PERMISSIONS)?;
        self.session.require(op, Some(AbiFeature::ZfsPerm))?;
        let abi = self.session.features.mode(AbiFeature::ZfsPerm);
        let list: NvList = acl.to_nvlist(self.session.native.clone(), abi)?;
        let ptr = list.as_ptr();
        self.call(|ctx, raw| {
            if remove {
                ctx.check("zfs_perm_remove", ctx.native.zfs_perm_remove(raw, ptr, abi))
            } else {
                ctx.check("zfs_perm_set", ctx.native.zfs_perm_set(raw, ptr, abi))
            }
        })
    }

    // --- lifecycle --------------------------------------------------------

    /// Release the native handle. Calling it again does nothing.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close_zfs(self.raw);
        }
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if !self.closed && self.session.is_live(self.raw) {
            trace!(dataset = %self.name, handle = %self.raw, "releasing unclosed dataset handle on drop");
        }
        self.close();
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Dataset {}

impl Hash for Dataset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("handle", &self.raw)
            .field("closed", &self.closed)
            .finish()
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Iteration under the session lock
// ============================================================================

fn iter_filesystems(ctx: &mut Ctx<'_>, raw: ZfsHandle) -> Result<Vec<Adopted>> {
    let abi = ctx.abi(AbiFeature::ZfsIter);
    ctx.collect("zfs_iter_filesystems", |native, f| {
        native.zfs_iter_filesystems(raw, f, abi)
    })
}

/// Snapshots of `raw` ordered by `createtxg`, then name.
fn iter_snapshots(ctx: &mut Ctx<'_>, raw: ZfsHandle) -> Result<Vec<Adopted>> {
    let abi = ctx.abi(AbiFeature::ZfsIter);
    let snaps = ctx.collect("zfs_iter_snapshots", |native, f| {
        native.zfs_iter_snapshots(raw, f, abi)
    })?;

    let mut keyed = Vec::with_capacity(snaps.len());
    let mut failure = None;
    for snap in &snaps {
        match createtxg(ctx, snap.0) {
            Ok(txg) => keyed.push(txg),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    if let Some(e) = failure {
        for (zhp, _, _) in snaps {
            ctx.release(zhp);
        }
        return Err(e);
    }

    let mut ordered: Vec<(u64, Adopted)> = keyed.into_iter().zip(snaps).collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1 .2.cmp(&b.1 .2)));
    Ok(ordered.into_iter().map(|(_, a)| a).collect())
}

/// Depth-first walk below `raw`, appending adopted handles to `out`.
fn descend(
    ctx: &mut Ctx<'_>,
    raw: ZfsHandle,
    has_snapshots: bool,
    visited: &mut HashSet<String>,
    out: &mut Vec<Adopted>,
) -> Result<()> {
    if has_snapshots {
        for snap in iter_snapshots(ctx, raw)? {
            if visited.insert(snap.2.clone()) {
                out.push(snap);
            } else {
                ctx.release(snap.0);
            }
        }
    }

    let children = iter_filesystems(ctx, raw)?;
    let mut pending = children.into_iter();
    while let Some(child) = pending.next() {
        if !visited.insert(child.2.clone()) {
            ctx.release(child.0);
            continue;
        }
        let (zhp, kind) = (child.0, child.1);
        out.push(child);
        let caps = Capabilities::of(kind);
        let walked = if caps.contains(Capabilities::CHILDREN) {
            descend(ctx, zhp, caps.contains(Capabilities::SNAPSHOT), visited, out)
        } else if caps.contains(Capabilities::SNAPSHOT) {
            iter_snapshots(ctx, zhp).map(|snaps| {
                for snap in snaps {
                    if visited.insert(snap.2.clone()) {
                        out.push(snap);
                    } else {
                        ctx.release(snap.0);
                    }
                }
            })
        } else {
            Ok(())
        };
        if let Err(e) = walked {
            for (rest, _, _) in pending.by_ref() {
                ctx.release(rest);
            }
            return Err(e);
        }
    }
    Ok(())
}
