// zfs/acl.rs
// Delegated-permission builder, materialised as a libzfs fsacl nvlist

use super::abi::AbiMode;
use super::backend::NativeZfs;
use super::error::Result;
use super::nvlist::NvList;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A permission that can be delegated with `zfs allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZfsPermission {
    Allow,
    Clone,
    Create,
    Destroy,
    Mount,
    Promote,
    Receive,
    Rename,
    Rollback,
    Snapshot,
    Share,
    Send,
    Aclinherit,
    Aclmode,
    Atime,
    Canmount,
    Checksum,
    Compression,
    Copies,
    Devices,
    Exec,
    Mountpoint,
    Primarycache,
    Quota,
    Readonly,
    Recordsize,
    Reservation,
    Secondarycache,
    Setuid,
    Shareiscsi,
    Sharenfs,
    Snapdir,
    Version,
    Volsize,
    Xattr,
    Zoned,
    Userprop,
}

impl ZfsPermission {
    pub const ALL: [ZfsPermission; 37] = [
        ZfsPermission::Allow,
        ZfsPermission::Clone,
        ZfsPermission::Create,
        ZfsPermission::Destroy,
        ZfsPermission::Mount,
        ZfsPermission::Promote,
        ZfsPermission::Receive,
        ZfsPermission::Rename,
        ZfsPermission::Rollback,
        ZfsPermission::Snapshot,
        ZfsPermission::Share,
        ZfsPermission::Send,
        ZfsPermission::Aclinherit,
        ZfsPermission::Aclmode,
        ZfsPermission::Atime,
        ZfsPermission::Canmount,
        ZfsPermission::Checksum,
        ZfsPermission::Compression,
        ZfsPermission::Copies,
        ZfsPermission::Devices,
        ZfsPermission::Exec,
        ZfsPermission::Mountpoint,
        ZfsPermission::Primarycache,
        ZfsPermission::Quota,
        ZfsPermission::Readonly,
        ZfsPermission::Recordsize,
        ZfsPermission::Reservation,
        ZfsPermission::Secondarycache,
        ZfsPermission::Setuid,
        ZfsPermission::Shareiscsi,
        ZfsPermission::Sharenfs,
        ZfsPermission::Snapdir,
        ZfsPermission::Version,
        ZfsPermission::Volsize,
        ZfsPermission::Xattr,
        ZfsPermission::Zoned,
        ZfsPermission::Userprop,
    ];

    /// Name as written in an fsacl list.
    pub fn name(self) -> &'static str {
        match self {
            ZfsPermission::Allow => "allow",
            ZfsPermission::Clone => "clone",
            ZfsPermission::Create => "create",
            ZfsPermission::Destroy => "destroy",
            ZfsPermission::Mount => "mount",
            ZfsPermission::Promote => "promote",
            ZfsPermission::Receive => "receive",
            ZfsPermission::Rename => "rename",
            ZfsPermission::Rollback => "rollback",
            ZfsPermission::Snapshot => "snapshot",
            ZfsPermission::Share => "share",
            ZfsPermission::Send => "send",
            ZfsPermission::Aclinherit => "aclinherit",
            ZfsPermission::Aclmode => "aclmode",
            ZfsPermission::Atime => "atime",
            ZfsPermission::Canmount => "canmount",
            ZfsPermission::Checksum => "checksum",
            ZfsPermission::Compression => "compression",
            ZfsPermission::Copies => "copies",
            ZfsPermission::Devices => "devices",
            ZfsPermission::Exec => "exec",
            ZfsPermission::Mountpoint => "mountpoint",
            ZfsPermission::Primarycache => "primarycache",
            ZfsPermission::Quota => "quota",
            ZfsPermission::Readonly => "readonly",
            ZfsPermission::Recordsize => "recordsize",
            ZfsPermission::Reservation => "reservation",
            ZfsPermission::Secondarycache => "secondarycache",
            ZfsPermission::Setuid => "setuid",
            ZfsPermission::Shareiscsi => "shareiscsi",
            ZfsPermission::Sharenfs => "sharenfs",
            ZfsPermission::Snapdir => "snapdir",
            ZfsPermission::Version => "version",
            ZfsPermission::Volsize => "volsize",
            ZfsPermission::Xattr => "xattr",
            ZfsPermission::Zoned => "zoned",
            ZfsPermission::Userprop => "userprop",
        }
    }
}

impl FromStr for ZfsPermission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ZfsPermission::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

impl fmt::Display for ZfsPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Principal of a permission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Principal {
    Everyone,
    User(u32),
    Group(u32),
}

impl Principal {
    fn code(self) -> char {
        match self {
            Principal::Everyone => 'e',
            Principal::User(_) => 'u',
            Principal::Group(_) => 'g',
        }
    }

    fn id(self) -> String {
        match self {
            Principal::Everyone => String::new(),
            Principal::User(id) | Principal::Group(id) => id.to_string(),
        }
    }
}

const ON_THIS: u8 = 1;
const ON_DESCENDANTS: u8 = 2;
const ON_NEW: u8 = 4;

/// One `(principal, scope, permissions)` entry of an [`AclBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionBuilder {
    who: Principal,
    scope: u8,
    permissions: BTreeSet<ZfsPermission>,
}

impl PermissionBuilder {
    fn new(who: Principal) -> Self {
        PermissionBuilder {
            who,
            scope: 0,
            permissions: BTreeSet::new(),
        }
    }

    pub fn on_this_dataset(&mut self) -> &mut Self {
        self.scope |= ON_THIS;
        self
    }

    pub fn on_descendants(&mut self) -> &mut Self {
        self.scope |= ON_DESCENDANTS;
        self
    }

    /// Applies to datasets created under this one later on.
    pub fn on_new_datasets(&mut self) -> &mut Self {
        self.scope |= ON_NEW;
        self
    }

    pub fn with(&mut self, permission: ZfsPermission) -> &mut Self {
        self.permissions.insert(permission);
        self
    }

    pub fn with_all<I: IntoIterator<Item = ZfsPermission>>(&mut self, permissions: I) -> &mut Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn with_everything(&mut self) -> &mut Self {
        self.with_all(ZfsPermission::ALL)
    }

    pub fn principal(&self) -> Principal {
        self.who
    }

    pub fn permissions(&self) -> impl Iterator<Item = ZfsPermission> + '_ {
        self.permissions.iter().copied()
    }

    /// fsacl keys this entry expands to under `abi`.
    fn keys(&self, abi: &AbiMode) -> Vec<String> {
        let mut keys = Vec::new();
        for bit in [ON_THIS, ON_DESCENDANTS, ON_NEW] {
            if self.scope & bit == 0 {
                continue;
            }
            let key = if abi.is_openzfs() {
                match bit {
                    ON_THIS => format!("{}l${}", self.who.code(), self.who.id()),
                    ON_DESCENDANTS => format!("{}d${}", self.who.code(), self.who.id()),
                    _ => "c-$".to_string(),
                }
            } else {
                // legacy lists key the scope by its raw bit value
                format!("{}{}${}", self.who.code(), char::from(bit), self.who.id())
            };
            keys.push(key);
        }
        keys
    }
}

/// Uncommitted set of delegated permissions.
///
/// Entries are held in memory and only turned into a native list by
/// [`AclBuilder::to_nvlist`], when `Dataset::allow` or `Dataset::unallow`
/// commits them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclBuilder {
    entries: Vec<PermissionBuilder>,
}

impl AclBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn everyone(&mut self) -> &mut PermissionBuilder {
        self.add(Principal::Everyone)
    }

    pub fn user(&mut self, uid: u32) -> &mut PermissionBuilder {
        self.add(Principal::User(uid))
    }

    pub fn group(&mut self, gid: u32) -> &mut PermissionBuilder {
        self.add(Principal::Group(gid))
    }

    fn add(&mut self, who: Principal) -> &mut PermissionBuilder {
        let index = self.entries.len();
        self.entries.push(PermissionBuilder::new(who));
        &mut self.entries[index]
    }

    pub fn entries(&self) -> &[PermissionBuilder] {
        &self.entries
    }

    /// True when no entry carries both a scope and a permission.
    pub fn is_empty(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| e.scope != 0 && !e.permissions.is_empty())
    }

    /// The fsacl list for `abi`: one nested list of permission names per
    /// key. Legacy libzfs expects boolean-true values, OpenZFS value-less
    /// flags. Entries sharing a key are merged.
    pub fn to_nvlist(&self, native: Arc<dyn NativeZfs>, abi: &AbiMode) -> Result<NvList> {
        let mut merged: BTreeMap<String, BTreeSet<ZfsPermission>> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| !e.permissions.is_empty()) {
            for key in entry.keys(abi) {
                merged
                    .entry(key)
                    .or_default()
                    .extend(entry.permissions.iter().copied());
            }
        }

        let mut acl = NvList::alloc_map(native.clone())?;
        for (key, permissions) in merged {
            let mut perms = NvList::alloc_map(native.clone())?;
            for p in permissions {
                if abi.is_openzfs() {
                    perms.put_flag(p.name())?;
                } else {
                    perms.put(p.name(), true)?;
                }
            }
            acl.put(&key, &perms)?;
        }
        Ok(acl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::memory::MemoryZfs;

    fn native() -> (Arc<MemoryZfs>, Arc<dyn NativeZfs>) {
        let mem = Arc::new(MemoryZfs::new());
        let native: Arc<dyn NativeZfs> = mem.clone();
        (mem, native)
    }

    #[test]
    fn test_permission_names() {
        assert_eq!(ZfsPermission::Userprop.name(), "userprop");
        assert_eq!("snapshot".parse::<ZfsPermission>(), Ok(ZfsPermission::Snapshot));
        assert!("SNAPSHOT".parse::<ZfsPermission>().is_err());
        assert_eq!(ZfsPermission::ALL.len(), 37);
    }

    #[test]
    fn test_openzfs_keys() {
        let (_, native) = native();
        let mut acl = AclBuilder::new();
        acl.user(1000)
            .on_this_dataset()
            .on_descendants()
            .with(ZfsPermission::Snapshot);
        acl.everyone().on_new_datasets().with(ZfsPermission::Mount);

        let list = acl.to_nvlist(native, &AbiMode::OpenZfs).unwrap();
        let mut keys = list.keys();
        keys.sort();
        assert_eq!(keys, vec!["c-$", "ud$1000", "ul$1000"]);

        let local = list.get_nested("ul$1000").unwrap().unwrap();
        assert!(local.contains("snapshot").unwrap());
        // flags carry no boolean value
        assert!(local.get_bool("snapshot").is_err());
    }

    #[test]
    fn test_legacy_keys_use_scope_bits() {
        let (_, native) = native();
        let mut acl = AclBuilder::new();
        acl.group(20).on_descendants().with(ZfsPermission::Create);

        let list = acl.to_nvlist(native, &AbiMode::Legacy).unwrap();
        assert_eq!(list.keys(), vec!["g\u{2}$20".to_string()]);
        let perms = list.get_nested("g\u{2}$20").unwrap().unwrap();
        assert_eq!(perms.get_bool("create").unwrap(), Some(true));
    }

    #[test]
    fn test_shared_keys_are_merged() {
        let (_, native) = native();
        let mut acl = AclBuilder::new();
        acl.user(7).on_this_dataset().with(ZfsPermission::Mount);
        acl.user(7).on_this_dataset().with(ZfsPermission::Share);

        let list = acl.to_nvlist(native, &AbiMode::OpenZfs).unwrap();
        let perms = list.get_nested("ul$7").unwrap().unwrap();
        let mut names = perms.keys();
        names.sort();
        assert_eq!(names, vec!["mount", "share"]);
    }

    #[test]
    fn test_entries_without_scope_or_permissions() {
        let mut acl = AclBuilder::new();
        assert!(acl.is_empty());
        acl.everyone().with_everything();
        assert!(acl.is_empty());
        acl.everyone().on_this_dataset();
        assert!(acl.is_empty());
        acl.user(1).on_this_dataset().with(ZfsPermission::Send);
        assert!(!acl.is_empty());
    }

    #[test]
    fn test_nested_lists_are_released() {
        let (mem, native) = native();
        let mut acl = AclBuilder::new();
        acl.everyone().on_this_dataset().with_everything();
        let list = acl.to_nvlist(native, &AbiMode::Legacy).unwrap();
        drop(list);
        assert_eq!(mem.live_nvlists(), 0);
        assert_eq!(mem.double_frees(), 0);
    }
}
