// zfs/tests.rs
// Unit tests for the dataset, pool and library layers over the in-memory backend

#![cfg(test)]

use super::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

fn setup_with(mem: MemoryZfs) -> (Arc<MemoryZfs>, LibZfs) {
    let mem = Arc::new(mem);
    let lib = LibZfs::with_backend(mem.clone(), Config::default()).unwrap();
    (mem, lib)
}

fn setup() -> (Arc<MemoryZfs>, LibZfs) {
    setup_with(MemoryZfs::builder().pool("tank").build())
}

fn names(datasets: &[Dataset]) -> Vec<&str> {
    datasets.iter().map(Dataset::name).collect()
}

fn no_props() -> BTreeMap<String, String> {
    BTreeMap::new()
}

// -------------------------------------------------------------------------
// Library Lifecycle Tests
// -------------------------------------------------------------------------

/// Test: opening a library initialises libzfs once and silences its printing
#[test]
fn test_library_init() {
    let (mem, lib) = setup();
    assert!(lib.is_enabled());
    assert_eq!(mem.live_libs(), 1);
    assert_eq!(mem.call_count("libzfs_init"), 1);
    assert!(mem.calls().contains(&"libzfs_print_on_error false".to_string()));
}

/// Test: failed libzfs_init surfaces as LibraryUnavailable
#[test]
fn test_library_init_failure() {
    let mem = Arc::new(MemoryZfs::new());
    mem.fail("libzfs_init", ErrorCode::NoMem);
    let err = LibZfs::with_backend(mem.clone(), Config::default()).unwrap_err();
    assert!(matches!(err, ZfsError::LibraryUnavailable(_)));
    assert_eq!(mem.live_libs(), 0);
}

/// Test: dispose closes every open handle and then releases the library
#[test]
fn test_dispose_closes_handles() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    let pool = lib.pool("tank").unwrap().unwrap();
    assert_eq!(lib.live_handles(), 2);

    assert!(lib.dispose());
    assert_eq!(mem.open_zfs_handles(), 0);
    assert_eq!(mem.open_zpool_handles(), 0);
    assert_eq!(mem.live_libs(), 0);
    assert!(!lib.dispose());

    assert!(matches!(
        ds.property(ZfsProp::Name),
        Err(ZfsError::LibraryUnavailable(_))
    ));
    drop(ds);
    drop(pool);
    assert_eq!(mem.stray_closes(), 0);
    assert_eq!(mem.call_count("libzfs_fini"), 1);
}

/// Test: dropping the library disposes it
#[test]
fn test_drop_disposes() {
    let (mem, lib) = setup();
    let _root = lib.open("tank").unwrap().unwrap();
    drop(lib);
    assert_eq!(mem.live_libs(), 0);
    assert_eq!(mem.open_zfs_handles(), 0);
}

// -------------------------------------------------------------------------
// Open / Exists / Create Tests
// -------------------------------------------------------------------------

/// Test: open returns None for a missing dataset and the kind for a present one
#[test]
fn test_open_and_exists() {
    let (mem, lib) = setup();
    mem.add_volume("tank/vol");

    assert!(lib.open("tank/missing").unwrap().is_none());
    assert!(!lib.exists("tank/missing").unwrap());
    assert!(lib.exists("tank/vol").unwrap());
    assert!(!lib.exists_as("tank/vol", TypeMask::FILESYSTEM).unwrap());

    let vol = lib.open("tank/vol").unwrap().unwrap();
    assert_eq!(vol.kind(), DatasetKind::Volume);
    assert_eq!(vol.name(), "tank/vol");
    assert_eq!(vol.to_string(), "tank/vol");
}

/// Test: opening with a mask that excludes the kind is an error, not None
#[test]
fn test_open_with_wrong_mask() {
    let (mem, lib) = setup();
    mem.add_volume("tank/vol");
    let err = lib.open_as("tank/vol", TypeMask::SNAPSHOT).unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::BadType));
}

/// Test: permission failures carry the native code and description
#[test]
fn test_open_denied() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/secret");
    mem.deny("tank/secret");

    let err = lib.open("tank/secret").unwrap_err();
    assert_eq!(err.code(), Some(2032));
    match err {
        ZfsError::Native {
            op, description, ..
        } => {
            assert_eq!(op, "zfs_open");
            assert!(description.contains("tank/secret"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

/// Test: create makes missing ancestors root to leaf without properties
#[test]
fn test_create_with_ancestors() {
    let (mem, lib) = setup();
    let mut props = BTreeMap::new();
    props.insert("compression".to_string(), "lz4".to_string());

    let ds = lib
        .create("tank/a/b/c", DatasetKind::FileSystem, &props)
        .unwrap()
        .unwrap();
    assert_eq!(ds.name(), "tank/a/b/c");

    let created: Vec<String> = mem
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("zfs_create"))
        .collect();
    assert_eq!(
        created,
        vec!["zfs_create tank/a", "zfs_create tank/a/b", "zfs_create tank/a/b/c"]
    );
    assert_eq!(mem.prop("tank/a/b/c", "compression").as_deref(), Some("lz4"));
    assert_eq!(mem.prop("tank/a", "compression").as_deref(), Some("off"));
    assert_eq!(mem.live_nvlists(), 0);
}

/// Test: a failing ancestor stops creation and leaves earlier ones in place
#[test]
fn test_create_ancestor_failure() {
    let (mem, lib) = setup();
    mem.deny("tank/a/b");
    let err = lib
        .create("tank/a/b/c", DatasetKind::FileSystem, &no_props())
        .unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::Perm));
    assert!(mem.contains("tank/a"));
    assert!(!mem.contains("tank/a/b/c"));
}

/// Test: snapshots cannot be created through create
#[test]
fn test_create_rejects_snapshot_kind() {
    let (_, lib) = setup();
    let err = lib
        .create("tank@now", DatasetKind::Snapshot, &no_props())
        .unwrap_err();
    assert!(matches!(err, ZfsError::Unsupported { .. }));
}

// -------------------------------------------------------------------------
// Enumeration Tests
// -------------------------------------------------------------------------

/// Test: roots and pools list every imported pool
#[test]
fn test_roots_and_pools() {
    let (_, lib) = setup_with(MemoryZfs::builder().pool("tank").pool("backup").build());
    let roots = lib.roots().unwrap();
    assert_eq!(names(&roots), vec!["backup", "tank"]);

    let pools = lib.pools().unwrap();
    let pool_names: Vec<&str> = pools.iter().map(ZfsPool::name).collect();
    assert_eq!(pool_names, vec!["backup", "tank"]);
    assert_eq!(lib.live_handles(), 4);
}

/// Test: children lists filesystems and volumes, then snapshots
#[test]
fn test_children() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/x");
    mem.add_volume("tank/vol");
    mem.add_filesystem("tank/x/deep");
    mem.add_snapshot("tank@s1");

    let root = lib.open("tank").unwrap().unwrap();
    assert_eq!(names(&root.children().unwrap()), vec!["tank/vol", "tank/x", "tank@s1"]);
    assert_eq!(
        names(&root.children_of(DatasetKind::Volume).unwrap()),
        vec!["tank/vol"]
    );
    assert_eq!(names(&root.filesystems().unwrap()), vec!["tank/vol", "tank/x"]);
    // handles filtered out by children_of are released
    assert_eq!(lib.live_handles(), 1);
}

/// Test: snapshots come back in creation order, not name order
#[test]
fn test_snapshots_by_createtxg() {
    let (mem, lib) = setup();
    mem.add_snapshot("tank@zeta");
    mem.add_snapshot("tank@alpha");
    let root = lib.open("tank").unwrap().unwrap();
    assert_eq!(names(&root.snapshots().unwrap()), vec!["tank@zeta", "tank@alpha"]);
}

/// Test: descendants walks depth first with snapshots before child filesystems
#[test]
fn test_descendants_order() {
    let (mem, lib) = setup();
    mem.add_snapshot("tank@mon");
    mem.add_snapshot("tank@tue");
    mem.add_filesystem("tank/x");
    mem.add_snapshot("tank/x@mon");
    mem.add_filesystem("tank/x/y");

    let root = lib.open("tank").unwrap().unwrap();
    let all = root.descendants().unwrap();
    assert_eq!(
        names(&all),
        vec!["tank@mon", "tank@tue", "tank/x", "tank/x@mon", "tank/x/y"]
    );
    let snaps = root.descendants_of(DatasetKind::Snapshot).unwrap();
    assert_eq!(names(&snaps), vec!["tank@mon", "tank@tue", "tank/x@mon"]);
}

/// Test: a snapshot has no children
#[test]
fn test_snapshot_has_no_children() {
    let (mem, lib) = setup();
    mem.add_snapshot("tank@s");
    let snap = lib.open("tank@s").unwrap().unwrap();
    assert!(matches!(snap.children(), Err(ZfsError::Unsupported { .. })));
}

// -------------------------------------------------------------------------
// Mount / Share Tests
// -------------------------------------------------------------------------

/// Test: mount uses the default mountpoint and unmount clears it
#[test]
fn test_mount_cycle() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();

    assert!(!ds.is_mounted().unwrap());
    ds.mount().unwrap();
    assert!(ds.is_mounted().unwrap());
    assert_eq!(ds.mountpoint().unwrap(), Some(PathBuf::from("/tank/a")));
    ds.unmount().unwrap();
    assert!(!ds.is_mounted().unwrap());
}

/// Test: a "none" mountpoint reads as no mountpoint
#[test]
fn test_mountpoint_none() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    ds.set_mountpoint("none").unwrap();
    assert_eq!(ds.mountpoint().unwrap(), None);
    assert_eq!(mem.prop("tank/a", "mountpoint").as_deref(), Some("none"));
}

/// Test: share follows the share properties of a mounted filesystem
#[test]
fn test_share_cycle() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.set_prop("tank/a", "sharenfs", "on");
    let ds = lib.open("tank/a").unwrap().unwrap();

    ds.mount().unwrap();
    ds.share().unwrap();
    assert!(ds.is_shared().unwrap());
    ds.unshare().unwrap();
    assert!(!ds.is_shared().unwrap());

    ds.share_smb().unwrap();
    assert!(ds.is_shared().unwrap());
    ds.unshare_smb().unwrap();
    assert!(!ds.is_shared().unwrap());
}

/// Test: sharing an unmounted filesystem over NFS fails with the share code
#[test]
fn test_share_nfs_requires_mount() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    let err = ds.share_nfs().unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::ShareNfsFailed));
}

/// Test: iSCSI sharing is disabled unless the library exports it
#[test]
fn test_iscsi_depends_on_symbol() {
    let (mem, lib) = setup();
    mem.add_volume("tank/vol");
    let vol = lib.open("tank/vol").unwrap().unwrap();
    assert!(matches!(vol.share_iscsi(), Err(ZfsError::LibraryUnavailable(_))));

    let (mem, lib) = setup_with(
        MemoryZfs::builder()
            .symbols(&["zfs_share_iscsi"])
            .pool("tank")
            .build(),
    );
    mem.add_volume("tank/vol");
    let vol = lib.open("tank/vol").unwrap().unwrap();
    vol.share_iscsi().unwrap();
    assert!(vol.is_shared().unwrap());
    vol.unshare_iscsi().unwrap();
    assert!(!vol.is_shared().unwrap());
}

/// Test: operations a kind does not support are rejected before any native call
#[test]
fn test_capabilities_are_enforced() {
    let (mem, lib) = setup();
    mem.add_snapshot("tank@s");
    mem.add_volume("tank/vol");
    let snap = lib.open("tank@s").unwrap().unwrap();
    let vol = lib.open("tank/vol").unwrap().unwrap();
    mem.clear_calls();

    assert!(matches!(snap.mount(), Err(ZfsError::Unsupported { .. })));
    assert!(matches!(vol.share(), Err(ZfsError::Unsupported { .. })));
    assert!(matches!(vol.promote(), Err(ZfsError::Unsupported { .. })));
    assert!(mem.calls().is_empty());
}

// -------------------------------------------------------------------------
// Snapshot / Clone / Rollback / Rename / Destroy Tests
// -------------------------------------------------------------------------

/// Test: snapshot opens the new snapshot, recursive covers descendants
#[test]
fn test_snapshot() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.add_filesystem("tank/a/b");
    let ds = lib.open("tank/a").unwrap().unwrap();

    let snap = ds.snapshot("daily", true).unwrap().unwrap();
    assert_eq!(snap.name(), "tank/a@daily");
    assert_eq!(snap.kind(), DatasetKind::Snapshot);
    assert!(mem.contains("tank/a/b@daily"));
    assert!(mem
        .calls()
        .contains(&"zfs_snapshot tank/a@daily recursive=true abi=legacy".to_string()));
}

/// Test: snapshot names containing separators are refused locally
#[test]
fn test_snapshot_invalid_name() {
    let (_, lib) = setup();
    let root = lib.open("tank").unwrap().unwrap();
    for bad in ["", "a@b", "a/b"] {
        assert!(matches!(
            root.snapshot(bad, false),
            Err(ZfsError::InvalidName(_))
        ));
    }
}

/// Test: a clone is mounted, records its origin and can be promoted
#[test]
fn test_clone_and_promote() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    let snap = ds.snapshot("s1", false).unwrap().unwrap();

    let clone = snap.clone_to("tank/c").unwrap().unwrap();
    assert!(clone.is_mounted().unwrap());
    assert_eq!(clone.property(ZfsProp::Origin).unwrap().as_deref(), Some("tank/a@s1"));

    clone.promote().unwrap();
    assert_eq!(clone.property(ZfsProp::Origin).unwrap(), None);
}

/// Test: with sharing switched off the clone is still mounted and returned
#[test]
fn test_clone_with_share_disabled() {
    let mem = Arc::new(MemoryZfs::builder().pool("tank").build());
    let config = Config::default().with_override("LIBZFS4J_ABI_zfs_share", "off");
    let lib = LibZfs::with_backend(mem.clone(), config).unwrap();
    mem.add_snapshot("tank@s1");
    let snap = lib.open("tank@s1").unwrap().unwrap();

    let clone = snap.clone_to("tank/c").unwrap().unwrap();
    assert_eq!(clone.name(), "tank/c");
    assert!(clone.is_mounted().unwrap());
    assert!(mem.contains("tank/c"));
    assert_eq!(mem.call_count("zfs_share"), 0);
}

/// Test: clones cannot cross pools
#[test]
fn test_clone_across_pools() {
    let (mem, lib) = setup_with(MemoryZfs::builder().pool("tank").pool("backup").build());
    mem.add_snapshot("tank@s");
    let snap = lib.open("tank@s").unwrap().unwrap();
    let err = snap.clone_to("backup/c").unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::CrossTarget));
}

/// Test: rollback drops snapshots taken after the target
#[test]
fn test_rollback() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    let s1 = ds.snapshot("s1", false).unwrap().unwrap();
    ds.snapshot("s2", false).unwrap();

    ds.rollback(&s1, false).unwrap();
    assert!(mem.contains("tank/a@s1"));
    assert!(!mem.contains("tank/a@s2"));
    assert!(matches!(ds.rollback(&ds, false), Err(ZfsError::Unsupported { .. })));
}

/// Test: rename keeps the handle and follows the new name
#[test]
fn test_rename() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.add_snapshot("tank/a@s");
    let mut ds = lib.open("tank/a").unwrap().unwrap();

    ds.rename("tank/b", false, false).unwrap();
    assert_eq!(ds.name(), "tank/b");
    assert!(mem.contains("tank/b@s"));
    assert!(!mem.contains("tank/a"));
    assert_eq!(ds.property(ZfsProp::Name).unwrap().as_deref(), Some("tank/b"));
}

/// Test: destroy removes the dataset and releases the handle
#[test]
fn test_destroy() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    ds.destroy().unwrap();
    assert!(!mem.contains("tank/a"));
    assert_eq!(lib.live_handles(), 0);
    assert_eq!(mem.stray_closes(), 0);
}

/// Test: destroying a dataset with children fails and keeps the handle open
#[test]
fn test_destroy_with_dependents() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.add_snapshot("tank/a@s");
    let ds = lib.open("tank/a").unwrap().unwrap();
    let err = ds.destroy().unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::Exists));
    assert!(mem.contains("tank/a"));
    // the failed destroy consumed the value, which closed the handle on drop
    assert_eq!(mem.open_zfs_handles(), 0);
}

// -------------------------------------------------------------------------
// Property Tests
// -------------------------------------------------------------------------

/// Test: native properties round trip and absent ones are left out
#[test]
fn test_properties() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();

    ds.set_property("compression", "lz4").unwrap();
    assert_eq!(ds.property(ZfsProp::Compression).unwrap().as_deref(), Some("lz4"));
    assert_eq!(ds.property(ZfsProp::Quota).unwrap(), None);

    let props = ds
        .properties(&[ZfsProp::Compression, ZfsProp::Quota, ZfsProp::Type])
        .unwrap();
    assert_eq!(props.len(), 2);
    assert_eq!(props[&ZfsProp::Type], "filesystem");
}

/// Test: an unreadable property is None even while an older error is still recorded
#[test]
fn test_property_read_after_failed_open() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();

    assert!(lib.open("tank/missing").unwrap().is_none());
    assert!(lib.pool("ghost").unwrap().is_none());

    assert_eq!(ds.property(ZfsProp::Origin).unwrap(), None);
    let props = ds.properties(&[ZfsProp::Origin, ZfsProp::Type]).unwrap();
    assert_eq!(props.keys().copied().collect::<Vec<_>>(), vec![ZfsProp::Type]);
    assert_eq!(ds.pool_property(ZpoolProp::Altroot).unwrap(), None);

    let pool = lib.pool("tank").unwrap().unwrap();
    assert_eq!(pool.property(ZpoolProp::Bootfs).unwrap(), None);
    assert_eq!(pool.property(ZpoolProp::Health).unwrap().as_deref(), Some("ONLINE"));
}

/// Test: read-only and unknown properties fail with their native codes
#[test]
fn test_set_property_failures() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    assert_eq!(
        ds.set_property("used", "1").unwrap_err().error_code(),
        Some(ErrorCode::PropReadonly)
    );
    assert_eq!(
        ds.set_property("nonsense", "1").unwrap_err().error_code(),
        Some(ErrorCode::BadProp)
    );
}

/// Test: user properties are inherited and released with the handle
#[test]
fn test_user_properties() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.set_prop("tank", "com.example:owner", "alice");
    mem.set_prop("tank/a", "com.example:tier", "gold");

    let mut ds = lib.open("tank/a").unwrap().unwrap();
    assert_eq!(
        ds.user_property("com.example:owner").unwrap().as_deref(),
        Some("alice")
    );
    assert_eq!(ds.user_property("com.example:missing").unwrap(), None);

    let all = ds.user_properties().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["com.example:tier"], "gold");

    // the cached list and one nested entry per property
    assert_eq!(mem.live_nvlists(), 3);
    ds.close();
    assert_eq!(mem.live_nvlists(), 0);
}

/// Test: inherit clears the local value and refreshes the handle once
#[test]
fn test_inherit_property() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.set_prop("tank", "compression", "gzip");
    mem.set_prop("tank/a", "compression", "lz4");
    let ds = lib.open("tank/a").unwrap().unwrap();

    ds.inherit_property("compression").unwrap();
    assert_eq!(ds.property(ZfsProp::Compression).unwrap().as_deref(), Some("gzip"));
    assert_eq!(mem.call_count("zfs_refresh_properties"), 1);
}

// -------------------------------------------------------------------------
// Pool Tests
// -------------------------------------------------------------------------

/// Test: pool lookup, properties and sizes
#[test]
fn test_pool_properties() {
    let (_, lib) = setup();
    assert!(lib.pool("nope").unwrap().is_none());

    let pool = lib.pool("tank").unwrap().unwrap();
    assert_eq!(pool.name(), "tank");
    assert_eq!(pool.property(ZpoolProp::Health).unwrap().as_deref(), Some("ONLINE"));
    assert_eq!(pool.size().unwrap(), Some(10 * 1024 * 1024 * 1024));
    assert_eq!(pool.used_size().unwrap(), Some(1024 * 1024 * 1024));
    assert_eq!(pool.available_size().unwrap(), Some(9 * 1024 * 1024 * 1024));
}

/// Test: status and state decode through the active ABI tables
#[test]
fn test_pool_status_and_state() {
    let (mem, lib) = setup();
    let pool = lib.pool("tank").unwrap().unwrap();
    assert_eq!(pool.status().unwrap(), PoolStatus::Ok);
    assert_eq!(pool.state().unwrap(), PoolState::Active);

    mem.set_pool_status("tank", PoolStatus::FailingDev);
    mem.set_pool_state("tank", PoolState::Exported);
    assert_eq!(pool.status().unwrap(), PoolStatus::FailingDev);
    assert_eq!(pool.state().unwrap(), PoolState::Exported);
}

/// Test: a dataset reaches its pool and pool properties
#[test]
fn test_dataset_pool() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    assert_eq!(ds.pool().unwrap().unwrap().name(), "tank");
    assert_eq!(
        ds.pool_property(ZpoolProp::Capacity).unwrap().as_deref(),
        Some("10%")
    );
    // pool_property opens and closes its own handle
    assert_eq!(mem.open_zpool_handles(), 0);
}

/// Test: export disables mounted datasets first and releases the pool handle
#[test]
fn test_pool_export() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    ds.mount().unwrap();
    drop(ds);

    let pool = lib.pool("tank").unwrap().unwrap();
    assert_eq!(pool.root().unwrap().unwrap().name(), "tank");
    pool.export(false, false).unwrap();
    assert!(!mem.contains("tank"));
    assert_eq!(mem.open_zpool_handles(), 0);
    assert!(mem
        .calls()
        .iter()
        .any(|c| c.starts_with("zpool_disable_datasets tank")));
}

// -------------------------------------------------------------------------
// Delegation Tests
// -------------------------------------------------------------------------

/// Test: allow and unallow round trip through the OpenZFS fsacl layout
#[test]
fn test_allow_unallow() {
    let (mem, lib) = setup_with(
        MemoryZfs::builder()
            .symbols(&["zfs_version_userland"])
            .pool("tank")
            .build(),
    );
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();

    let mut acl = AclBuilder::new();
    acl.user(1000)
        .on_this_dataset()
        .with_all([ZfsPermission::Snapshot, ZfsPermission::Mount]);
    ds.allow(&acl).unwrap();

    let perms = mem.permissions("tank/a");
    let granted: Vec<&str> = perms["ul$1000"].iter().map(String::as_str).collect();
    assert_eq!(granted, vec!["mount", "snapshot"]);

    ds.unallow(&acl).unwrap();
    assert!(mem.permissions("tank/a").is_empty());
    assert_eq!(mem.live_nvlists(), 0);
}

/// Test: an empty delegation is refused by the library
#[test]
fn test_allow_empty() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    let ds = lib.open("tank/a").unwrap().unwrap();
    let err = ds.allow(&AclBuilder::new()).unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::BadPerm));
}

// -------------------------------------------------------------------------
// Handle Tests
// -------------------------------------------------------------------------

/// Test: closing twice reaches zfs_close once and later calls fail
#[test]
fn test_close_is_idempotent() {
    let (mem, lib) = setup();
    let mut root = lib.open("tank").unwrap().unwrap();
    root.close();
    root.close();
    assert!(root.is_closed());
    assert_eq!(mem.call_count("zfs_close"), 1);
    assert_eq!(mem.stray_closes(), 0);
    assert!(matches!(root.property(ZfsProp::Name), Err(ZfsError::Closed)));
}

/// Test: two opens of one name are distinct handles
#[test]
fn test_handle_identity() {
    let (_, lib) = setup();
    let a = lib.open("tank").unwrap().unwrap();
    let b = lib.open("tank").unwrap().unwrap();
    assert_ne!(a, b);
    assert_eq!(a.name(), b.name());
    assert_eq!(lib.live_handles(), 2);
}

/// Test: injected native failures surface with their code
#[test]
fn test_injected_failure() {
    let (mem, lib) = setup();
    mem.add_filesystem("tank/a");
    mem.fail("zfs_mount", ErrorCode::MountFailed);
    let ds = lib.open("tank/a").unwrap().unwrap();
    let err = ds.mount().unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::MountFailed));
    assert!(err.to_string().starts_with("zfs_mount:"));

    mem.clear_failures();
    ds.mount().unwrap();
}

// -------------------------------------------------------------------------
// Native Library Tests (require ZFS)
// -------------------------------------------------------------------------

/// Test: the system library initialises and lists its pools
#[cfg(feature = "native")]
#[test]
#[ignore = "Requires ZFS to be installed"]
fn test_native_library() {
    let lib = LibZfs::new().unwrap();
    assert!(lib.is_enabled());
    for pool in lib.pools().unwrap() {
        assert!(pool.root().unwrap().is_some());
    }
    assert!(lib.dispose());
}
