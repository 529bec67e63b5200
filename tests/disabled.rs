//! # Integration Tests: Disabled Wrapper
//!
//! ## What is tested
//! - `LIBZFS4J_ABI=off` (as override or environment) makes no native call
//! - Queries return empty results, mutating operations fail

use std::collections::BTreeMap;
use std::sync::Arc;
use zfs_native::zfs::{AbiFeature, Config, DatasetKind, LibZfs, MemoryZfs};

fn disabled(config: Config) -> (Arc<MemoryZfs>, LibZfs) {
    let mem = Arc::new(MemoryZfs::builder().pool("tank").build());
    let lib = LibZfs::with_backend(mem.clone(), config).unwrap();
    (mem, lib)
}

#[test]
fn test_no_native_calls() {
    let (mem, lib) = disabled(Config::disabled());
    assert!(!lib.is_enabled());
    assert!(!lib.is_operation_enabled(AbiFeature::ZfsIter));

    assert!(lib.roots().unwrap().is_empty());
    assert!(lib.pools().unwrap().is_empty());
    assert!(lib.pool("tank").unwrap().is_none());
    assert!(lib.open("tank").unwrap().is_none());
    assert!(!lib.exists("tank").unwrap());
    assert!(lib
        .create("tank/a", DatasetKind::FileSystem, &BTreeMap::new())
        .unwrap()
        .is_none());

    assert!(mem.calls().is_empty());
    assert_eq!(mem.live_libs(), 0);
}

#[test]
fn test_disabled_through_environment() {
    for value in ["off", "no", "disabled", "false", "NO-OP"] {
        let (mem, lib) = disabled(Config::default().with_env_var("LIBZFS4J_ABI", value));
        assert!(!lib.is_enabled(), "{}", value);
        assert!(lib.roots().unwrap().is_empty());
        assert!(mem.calls().is_empty(), "{}", value);
    }
}

#[test]
fn test_dispose_without_library() {
    let (mem, lib) = disabled(Config::disabled());
    assert!(!lib.dispose());
    drop(lib);
    assert_eq!(mem.call_count("libzfs_fini"), 0);
}

#[test]
fn test_override_beats_environment() {
    let config = Config::default()
        .with_env_var("LIBZFS4J_ABI", "legacy")
        .with_override("LIBZFS4J_ABI", "off");
    let (mem, lib) = disabled(config);
    assert!(!lib.is_enabled());
    assert!(mem.calls().is_empty());
}
