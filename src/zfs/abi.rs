// zfs/abi.rs
// Runtime selection between libzfs calling conventions
//
// Several libzfs entry points changed signature between the Solaris-era
// library and OpenZFS (and again within OpenZFS 2.x). The mode for each
// entry point family is resolved once per library session from explicit
// overrides, the process environment and symbol probing.

use super::backend::NativeZfs;
use super::config::Config;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Global override key. Per-feature keys are `LIBZFS4J_ABI_<feature>`.
pub const ABI_ENV_KEY: &str = "LIBZFS4J_ABI";

/// Symbols only present in OpenZFS builds of libzfs, probed in order.
pub const PROBE_SYMBOLS: [&str; 4] = [
    "libzfs_envvar_is_set",
    "zfs_version_userland",
    "zfs_iter_filesystems_v2",
    "zpool_get_vdev_prop",
];

const ITER_V2_SYMBOL: &str = "zfs_iter_filesystems_v2";
const COMMIT_SHARES_SYMBOL: &str = "zfs_commit_shares";
const SHARE_ISCSI_SYMBOL: &str = "zfs_share_iscsi";
const OPENZFS_2_2: &str = "openzfs-2.2";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiMode {
    Legacy,
    OpenZfs,
    /// A specific OpenZFS release line, e.g. `openzfs-2.2`
    Tagged(String),
    /// Calls short-circuit without reaching the library
    Disabled,
}

impl AbiMode {
    /// Parse an override value. Returns `None` for anything unrecognised.
    pub fn parse(value: &str) -> Option<AbiMode> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "legacy" => Some(AbiMode::Legacy),
            "openzfs" => Some(AbiMode::OpenZfs),
            "off" | "no" | "disabled" | "false" | "no-op" => Some(AbiMode::Disabled),
            tag => {
                let version = tag.strip_prefix("openzfs-")?;
                parse_version(version)?;
                Some(AbiMode::Tagged(tag.to_string()))
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, AbiMode::Disabled)
    }

    pub fn is_openzfs(&self) -> bool {
        matches!(self, AbiMode::OpenZfs | AbiMode::Tagged(_))
    }

    /// `(major, minor)` of a tagged mode.
    pub fn version(&self) -> Option<(u32, u32)> {
        match self {
            AbiMode::Tagged(tag) => tag.strip_prefix("openzfs-").and_then(parse_version),
            _ => None,
        }
    }

    /// True for a tagged mode at or above `major.minor`. Plain `openzfs`
    /// means the 2.0/2.1 conventions.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        self.version().is_some_and(|v| v >= (major, minor))
    }

    pub fn as_str(&self) -> &str {
        match self {
            AbiMode::Legacy => "legacy",
            AbiMode::OpenZfs => "openzfs",
            AbiMode::Tagged(tag) => tag,
            AbiMode::Disabled => "NO-OP",
        }
    }
}

impl fmt::Display for AbiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract `(major, minor)` from strings like "2.2" or "2.1.5-1ubuntu6".
fn parse_version(full: &str) -> Option<(u32, u32)> {
    let semantic = full
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .next()
        .unwrap_or(full);

    let mut parts = semantic.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

macro_rules! abi_features {
    ($($variant:ident => $key:literal,)*) => {
        /// Entry point families whose signature differs across libzfs
        /// generations.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum AbiFeature {
            $($variant,)*
        }

        impl AbiFeature {
            pub const ALL: &'static [AbiFeature] = &[$(AbiFeature::$variant,)*];

            pub fn key(self) -> &'static str {
                match self {
                    $(AbiFeature::$variant => $key,)*
                }
            }
        }

        impl FromStr for AbiFeature {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($key => Ok(AbiFeature::$variant),)*
                    _ => Err(format!("unknown ABI feature '{}'", s)),
                }
            }
        }
    };
}

abi_features! {
    ZfsIter => "zfs_iter",
    ZfsDestroy => "zfs_destroy",
    ZfsSnapshot => "zfs_snapshot",
    ZfsRename => "zfs_rename",
    ZfsPropInherit => "zfs_prop_inherit",
    ZfsShare => "zfs_share",
    ZfsShareIscsi => "zfs_share_iscsi",
    ZfsPerm => "zfs_perm",
    ZpoolGetProp => "zpool_get_prop",
    ZpoolGetStatus => "zpool_get_status",
    ZpoolState => "zpool_state",
    ZpoolExport => "zpool_export",
}

impl AbiFeature {
    /// `LIBZFS4J_ABI_<key>`
    pub fn env_key(self) -> String {
        format!("{}_{}", ABI_ENV_KEY, self.key())
    }
}

impl fmt::Display for AbiFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Where a resolved mode came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiSource {
    Override,
    Environment,
    Detected,
    Default,
}

/// Resolved mode per feature, fixed for the lifetime of a library session.
#[derive(Debug, Clone)]
pub struct AbiFeatureSet {
    enabled: bool,
    openzfs_detected: bool,
    modes: BTreeMap<AbiFeature, (AbiMode, AbiSource)>,
}

impl AbiFeatureSet {
    /// Resolve every feature. Probing never fails: a probe that panics is
    /// logged and counted as a missing symbol.
    pub fn detect(native: &dyn NativeZfs, config: &Config) -> AbiFeatureSet {
        if let Some(AbiMode::Disabled) = global_setting(config) {
            info!("libzfs wrapper disabled by {}", ABI_ENV_KEY);
            return AbiFeatureSet::disabled();
        }

        let present: BTreeSet<&str> = PROBE_SYMBOLS
            .iter()
            .chain([COMMIT_SHARES_SYMBOL, SHARE_ISCSI_SYMBOL].iter())
            .copied()
            .filter(|sym| probe(native, sym))
            .collect();
        let openzfs = PROBE_SYMBOLS.iter().any(|sym| present.contains(sym));

        let mut modes = BTreeMap::new();
        for &feature in AbiFeature::ALL {
            let resolved = resolve(feature, config)
                .or_else(|| detected_mode(feature, openzfs, &present).map(|m| (m, AbiSource::Detected)))
                .unwrap_or((AbiMode::Legacy, AbiSource::Default));
            debug!(feature = feature.key(), mode = %resolved.0, source = ?resolved.1, "ABI feature resolved");
            modes.insert(feature, resolved);
        }

        info!(
            openzfs,
            probed = ?present,
            "libzfs ABI detected as {}",
            if openzfs { "openzfs" } else { "legacy" }
        );

        AbiFeatureSet {
            enabled: true,
            openzfs_detected: openzfs,
            modes,
        }
    }

    /// Every feature `NO-OP`; nothing is probed.
    pub fn disabled() -> AbiFeatureSet {
        AbiFeatureSet {
            enabled: false,
            openzfs_detected: false,
            modes: AbiFeature::ALL
                .iter()
                .map(|&f| (f, (AbiMode::Disabled, AbiSource::Override)))
                .collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_operation_enabled(&self, feature: AbiFeature) -> bool {
        self.enabled && !self.mode(feature).is_disabled()
    }

    pub fn openzfs_detected(&self) -> bool {
        self.openzfs_detected
    }

    pub fn mode(&self, feature: AbiFeature) -> &AbiMode {
        self.modes
            .get(&feature)
            .map(|(mode, _)| mode)
            .unwrap_or(&AbiMode::Legacy)
    }

    pub fn source(&self, feature: AbiFeature) -> AbiSource {
        self.modes
            .get(&feature)
            .map(|(_, source)| *source)
            .unwrap_or(AbiSource::Default)
    }

    /// `feature key -> mode string`, e.g. for diagnostics.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.modes
            .iter()
            .map(|(f, (mode, _))| (f.key().to_string(), mode.to_string()))
            .collect()
    }
}

fn probe(native: &dyn NativeZfs, symbol: &str) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| native.has_symbol(symbol))) {
        Ok(found) => found,
        Err(_) => {
            warn!(symbol, "symbol probe panicked, treating as absent");
            false
        }
    }
}

fn parsed(key: &str, value: Option<&str>, origin: &str) -> Option<AbiMode> {
    let value = value?;
    match AbiMode::parse(value) {
        Some(mode) => Some(mode),
        None => {
            warn!(key, value, origin, "ignoring unrecognised ABI value");
            None
        }
    }
}

fn global_setting(config: &Config) -> Option<AbiMode> {
    parsed(ABI_ENV_KEY, config.override_value(ABI_ENV_KEY), "override")
        .or_else(|| parsed(ABI_ENV_KEY, config.env_value(ABI_ENV_KEY), "environment"))
}

fn resolve(feature: AbiFeature, config: &Config) -> Option<(AbiMode, AbiSource)> {
    let key = feature.env_key();
    parsed(&key, config.override_value(&key), "override")
        .or_else(|| parsed(ABI_ENV_KEY, config.override_value(ABI_ENV_KEY), "override"))
        .map(|m| (m, AbiSource::Override))
        .or_else(|| {
            parsed(&key, config.env_value(&key), "environment")
                .or_else(|| parsed(ABI_ENV_KEY, config.env_value(ABI_ENV_KEY), "environment"))
                .map(|m| (m, AbiSource::Environment))
        })
}

fn detected_mode(feature: AbiFeature, openzfs: bool, present: &BTreeSet<&str>) -> Option<AbiMode> {
    match feature {
        AbiFeature::ZfsShareIscsi if !present.contains(SHARE_ISCSI_SYMBOL) => Some(AbiMode::Disabled),
        AbiFeature::ZfsShareIscsi => Some(AbiMode::Legacy),
        AbiFeature::ZfsIter if present.contains(ITER_V2_SYMBOL) => {
            Some(AbiMode::Tagged(OPENZFS_2_2.to_string()))
        }
        AbiFeature::ZfsShare if present.contains(COMMIT_SHARES_SYMBOL) => {
            Some(AbiMode::Tagged(OPENZFS_2_2.to_string()))
        }
        _ if openzfs => Some(AbiMode::OpenZfs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::memory::MemoryZfs;

    #[test]
    fn test_parse_modes() {
        assert_eq!(AbiMode::parse("legacy"), Some(AbiMode::Legacy));
        assert_eq!(AbiMode::parse(" OpenZFS "), Some(AbiMode::OpenZfs));
        assert_eq!(
            AbiMode::parse("openzfs-2.2"),
            Some(AbiMode::Tagged("openzfs-2.2".to_string()))
        );
        for off in ["off", "no", "disabled", "FALSE", "NO-OP"] {
            assert_eq!(AbiMode::parse(off), Some(AbiMode::Disabled), "{}", off);
        }
        assert_eq!(AbiMode::parse("openzfs-x"), None);
        assert_eq!(AbiMode::parse("solaris"), None);
    }

    #[test]
    fn test_parse_version_string() {
        assert_eq!(parse_version("2.2"), Some((2, 2)));
        assert_eq!(parse_version("2.1.5-1ubuntu6~22.04.1"), Some((2, 1)));
        assert_eq!(parse_version("2"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_tagged_version_comparison() {
        let tag = AbiMode::Tagged("openzfs-2.2".to_string());
        assert!(tag.at_least(2, 2));
        assert!(tag.at_least(2, 1));
        assert!(!tag.at_least(2, 3));
        assert!(!AbiMode::OpenZfs.at_least(2, 2));
        assert!(tag.is_openzfs());
        assert_eq!(AbiMode::Disabled.to_string(), "NO-OP");
    }

    #[test]
    fn test_no_symbols_means_legacy() {
        let native = MemoryZfs::builder().symbols(&[]).build();
        let set = AbiFeatureSet::detect(&native, &Config::default());
        assert!(set.is_enabled());
        assert!(!set.openzfs_detected());
        assert_eq!(set.mode(AbiFeature::ZfsDestroy), &AbiMode::Legacy);
        assert_eq!(set.source(AbiFeature::ZfsDestroy), AbiSource::Default);
        assert_eq!(set.mode(AbiFeature::ZfsShareIscsi), &AbiMode::Disabled);
    }

    #[test]
    fn test_any_probe_symbol_means_openzfs() {
        let native = MemoryZfs::builder().symbols(&["zpool_get_vdev_prop"]).build();
        let set = AbiFeatureSet::detect(&native, &Config::default());
        assert!(set.openzfs_detected());
        assert_eq!(set.mode(AbiFeature::ZfsRename), &AbiMode::OpenZfs);
        assert_eq!(set.mode(AbiFeature::ZfsIter), &AbiMode::OpenZfs);
    }

    #[test]
    fn test_version_tags_from_symbols() {
        let native = MemoryZfs::builder()
            .symbols(&["zfs_iter_filesystems_v2", "zfs_commit_shares"])
            .build();
        let set = AbiFeatureSet::detect(&native, &Config::default());
        assert_eq!(set.mode(AbiFeature::ZfsIter).as_str(), "openzfs-2.2");
        assert_eq!(set.mode(AbiFeature::ZfsShare).as_str(), "openzfs-2.2");
        assert_eq!(set.mode(AbiFeature::ZfsPerm), &AbiMode::OpenZfs);
    }

    #[test]
    fn test_override_beats_environment_beats_detection() {
        let native = MemoryZfs::builder().symbols(&["zfs_version_userland"]).build();
        let config = Config::default()
            .with_env_var("LIBZFS4J_ABI", "legacy")
            .with_env_var("LIBZFS4J_ABI_ZFS_DESTROY", "openzfs")
            .with_override("LIBZFS4J_ABI_zfs_rename", "openzfs");
        let set = AbiFeatureSet::detect(&native, &config);

        assert_eq!(set.mode(AbiFeature::ZfsRename), &AbiMode::OpenZfs);
        assert_eq!(set.source(AbiFeature::ZfsRename), AbiSource::Override);
        assert_eq!(set.mode(AbiFeature::ZfsDestroy), &AbiMode::OpenZfs);
        assert_eq!(set.source(AbiFeature::ZfsDestroy), AbiSource::Environment);
        assert_eq!(set.mode(AbiFeature::ZpoolExport), &AbiMode::Legacy);
        assert_eq!(set.source(AbiFeature::ZpoolExport), AbiSource::Environment);
    }

    #[test]
    fn test_unparseable_value_is_skipped() {
        let native = MemoryZfs::builder().symbols(&["zfs_version_userland"]).build();
        let config = Config::default().with_override("LIBZFS4J_ABI_zfs_destroy", "bogus");
        let set = AbiFeatureSet::detect(&native, &config);
        assert_eq!(set.mode(AbiFeature::ZfsDestroy), &AbiMode::OpenZfs);
        assert_eq!(set.source(AbiFeature::ZfsDestroy), AbiSource::Detected);
    }

    #[test]
    fn test_per_key_disable_only_affects_that_feature() {
        let native = MemoryZfs::new();
        let config = Config::default().with_override("LIBZFS4J_ABI_zfs_share", "off");
        let set = AbiFeatureSet::detect(&native, &config);
        assert!(set.is_enabled());
        assert!(!set.is_operation_enabled(AbiFeature::ZfsShare));
        assert!(set.is_operation_enabled(AbiFeature::ZfsDestroy));
    }

    #[test]
    fn test_global_disable_skips_probing() {
        let native = MemoryZfs::new();
        let config = Config::default().with_env_var("LIBZFS4J_ABI", "disabled");
        let set = AbiFeatureSet::detect(&native, &config);
        assert!(!set.is_enabled());
        assert!(AbiFeature::ALL
            .iter()
            .all(|f| !set.is_operation_enabled(*f)));
        assert!(native.calls().is_empty());
    }

    #[test]
    fn test_panicking_probe_counts_as_absent() {
        let native = MemoryZfs::builder()
            .symbols(&["zfs_version_userland"])
            .panicking_probe("zfs_version_userland")
            .build();
        let set = AbiFeatureSet::detect(&native, &Config::default());
        assert!(!set.openzfs_detected());
        assert_eq!(set.mode(AbiFeature::ZfsSnapshot), &AbiMode::Legacy);
    }
}
