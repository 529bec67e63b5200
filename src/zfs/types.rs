// zfs/types.rs
// Native constant tables: dataset types, pool status/state, property names, flags

use super::abi::AbiMode;
use super::byref::NativeEnum;
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

// ============================================================================
// Dataset types
// ============================================================================

/// `zfs_type_t` tag of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    FileSystem,
    Snapshot,
    Volume,
    Pool,
}

impl DatasetKind {
    pub fn tag(self) -> c_int {
        match self {
            DatasetKind::FileSystem => 1,
            DatasetKind::Snapshot => 2,
            DatasetKind::Volume => 4,
            DatasetKind::Pool => 8,
        }
    }

    /// Unknown tags yield `None`; callers turn that into
    /// `ZfsError::Inconsistent`.
    pub fn from_tag(tag: c_int) -> Option<Self> {
        match tag {
            1 => Some(DatasetKind::FileSystem),
            2 => Some(DatasetKind::Snapshot),
            4 => Some(DatasetKind::Volume),
            8 => Some(DatasetKind::Pool),
            _ => None,
        }
    }

    pub fn mask(self) -> TypeMask {
        TypeMask(self.tag())
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatasetKind::FileSystem => "filesystem",
            DatasetKind::Snapshot => "snapshot",
            DatasetKind::Volume => "volume",
            DatasetKind::Pool => "pool",
        })
    }
}

/// Bitwise-or of `zfs_type_t` tags, as taken by `zfs_open` and
/// `zfs_dataset_exists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeMask(c_int);

impl TypeMask {
    pub const FILESYSTEM: TypeMask = TypeMask(1);
    pub const SNAPSHOT: TypeMask = TypeMask(2);
    pub const VOLUME: TypeMask = TypeMask(4);
    pub const POOL: TypeMask = TypeMask(8);
    /// `ZFS_TYPE_DATASET`
    pub const DATASET: TypeMask = TypeMask(1 | 2 | 4);
    pub const ANY: TypeMask = TypeMask(1 | 2 | 4 | 8);

    pub fn bits(self) -> c_int {
        self.0
    }

    pub fn from_bits(bits: c_int) -> Self {
        TypeMask(bits)
    }

    pub fn contains(self, kind: DatasetKind) -> bool {
        self.0 & kind.tag() != 0
    }
}

impl BitOr for TypeMask {
    type Output = TypeMask;

    fn bitor(self, rhs: TypeMask) -> TypeMask {
        TypeMask(self.0 | rhs.0)
    }
}

impl From<DatasetKind> for TypeMask {
    fn from(kind: DatasetKind) -> Self {
        kind.mask()
    }
}

// ============================================================================
// Pool status and state
// ============================================================================

/// `zpool_status_t`. The native ordinals differ between legacy libzfs and
/// OpenZFS; see [`PoolStatus::from_ordinal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolStatus {
    CorruptCache,
    MissingDevR,
    MissingDevNr,
    CorruptLabelR,
    CorruptLabelNr,
    BadGuidSum,
    CorruptPool,
    CorruptData,
    FailingDev,
    VersionNewer,
    HostidMismatch,
    HostidActive,
    HostidRequired,
    IoFailureWait,
    IoFailureContinue,
    IoFailureMmp,
    BadLog,
    Errata,
    UnsupFeatRead,
    UnsupFeatWrite,
    FaultedDevR,
    FaultedDevNr,
    VersionOlder,
    FeatDisabled,
    Resilvering,
    OfflineDev,
    RemovedDev,
    Rebuilding,
    RebuildScrub,
    NonNativeAshift,
    CompatibilityErr,
    IncompatibleFeat,
    Ok,
    /// Ordinal outside the table for the active ABI
    Unknown,
}

use PoolStatus as S;

const LEGACY_POOL_STATUS: [PoolStatus; 19] = [
    S::CorruptCache,
    S::MissingDevR,
    S::MissingDevNr,
    S::CorruptLabelR,
    S::CorruptLabelNr,
    S::BadGuidSum,
    S::CorruptPool,
    S::CorruptData,
    S::FailingDev,
    S::VersionNewer,
    S::HostidMismatch,
    S::IoFailureWait,
    S::IoFailureContinue,
    S::FaultedDevR,
    S::FaultedDevNr,
    S::VersionOlder,
    S::Resilvering,
    S::OfflineDev,
    S::Ok,
];

const OPENZFS_POOL_STATUS: [PoolStatus; 33] = [
    S::CorruptCache,
    S::MissingDevR,
    S::MissingDevNr,
    S::CorruptLabelR,
    S::CorruptLabelNr,
    S::BadGuidSum,
    S::CorruptPool,
    S::CorruptData,
    S::FailingDev,
    S::VersionNewer,
    S::HostidMismatch,
    S::HostidActive,
    S::HostidRequired,
    S::IoFailureWait,
    S::IoFailureContinue,
    S::IoFailureMmp,
    S::BadLog,
    S::Errata,
    S::UnsupFeatRead,
    S::UnsupFeatWrite,
    S::FaultedDevR,
    S::FaultedDevNr,
    S::VersionOlder,
    S::FeatDisabled,
    S::Resilvering,
    S::OfflineDev,
    S::RemovedDev,
    S::Rebuilding,
    S::RebuildScrub,
    S::NonNativeAshift,
    S::CompatibilityErr,
    S::IncompatibleFeat,
    S::Ok,
];

impl PoolStatus {
    fn table(abi: &AbiMode) -> &'static [PoolStatus] {
        if abi.is_openzfs() {
            &OPENZFS_POOL_STATUS
        } else {
            &LEGACY_POOL_STATUS
        }
    }

    pub fn from_ordinal(raw: c_int, abi: &AbiMode) -> PoolStatus {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::table(abi).get(i).copied())
            .unwrap_or(PoolStatus::Unknown)
    }

    /// Native ordinal under `abi`, `None` if that ABI has no such status.
    pub fn to_ordinal(self, abi: &AbiMode) -> Option<c_int> {
        Self::table(abi)
            .iter()
            .position(|s| *s == self)
            .map(|i| i as c_int)
    }
}

/// `pool_state_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolState {
    Active,
    Exported,
    Destroyed,
    Spare,
    L2Cache,
    Uninitialized,
    /// Legacy only
    IoFailure,
    Unavail,
    PotentiallyActive,
    Unknown,
}

const LEGACY_POOL_STATE: [PoolState; 9] = [
    PoolState::Active,
    PoolState::Exported,
    PoolState::Destroyed,
    PoolState::Spare,
    PoolState::L2Cache,
    PoolState::Uninitialized,
    PoolState::IoFailure,
    PoolState::Unavail,
    PoolState::PotentiallyActive,
];

const OPENZFS_POOL_STATE: [PoolState; 8] = [
    PoolState::Active,
    PoolState::Exported,
    PoolState::Destroyed,
    PoolState::Spare,
    PoolState::L2Cache,
    PoolState::Uninitialized,
    PoolState::Unavail,
    PoolState::PotentiallyActive,
];

impl PoolState {
    fn table(abi: &AbiMode) -> &'static [PoolState] {
        if abi.is_openzfs() {
            &OPENZFS_POOL_STATE
        } else {
            &LEGACY_POOL_STATE
        }
    }

    pub fn from_ordinal(raw: c_int, abi: &AbiMode) -> PoolState {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::table(abi).get(i).copied())
            .unwrap_or(PoolState::Unknown)
    }

    pub fn to_ordinal(self, abi: &AbiMode) -> Option<c_int> {
        Self::table(abi)
            .iter()
            .position(|s| *s == self)
            .map(|i| i as c_int)
    }
}

// ============================================================================
// Property sources
// ============================================================================

/// `zprop_source_t`; the native values are bit flags, not ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropSource {
    None,
    Default,
    Temporary,
    Local,
    Inherited,
    Received,
}

impl NativeEnum for PropSource {
    fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            0x1 => Some(PropSource::None),
            0x2 => Some(PropSource::Default),
            0x4 => Some(PropSource::Temporary),
            0x8 => Some(PropSource::Local),
            0x10 => Some(PropSource::Inherited),
            0x20 => Some(PropSource::Received),
            _ => None,
        }
    }

    fn to_raw(self) -> c_int {
        match self {
            PropSource::None => 0x1,
            PropSource::Default => 0x2,
            PropSource::Temporary => 0x4,
            PropSource::Local => 0x8,
            PropSource::Inherited => 0x10,
            PropSource::Received => 0x20,
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

macro_rules! prop_names {
    ($(#[$meta:meta])* $ty:ident { $($variant:ident => $name:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $ty {
            $($variant,)*
        }

        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant,)*];

            /// Canonical property name as understood by libzfs.
            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)*
                    _ => Err(format!("unknown property '{}'", s)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

prop_names! {
    /// Dataset property. Native ordinals are never hard-coded; the name is
    /// resolved through `zfs_name_to_prop` on the running library.
    ZfsProp {
        Type => "type",
        Creation => "creation",
        Used => "used",
        Available => "available",
        Referenced => "referenced",
        CompressRatio => "compressratio",
        Mounted => "mounted",
        Origin => "origin",
        Quota => "quota",
        Reservation => "reservation",
        Volsize => "volsize",
        Volblocksize => "volblocksize",
        Recordsize => "recordsize",
        Mountpoint => "mountpoint",
        Sharenfs => "sharenfs",
        Checksum => "checksum",
        Compression => "compression",
        Atime => "atime",
        Devices => "devices",
        Exec => "exec",
        Setuid => "setuid",
        Readonly => "readonly",
        Zoned => "zoned",
        Snapdir => "snapdir",
        Aclinherit => "aclinherit",
        Createtxg => "createtxg",
        Name => "name",
        Canmount => "canmount",
        Shareiscsi => "shareiscsi",
        Xattr => "xattr",
        Copies => "copies",
        Version => "version",
        Utf8only => "utf8only",
        Normalize => "normalization",
        Case => "casesensitivity",
        Vscan => "vscan",
        Nbmand => "nbmand",
        Sharesmb => "sharesmb",
        Refquota => "refquota",
        Refreservation => "refreservation",
        Guid => "guid",
        Primarycache => "primarycache",
        Secondarycache => "secondarycache",
        Usedsnap => "usedbysnapshots",
        Usedds => "usedbydataset",
        Usedchild => "usedbychildren",
        Usedrefreserv => "usedbyrefreservation",
    }
}

prop_names! {
    /// Pool property, resolved through `zpool_name_to_prop`. See
    /// [`ZpoolProp::native_name`] for names that changed across ABIs.
    ZpoolProp {
        Name => "name",
        Size => "size",
        Capacity => "capacity",
        Altroot => "altroot",
        Health => "health",
        Guid => "guid",
        Version => "version",
        Bootfs => "bootfs",
        Delegation => "delegation",
        Autoreplace => "autoreplace",
        Cachefile => "cachefile",
        Failmode => "failmode",
        Listsnapshots => "listsnapshots",
        Autoexpand => "autoexpand",
        Dedupratio => "dedupratio",
        Free => "free",
        Allocated => "allocated",
        Readonly => "readonly",
        Ashift => "ashift",
        Comment => "comment",
        Fragmentation => "fragmentation",
        Autotrim => "autotrim",
    }
}

impl ZpoolProp {
    /// Name to hand to `zpool_name_to_prop` under `abi`. Legacy libzfs
    /// called the allocation counters `used` and `available`.
    pub fn native_name(self, abi: &AbiMode) -> &'static str {
        match (self, abi.is_openzfs()) {
            (ZpoolProp::Allocated, false) => "used",
            (ZpoolProp::Free, false) => "available",
            _ => self.name(),
        }
    }
}

// ============================================================================
// Mount and share flags
// ============================================================================

/// `umount2`/`mount` flag word passed through to `zfs_mount`/`zfs_unmount`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MountFlags(c_int);

impl MountFlags {
    pub const NONE: MountFlags = MountFlags(0);
    pub const RDONLY: MountFlags = MountFlags(0x0001);
    pub const FSS: MountFlags = MountFlags(0x0002);
    pub const DATA: MountFlags = MountFlags(0x0004);
    pub const NOSUID: MountFlags = MountFlags(0x0010);
    pub const REMOUNT: MountFlags = MountFlags(0x0020);
    pub const NOTRUNC: MountFlags = MountFlags(0x0040);
    pub const OVERLAY: MountFlags = MountFlags(0x0080);
    pub const OPTIONSTR: MountFlags = MountFlags(0x0100);
    pub const GLOBAL: MountFlags = MountFlags(0x0200);
    pub const FORCE: MountFlags = MountFlags(0x0400);
    pub const NOMNTTAB: MountFlags = MountFlags(0x0800);

    pub fn bits(self) -> c_int {
        self.0
    }

    pub fn contains(self, other: MountFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MountFlags {
    type Output = MountFlags;

    fn bitor(self, rhs: MountFlags) -> MountFlags {
        MountFlags(self.0 | rhs.0)
    }
}

/// Share protocol selector for the protocol-specific share calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShareProtocol {
    Nfs,
    Smb,
}

impl ShareProtocol {
    /// Property that switches the protocol on.
    pub fn property(self) -> ZfsProp {
        match self {
            ShareProtocol::Nfs => ZfsProp::Sharenfs,
            ShareProtocol::Smb => ZfsProp::Sharesmb,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShareProtocol::Nfs => "nfs",
            ShareProtocol::Smb => "smb",
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Operations a [`DatasetKind`] supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const MOUNT: Capabilities = Capabilities(1 << 0);
    pub const SHARE: Capabilities = Capabilities(1 << 1);
    pub const SHARE_ISCSI: Capabilities = Capabilities(1 << 2);
    pub const SNAPSHOT: Capabilities = Capabilities(1 << 3);
    pub const CLONE: Capabilities = Capabilities(1 << 4);
    pub const ROLLBACK: Capabilities = Capabilities(1 << 5);
    pub const DATASET_PROPS: Capabilities = Capabilities(1 << 6);
    pub const POOL_PROPS: Capabilities = Capabilities(1 << 7);
    pub const CHILDREN: Capabilities = Capabilities(1 << 8);
    pub const PERMISSIONS: Capabilities = Capabilities(1 << 9);
    pub const RENAME: Capabilities = Capabilities(1 << 10);
    pub const DESTROY: Capabilities = Capabilities(1 << 11);
    pub const EMPTY: Capabilities = Capabilities(0);

    pub fn of(kind: DatasetKind) -> Capabilities {
        match kind {
            DatasetKind::FileSystem => {
                Self::MOUNT
                    | Self::SHARE
                    | Self::SNAPSHOT
                    | Self::ROLLBACK
                    | Self::DATASET_PROPS
                    | Self::CHILDREN
                    | Self::PERMISSIONS
                    | Self::RENAME
                    | Self::DESTROY
            }
            DatasetKind::Volume => {
                Self::SHARE_ISCSI
                    | Self::SNAPSHOT
                    | Self::ROLLBACK
                    | Self::DATASET_PROPS
                    | Self::PERMISSIONS
                    | Self::RENAME
                    | Self::DESTROY
            }
            DatasetKind::Snapshot => {
                Self::CLONE | Self::DATASET_PROPS | Self::RENAME | Self::DESTROY
            }
            DatasetKind::Pool => Self::POOL_PROPS | Self::CHILDREN,
        }
    }

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = Capabilities;

    fn bitand(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 & rhs.0)
    }
}
