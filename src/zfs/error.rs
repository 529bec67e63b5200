// zfs/error.rs
// Error type and libzfs error-code table

use super::helpers::errno_to_string;
use super::types::DatasetKind;
use std::fmt;
use thiserror::Error;

/// Offset of the first `EZFS_*` code; `EZFS_NOMEM` is 2000.
pub const EZFS_BASE: i32 = 2000;

macro_rules! error_codes {
    ($($variant:ident => $sym:literal, $desc:literal;)*) => {
        /// `zfs_error_t`, in native order. The numeric code is
        /// `EZFS_BASE + ordinal`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($variant,)*
        }

        impl ErrorCode {
            const ALL: &'static [ErrorCode] = &[$(ErrorCode::$variant,)*];

            /// The `EZFS_*` symbol name.
            pub fn symbol(self) -> &'static str {
                match self {
                    $(ErrorCode::$variant => $sym,)*
                }
            }

            /// Static description of the code, used when the library has
            /// no per-handle description to offer.
            pub fn description(self) -> &'static str {
                match self {
                    $(ErrorCode::$variant => $desc,)*
                }
            }
        }
    };
}

error_codes! {
    NoMem => "EZFS_NOMEM", "out of memory";
    BadProp => "EZFS_BADPROP", "invalid property value";
    PropReadonly => "EZFS_PROPREADONLY", "cannot set readonly property";
    PropType => "EZFS_PROPTYPE", "property does not apply to dataset type";
    PropNonInherit => "EZFS_PROPNONINHERIT", "property is not inheritable";
    PropSpace => "EZFS_PROPSPACE", "bad quota or reservation";
    BadType => "EZFS_BADTYPE", "dataset is not of appropriate type";
    Busy => "EZFS_BUSY", "pool or dataset is busy";
    Exists => "EZFS_EXISTS", "pool or dataset already exists";
    NoEnt => "EZFS_NOENT", "no such pool or dataset";
    BadStream => "EZFS_BADSTREAM", "bad backup stream";
    DsReadonly => "EZFS_DSREADONLY", "dataset is readonly";
    VolTooBig => "EZFS_VOLTOOBIG", "volume is too large for 32-bit system";
    VolHasData => "EZFS_VOLHASDATA", "volume already contains data";
    InvalidName => "EZFS_INVALIDNAME", "invalid dataset name";
    BadRestore => "EZFS_BADRESTORE", "unable to restore to destination";
    BadBackup => "EZFS_BADBACKUP", "backup failed";
    BadTarget => "EZFS_BADTARGET", "bad attach/detach/replace target";
    NoDevice => "EZFS_NODEVICE", "no such device in pool";
    BadDev => "EZFS_BADDEV", "invalid device to add";
    NoReplicas => "EZFS_NOREPLICAS", "no valid replicas";
    Resilvering => "EZFS_RESILVERING", "currently resilvering";
    BadVersion => "EZFS_BADVERSION", "unsupported version";
    PoolUnavail => "EZFS_POOLUNAVAIL", "pool is currently unavailable";
    DevOverflow => "EZFS_DEVOVERFLOW", "too many devices in one vdev";
    BadPath => "EZFS_BADPATH", "must be an absolute path";
    CrossTarget => "EZFS_CROSSTARGET", "rename or clone across pool or dataset";
    Zoned => "EZFS_ZONED", "used improperly in local zone";
    MountFailed => "EZFS_MOUNTFAILED", "failed to mount dataset";
    UmountFailed => "EZFS_UMOUNTFAILED", "failed to unmount dataset";
    UnshareNfsFailed => "EZFS_UNSHARENFSFAILED", "unshare(1M) failed";
    ShareNfsFailed => "EZFS_SHARENFSFAILED", "share(1M) failed";
    Perm => "EZFS_PERM", "permission denied";
    NoSpc => "EZFS_NOSPC", "out of space";
    Io => "EZFS_IO", "I/O error";
    Intr => "EZFS_INTR", "signal received";
    IsSpare => "EZFS_ISSPARE", "device is a hot spare";
    InvalConfig => "EZFS_INVALCONFIG", "invalid vdev configuration";
    Recursive => "EZFS_RECURSIVE", "recursive dependency";
    NoHistory => "EZFS_NOHISTORY", "no history object";
    UnshareIscsiFailed => "EZFS_UNSHAREISCSIFAILED", "iscsitgtd failed request to unshare";
    ShareIscsiFailed => "EZFS_SHAREISCSIFAILED", "iscsitgtd failed request to share";
    PoolProps => "EZFS_POOLPROPS", "couldn't retrieve pool props";
    PoolNotSup => "EZFS_POOL_NOTSUP", "ops not supported for this type of pool";
    PoolInvalArg => "EZFS_POOL_INVALARG", "invalid argument for this pool operation";
    NameTooLong => "EZFS_NAMETOOLONG", "dataset name is too long";
    OpenFailed => "EZFS_OPENFAILED", "open of device failed";
    NoCap => "EZFS_NOCAP", "couldn't get capacity";
    LabelFailed => "EZFS_LABELFAILED", "write of label failed";
    IscsiSvcUnavail => "EZFS_ISCSISVCUNAVAIL", "iscsi service unavailable";
    BadWho => "EZFS_BADWHO", "invalid permission who";
    BadPerm => "EZFS_BADPERM", "invalid permission";
    BadPermSet => "EZFS_BADPERMSET", "invalid permission set name";
    NoDelegation => "EZFS_NODELEGATION", "delegated administration is disabled";
    PermRdonly => "EZFS_PERMRDONLY", "permissions are readonly";
    UnshareSmbFailed => "EZFS_UNSHARESMBFAILED", "failed to unshare over smb";
    ShareSmbFailed => "EZFS_SHARESMBFAILED", "failed to share over smb";
    BadCache => "EZFS_BADCACHE", "bad cache file";
    IsL2Cache => "EZFS_ISL2CACHE", "device is for the level 2 ARC";
    VdevNotSup => "EZFS_VDEVNOTSUP", "unsupported vdev type";
    Unknown => "EZFS_UNKNOWN", "unknown error";
}

impl ErrorCode {
    pub fn ordinal(self) -> i32 {
        self as i32
    }

    /// Numeric code as returned by `libzfs_errno`.
    pub fn code(self) -> i32 {
        EZFS_BASE + self.ordinal()
    }

    /// Translate a `libzfs_errno` value. Anything outside the table is
    /// `Unknown`; translation itself never fails.
    pub fn from_code(code: i32) -> ErrorCode {
        code.checked_sub(EZFS_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(ErrorCode::Unknown)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol(), self.code())
    }
}

#[derive(Debug, Error)]
pub enum ZfsError {
    /// A libzfs call failed; `description` was read from the library
    /// handle right after the call.
    #[error("{op}: {description} [{code}]")]
    Native {
        op: String,
        code: ErrorCode,
        errno: i32,
        description: String,
    },

    #[error("{op}: nvlist marshalling failed: {} (errno {errno})", errno_to_string(*errno))]
    Marshalling { op: String, errno: i32 },

    #[error("libzfs unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("{name}: unrecognised dataset type tag {tag}")]
    Inconsistent { name: String, tag: i32 },

    #[error("{op} is not supported on a {kind}")]
    Unsupported { op: String, kind: DatasetKind },

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("handle already closed")]
    Closed,
}

impl ZfsError {
    pub(crate) fn marshalling(op: &str, errno: i32) -> Self {
        ZfsError::Marshalling {
            op: op.to_string(),
            errno,
        }
    }

    pub(crate) fn unsupported(op: &str, kind: DatasetKind) -> Self {
        ZfsError::Unsupported {
            op: op.to_string(),
            kind,
        }
    }

    /// Typed code of a native failure.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ZfsError::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Numeric `2000 + ordinal` code of a native failure.
    pub fn code(&self) -> Option<i32> {
        self.error_code().map(ErrorCode::code)
    }
}

pub type Result<T> = std::result::Result<T, ZfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_offset_from_base() {
        assert_eq!(ErrorCode::NoMem.code(), 2000);
        assert_eq!(ErrorCode::NoEnt.code(), 2009);
        assert_eq!(ErrorCode::Perm.code(), 2032);
        assert_eq!(ErrorCode::from_code(2032), ErrorCode::Perm);
    }

    /// Test: codes past the delegation entries keep their native values
    #[test]
    fn test_delegation_and_later_codes() {
        assert_eq!(ErrorCode::NoDelegation.code(), 2054);
        assert_eq!(ErrorCode::from_code(2055), ErrorCode::PermRdonly);
        assert_eq!(ErrorCode::from_code(2056), ErrorCode::UnshareSmbFailed);
        assert_eq!(ErrorCode::from_code(2058), ErrorCode::BadCache);
        assert_eq!(ErrorCode::VdevNotSup.code(), 2060);
        assert_eq!(ErrorCode::Unknown.code(), 2061);
    }

    #[test]
    fn test_unknown_codes_do_not_fail() {
        assert_eq!(ErrorCode::from_code(0), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_code(-5), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_code(9999), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_code(i32::MIN), ErrorCode::Unknown);
    }

    #[test]
    fn test_native_error_display() {
        let err = ZfsError::Native {
            op: "zfs_open".to_string(),
            code: ErrorCode::Perm,
            errno: 2032,
            description: "permission denied".to_string(),
        };
        assert_eq!(err.code(), Some(2032));
        assert_eq!(
            err.to_string(),
            "zfs_open: permission denied [EZFS_PERM (2032)]"
        );
    }
}
