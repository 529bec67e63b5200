// zfs/helpers.rs
// Helper functions: errno text, dataset name handling, size parsing

use super::error::{Result, ZfsError};
use std::ffi::CString;

/// Convert an errno from libnvpair to a descriptive string
pub fn errno_to_string(errno: i32) -> &'static str {
    match errno {
        libc::ENOENT => "no such pair",
        libc::EEXIST => "pair already exists",
        libc::EINVAL => "invalid argument",
        libc::ENOMEM => "out of memory",
        libc::ENOTSUP => "unsupported pair type",
        libc::EFAULT => "bad address",
        libc::EPERM => "permission denied",
        _ => "unknown error",
    }
}

/// Convert a name to a C string. Empty names and embedded NULs are
/// rejected.
pub fn to_cstring(name: &str) -> Result<CString> {
    if name.is_empty() {
        return Err(ZfsError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| ZfsError::InvalidName(name.to_string()))
}

/// Strict ancestors of a dataset name, root first.
///
/// `"tank/a/b"` yields `["tank", "tank/a"]`. A snapshot component
/// (`@...`) is not treated as a path level.
pub fn ancestors(name: &str) -> Vec<&str> {
    let path = name.split('@').next().unwrap_or(name);
    let mut out: Vec<&str> = path
        .match_indices('/')
        .map(|(i, _)| &name[..i])
        .collect();
    if path.len() < name.len() {
        out.push(path);
    }
    out
}

/// Pool component of a dataset name.
pub fn pool_of(name: &str) -> &str {
    name.split(|c: char| c == '/' || c == '@').next().unwrap_or(name)
}

/// Parse a human-readable size such as `"1.5G"` as printed by `zpool list`.
/// Suffixes are binary (`K` = 1024). Returns `None` for `"-"` and other
/// unparseable input.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let (number, exp) = match value.chars().last()? {
        'K' | 'k' => (&value[..value.len() - 1], 1),
        'M' | 'm' => (&value[..value.len() - 1], 2),
        'G' | 'g' => (&value[..value.len() - 1], 3),
        'T' | 't' => (&value[..value.len() - 1], 4),
        'P' | 'p' => (&value[..value.len() - 1], 5),
        'E' | 'e' => (&value[..value.len() - 1], 6),
        'B' | 'b' => (&value[..value.len() - 1], 0),
        _ => (value, 0),
    };
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some((number * 1024f64.powi(exp)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors_root_first() {
        assert_eq!(ancestors("tank/a/b"), vec!["tank", "tank/a"]);
        assert_eq!(ancestors("tank"), Vec::<&str>::new());
        assert_eq!(ancestors("tank/a@snap"), vec!["tank", "tank/a"]);
    }

    #[test]
    fn test_pool_of() {
        assert_eq!(pool_of("tank/a/b"), "tank");
        assert_eq!(pool_of("tank@now"), "tank");
        assert_eq!(pool_of("tank"), "tank");
    }

    #[test]
    fn test_to_cstring_rejects_nul_and_empty() {
        assert!(to_cstring("tank/a").is_ok());
        assert!(matches!(to_cstring(""), Err(ZfsError::InvalidName(_))));
        assert!(matches!(to_cstring("ta\0nk"), Err(ZfsError::InvalidName(_))));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("1K"), Some(1024));
        assert_eq!(parse_size("1.5G"), Some(1610612736));
        assert_eq!(parse_size("2T"), Some(2 * 1024u64.pow(4)));
        assert_eq!(parse_size("-"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_errno_to_string() {
        assert_eq!(errno_to_string(libc::ENOENT), "no such pair");
        assert_eq!(errno_to_string(libc::ENOMEM), "out of memory");
        assert_eq!(errno_to_string(-42), "unknown error");
    }
}
