// zfs/config.rs
// ABI override settings: process-level overrides and captured environment

use super::abi::ABI_ENV_KEY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Override settings consulted by ABI detection.
///
/// `overrides` play the role of process properties and win over
/// `environment`. Keys are `LIBZFS4J_ABI` or `LIBZFS4J_ABI_<feature>`; a
/// key is matched as given or upper-cased.
///
/// ```json
/// {
///   "overrides": { "LIBZFS4J_ABI_zfs_share": "off" },
///   "environment": { "LIBZFS4J_ABI": "openzfs" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub overrides: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
}

impl Config {
    /// Capture every `LIBZFS4J_ABI*` variable of the current process.
    pub fn from_env() -> Config {
        Config {
            overrides: BTreeMap::new(),
            environment: std::env::vars()
                .filter(|(k, _)| k.starts_with(ABI_ENV_KEY))
                .collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read a JSON settings file. A missing or malformed file is logged
    /// and yields the defaults.
    pub fn load(path: &Path) -> Config {
        match fs::read_to_string(path) {
            Ok(content) => match Config::from_json(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => {
                warn!("{} not found, using default values.", path.display());
                Config::default()
            }
        }
    }

    /// Config that disables the whole wrapper.
    pub fn disabled() -> Config {
        Config::default().with_override(ABI_ENV_KEY, "off")
    }

    pub fn with_override(mut self, key: &str, value: &str) -> Config {
        self.overrides.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_env_var(mut self, key: &str, value: &str) -> Config {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn override_value(&self, key: &str) -> Option<&str> {
        lookup(&self.overrides, key)
    }

    pub(crate) fn env_value(&self, key: &str) -> Option<&str> {
        lookup(&self.environment, key)
    }
}

fn lookup<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key)
        .or_else(|| map.get(&key.to_ascii_uppercase()))
        .map(String::as_str)
}
