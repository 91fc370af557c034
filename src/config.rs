//! Configuration (ambient): per-endpoint timeout/MPR-clamp defaults, and an
//! optional on-disk `RootConfig` for callers that want persisted defaults
//! across process runs (the demo binary in particular).
//!
//! `serde` + `serde_yaml` + `dirs`: look in the user's config dir, fall
//! back to defaults if nothing's there yet.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-endpoint configuration knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub timeout_ms: u64,
    pub mprt_max_ms: u64,
}

impl EndpointConfig {
    pub const DEFAULT_GENERIC: Self = Self {
        timeout_ms: 1000,
        mprt_max_ms: 0,
    };

    pub const DEFAULT_MCTP: Self = Self {
        timeout_ms: 5000,
        mprt_max_ms: 0,
    };
}

/// One persisted endpoint entry: address plus the config to apply to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfigEntry {
    pub network_id: u32,
    pub eid: u8,
    #[serde(flatten)]
    pub config: EndpointConfig,
}

/// Persisted set of endpoints the demo binary knows about, independent of
/// live discovery. Purely a convenience layer; nothing in the library
/// itself requires a config file to exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfigEntry>,
}

/// `$XDG_CONFIG_HOME/nvme-mi/config.yaml` (or the platform equivalent via
/// the `dirs` crate).
pub fn config_path() -> Result<PathBuf> {
    let mut dir = dirs::config_dir()
        .ok_or_else(|| Error::protocol("could not determine user config directory"))?;
    dir.push("nvme-mi");
    Ok(dir.join("config.yaml"))
}

/// Loads the config file, or returns the default (empty) config if it
/// doesn't exist yet.
pub fn load_config() -> Result<RootConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(RootConfig::default());
    }
    let contents = fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| Error::protocol(format!("invalid config file: {e}")))
}

/// Writes the config file, creating its parent directory if needed.
pub fn save_config(config: &RootConfig) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| Error::protocol(format!("failed to serialize config: {e}")))?;
    fs::write(&path, yaml)?;
    Ok(())
}
