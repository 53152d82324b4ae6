//! Gateway settings loaded from a TOML file with defaults for every field.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use mcp_hub::{SupervisorConfig, DEFAULT_ENV_ALLOWLIST};
use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced while loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Operator-facing configuration. A missing file yields the defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySettings {
    pub bind_addr: SocketAddr,
    /// Directory holding one JSON document per user.
    pub config_root: PathBuf,
    pub handshake_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub env_allowlist: Vec<String>,
    pub max_inflight_per_child: Option<usize>,
    pub start_retries: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            config_root: PathBuf::from("data/users"),
            handshake_timeout_secs: 30,
            call_timeout_secs: 120,
            stop_grace_secs: 5,
            env_allowlist: DEFAULT_ENV_ALLOWLIST
                .iter()
                .map(|key| key.to_string())
                .collect(),
            max_inflight_per_child: None,
            start_retries: 0,
        }
    }
}

impl GatewaySettings {
    /// Loads settings from `path`; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Supervisor tunables derived from these settings.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            env_allowlist: self.env_allowlist.clone(),
            max_inflight_per_child: self.max_inflight_per_child,
            start_retries: self.start_retries,
            ..SupervisorConfig::default()
        }
    }
}
