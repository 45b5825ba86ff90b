use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Runtime configuration, loaded once at startup.
///
/// Every field is optional in the file; absent fields take the defaults
/// below. Command-line flags are applied on top by the binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default = "default_admin_host")]
    pub admin_host: String,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    /// Base URL of the inference backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Seconds between template change checks.
    #[serde(default = "default_warmup_check_interval")]
    pub warmup_check_interval: u64,
    /// Message prefix -> template file path. Paths may be absolute or
    /// relative to the process working directory. A `BTreeMap` keeps
    /// prefix iteration order deterministic.
    #[serde(default)]
    pub prefixes: BTreeMap<String, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_host: default_proxy_host(),
            proxy_port: default_proxy_port(),
            admin_host: default_admin_host(),
            admin_port: default_admin_port(),
            backend_url: default_backend_url(),
            warmup_check_interval: default_warmup_check_interval(),
            prefixes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Config {
    /// Loads configuration from a JSON file. A missing file yields the
    /// defaults; malformed JSON is a fatal error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }

    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.admin_host, self.admin_port)
    }
}

fn default_proxy_host() -> String {
    "localhost".to_string()
}

fn default_proxy_port() -> u16 {
    8088
}

fn default_admin_host() -> String {
    "localhost".to_string()
}

fn default_admin_port() -> u16 {
    8089
}

fn default_backend_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_warmup_check_interval() -> u64 {
    30
}
