use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from vkey.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub log: LogConfig,
    pub keystore: KeystoreConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub unlock: UnlockConfig,
}

impl VaultConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> VaultResult<Self> {
        toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Which local key vault backend holds device wrap keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystoreBackend {
    /// Platform keychain (Keychain Services, kernel keyring, Credential Manager)
    Keychain,
    /// Software keystore: a 0600 JSON file in the data directory (default)
    File,
    /// Process memory only; nothing survives restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub backend: KeystoreBackend,
    /// Data directory for the file backend and the keychain index
    pub path: PathBuf,
    /// Keychain service name; one per origin
    pub service: String,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            backend: KeystoreBackend::File,
            path: PathBuf::from("~/.local/share/vkey"),
            service: "vkey".into(),
        }
    }
}

/// Remote recovery blob store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBackend {
    /// User's Google Drive, authenticated with the session bearer token
    Gdrive,
    /// In-process memory store (development and tests)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    /// Private app-scoped folder holding recovery artifacts
    pub root: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Transport-level retries for transient errors (0 disables)
    pub max_retries: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::Gdrive,
            root: "/vkey-recovery/".into(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Broadcast channel capacity per origin
    pub channel_capacity: usize,
    /// How long a tab waits for a sibling to answer REQUEST_KEY
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            request_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockConfig {
    /// Cache the plaintext master key in the platform keychain for
    /// zero-latency unlock. Off by default: the key is then protected by the
    /// OS keychain only, not by the non-extractable device wrap key.
    pub instant_unlock: bool,
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|_| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
