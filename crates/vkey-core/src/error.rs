use thiserror::Error;

use crate::types::VaultId;

pub type VaultResult<T> = Result<T, VaultError>;

/// Error taxonomy shared by every vaultkey crate.
///
/// Variants never carry key material: recovery secrets, master keys and
/// device keys must not reach an error message or a log line.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("authentication failed: this device key is not valid for the vault")]
    AuthenticationFailed,

    #[error("invalid recovery secret: {0}")]
    InvalidRecoveryFormat(String),

    #[error("recovery secret does not match the vault's recovery artifact")]
    RecoveryKeyMismatch,

    #[error("remote store requires an authenticated session")]
    RemoteAuthRequired,

    #[error("remote upload failed: {0}")]
    RemoteUploadFailed(String),

    #[error("remote fetch failed: {0}")]
    RemoteFetchFailed(String),

    #[error("duplicate recovery artifact: {count} files named '{name}'")]
    DuplicateArtifact { name: String, count: usize },

    #[error("no recovery artifact for vault {0}")]
    ArtifactNotFound(VaultId),

    #[error("device is not authorized for vault {0}; recovery required")]
    NotAuthorized(VaultId),

    #[error("vault {0} is locked")]
    Locked(VaultId),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
