//! Remote recovery artifact: `vault_<masterKeyId>.key`
//!
//! JSON document with two independent paths back to the MasterKey:
//! ```json
//! {
//!   "version": 1,
//!   "masterKeyId": "<uuid>",
//!   "recoveryKey": "<base64 MasterKey>",
//!   "encryptedMasterKey": "<base64>",
//!   "iv": "<base64 96-bit>",
//!   "authTag": "<base64 128-bit>",
//!   "createdAt": 1718000000000
//! }
//! ```
//!
//! `recoveryKey` never changes for the life of the vault. The encrypted
//! fields always hold the wrap made by the most recently authorized device.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::{Deserialize, Serialize};
use vkey_core::{VaultError, VaultId, VaultResult};

use crate::keys::MasterKey;
use crate::recovery::{encode_recovery_secret, parse_recovery_secret};
use crate::wrap::WrappedKey;
use crate::{IV_SIZE, TAG_SIZE};

/// Current artifact schema version
pub const ARTIFACT_VERSION: u32 = 1;

/// Deterministic remote file name for a vault's artifact.
pub fn artifact_name(vault_id: &VaultId) -> String {
    format!("vault_{vault_id}.key")
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultArtifact {
    pub version: u32,
    pub master_key_id: VaultId,
    pub recovery_key: String,
    pub encrypted_master_key: String,
    pub iv: String,
    pub auth_tag: String,
    pub created_at: u64,
}

impl VaultArtifact {
    /// Build the first artifact of a vault.
    pub fn new(
        vault_id: VaultId,
        master: &MasterKey,
        wrapped: &WrappedKey,
        created_at: u64,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            master_key_id: vault_id,
            recovery_key: encode_recovery_secret(master),
            encrypted_master_key: B64.encode(&wrapped.ciphertext),
            iv: B64.encode(wrapped.iv),
            auth_tag: B64.encode(wrapped.auth_tag),
            created_at,
        }
    }

    /// Replace the device-wrapped fields, keeping `recoveryKey` and
    /// `createdAt` exactly as they are.
    pub fn rewrapped(&self, wrapped: &WrappedKey) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            master_key_id: self.master_key_id,
            recovery_key: self.recovery_key.clone(),
            encrypted_master_key: B64.encode(&wrapped.ciphertext),
            iv: B64.encode(wrapped.iv),
            auth_tag: B64.encode(wrapped.auth_tag),
            created_at: self.created_at,
        }
    }

    /// Decode the device-wrapped path.
    pub fn wrapped(&self) -> VaultResult<WrappedKey> {
        let ciphertext = decode_field("encryptedMasterKey", &self.encrypted_master_key)?;
        let iv: [u8; IV_SIZE] = decode_field("iv", &self.iv)?
            .try_into()
            .map_err(|_| corrupt("iv has wrong length"))?;
        let auth_tag: [u8; TAG_SIZE] = decode_field("authTag", &self.auth_tag)?
            .try_into()
            .map_err(|_| corrupt("authTag has wrong length"))?;
        Ok(WrappedKey {
            ciphertext,
            iv,
            auth_tag,
        })
    }

    /// Decode the plaintext recovery path.
    pub fn recovery_master_key(&self) -> VaultResult<MasterKey> {
        parse_recovery_secret(&self.recovery_key)
            .map_err(|_| corrupt("recoveryKey is not a valid master key"))
    }

    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("serializing artifact: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        let artifact: Self = serde_json::from_slice(data)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("parsing artifact: {e}")))?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(corrupt(&format!(
                "unsupported artifact version {}",
                artifact.version
            )));
        }
        Ok(artifact)
    }
}

impl std::fmt::Debug for VaultArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultArtifact")
            .field("version", &self.version)
            .field("master_key_id", &self.master_key_id)
            .field("recovery_key", &"[REDACTED]")
            .field("iv", &self.iv)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn decode_field(name: &str, value: &str) -> VaultResult<Vec<u8>> {
    B64.decode(value)
        .map_err(|_| corrupt(&format!("{name} is not valid base64")))
}

fn corrupt(reason: &str) -> VaultError {
    VaultError::Other(anyhow::anyhow!("corrupted vault artifact: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_master_key, DeviceWrapKey};
    use crate::wrap::{unwrap, wrap};

    fn sample() -> (VaultId, MasterKey, DeviceWrapKey, VaultArtifact) {
        let vault = VaultId::new_random();
        let master = generate_master_key().unwrap();
        let device = DeviceWrapKey::generate().unwrap();
        let wrapped = wrap(&master, &device, &vault).unwrap();
        let artifact = VaultArtifact::new(vault, &master, &wrapped, 1_718_000_000_000);
        (vault, master, device, artifact)
    }

    #[test]
    fn test_artifact_name() {
        let vault: VaultId = "0d7c1c5e-7a43-4c36-9e0b-2f1b8f0f4a11".parse().unwrap();
        assert_eq!(
            artifact_name(&vault),
            "vault_0d7c1c5e-7a43-4c36-9e0b-2f1b8f0f4a11.key"
        );
    }

    #[test]
    fn test_json_field_names() {
        let (_, _, _, artifact) = sample();
        let json: serde_json::Value =
            serde_json::from_slice(&artifact.to_bytes().unwrap()).unwrap();
        for field in [
            "version",
            "masterKeyId",
            "recoveryKey",
            "encryptedMasterKey",
            "iv",
            "authTag",
            "createdAt",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["version"], 1);
        assert_eq!(json["createdAt"], 1_718_000_000_000u64);
    }

    #[test]
    fn test_both_paths_recover_master() {
        let (vault, master, device, artifact) = sample();
        let parsed = VaultArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();

        let via_recovery = parsed.recovery_master_key().unwrap();
        let via_device = unwrap(&parsed.wrapped().unwrap(), &device, &vault).unwrap();

        assert_eq!(via_recovery.as_bytes(), master.as_bytes());
        assert_eq!(via_device.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_rewrap_preserves_recovery_key() {
        let (vault, master, _, artifact) = sample();
        let new_device = DeviceWrapKey::generate().unwrap();
        let rewrapped = artifact.rewrapped(&wrap(&master, &new_device, &vault).unwrap());

        assert_eq!(rewrapped.recovery_key, artifact.recovery_key);
        assert_eq!(rewrapped.created_at, artifact.created_at);
        assert_ne!(rewrapped.encrypted_master_key, artifact.encrypted_master_key);
        assert_ne!(rewrapped.iv, artifact.iv);
        assert_ne!(rewrapped.auth_tag, artifact.auth_tag);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let (_, _, _, mut artifact) = sample();
        artifact.version = 7;
        let bytes = serde_json::to_vec(&artifact).unwrap();
        assert!(VaultArtifact::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_bad_iv_length_rejected() {
        let (_, _, _, mut artifact) = sample();
        artifact.iv = B64.encode([0u8; 8]);
        assert!(artifact.wrapped().is_err());
    }

    #[test]
    fn test_debug_redacts_recovery_key() {
        let (_, _, _, artifact) = sample();
        let dbg = format!("{artifact:?}");
        assert!(!dbg.contains(&artifact.recovery_key));
    }
}
