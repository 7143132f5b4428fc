//! Device authorization record and its persisted form

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use vkey_core::{VaultError, VaultId, VaultResult};
use vkey_crypto::{DeviceWrapKey, WrappedKey, IV_SIZE, TAG_SIZE};
use zeroize::Zeroize;

/// Everything this device holds for one vault: the wrap key handle and the
/// MasterKey wrapped under it. Enough to unlock without a network call.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub vault_id: VaultId,
    pub key: DeviceWrapKey,
    pub wrapped: WrappedKey,
    /// Unix epoch milliseconds of authorization
    pub authorized_at: u64,
}

impl DeviceRecord {
    pub fn new(vault_id: VaultId, key: DeviceWrapKey, wrapped: WrappedKey) -> Self {
        Self {
            vault_id,
            key,
            wrapped,
            authorized_at: now_millis(),
        }
    }
}

/// Serialized record for backends that persist outside the process.
#[derive(Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub vault_id: VaultId,
    pub key_id: uuid::Uuid,
    pub device_key: String,
    pub encrypted_master_key: String,
    pub iv: String,
    pub auth_tag: String,
    pub authorized_at: u64,
}

impl StoredRecord {
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            vault_id: record.vault_id,
            key_id: record.key.key_id(),
            device_key: record.key.export_for_keystore().expose_secret().to_string(),
            encrypted_master_key: B64.encode(&record.wrapped.ciphertext),
            iv: B64.encode(record.wrapped.iv),
            auth_tag: B64.encode(record.wrapped.auth_tag),
            authorized_at: record.authorized_at,
        }
    }

    pub fn into_record(self) -> VaultResult<DeviceRecord> {
        let secret = SecretString::from(self.device_key.clone());
        let key = DeviceWrapKey::import_from_keystore(self.key_id, &secret)?;
        let bad = |field: &str| {
            VaultError::Keystore(format!(
                "record for vault {} has invalid {field}",
                self.vault_id
            ))
        };
        let ciphertext = B64
            .decode(&self.encrypted_master_key)
            .map_err(|_| bad("encrypted_master_key"))?;
        let iv: [u8; IV_SIZE] = B64
            .decode(&self.iv)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| bad("iv"))?;
        let auth_tag: [u8; TAG_SIZE] = B64
            .decode(&self.auth_tag)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| bad("auth_tag"))?;

        Ok(DeviceRecord {
            vault_id: self.vault_id,
            key,
            wrapped: WrappedKey {
                ciphertext,
                iv,
                auth_tag,
            },
            authorized_at: self.authorized_at,
        })
    }
}

impl Drop for StoredRecord {
    fn drop(&mut self) {
        self.device_key.zeroize();
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkey_crypto::{generate_master_key, unwrap, wrap};

    #[test]
    fn test_stored_record_roundtrip_unwraps() {
        let vault = VaultId::new_random();
        let master = generate_master_key().unwrap();
        let key = DeviceWrapKey::generate().unwrap();
        let wrapped = wrap(&master, &key, &vault).unwrap();
        let record = DeviceRecord::new(vault, key.clone(), wrapped);

        let json = serde_json::to_string(&StoredRecord::from_record(&record)).unwrap();
        let stored: StoredRecord = serde_json::from_str(&json).unwrap();
        let restored = stored.into_record().unwrap();

        assert_eq!(restored.vault_id, vault);
        assert_eq!(restored.key, key);
        let unwrapped = unwrap(&restored.wrapped, &restored.key, &vault).unwrap();
        assert_eq!(unwrapped.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_corrupt_iv_rejected() {
        let vault = VaultId::new_random();
        let master = generate_master_key().unwrap();
        let key = DeviceWrapKey::generate().unwrap();
        let wrapped = wrap(&master, &key, &vault).unwrap();
        let mut stored = StoredRecord::from_record(&DeviceRecord::new(vault, key, wrapped));
        stored.iv = B64.encode([0u8; 3]);

        assert!(matches!(stored.into_record(), Err(VaultError::Keystore(_))));
    }
}
