//! Platform keychain backend for device records.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: kernel keyutils (session keyring)
//! - Windows: Credential Manager (DPAPI)
//!
//! Each vault's record is one keychain entry named `device-key:<vault_id>`
//! holding the serialized record. The vault list lives in a plain
//! [`VaultIndex`] file because keychains cannot be enumerated portably.

use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::Mutex;
use vkey_core::{VaultError, VaultId, VaultResult};
use zeroize::Zeroize;

use crate::index::VaultIndex;
use crate::record::{DeviceRecord, StoredRecord};
use crate::LocalKeyVault;

/// Well-known keychain entry names
pub mod entries {
    use vkey_core::VaultId;

    /// Serialized device record for one vault
    pub fn device_key(vault_id: &VaultId) -> String {
        format!("device-key:{vault_id}")
    }

    /// Plaintext master key cached for instant unlock
    pub fn instant_unlock(vault_id: &VaultId) -> String {
        format!("instant-unlock:{vault_id}")
    }
}

/// Store a secret in the platform keychain.
pub fn store_secret(service: &str, key_name: &str, secret: &SecretString) -> VaultResult<()> {
    let entry = keyring::Entry::new(service, key_name)
        .map_err(|e| VaultError::Keystore(format!("keychain entry creation: {e}")))?;
    entry
        .set_password(secret.expose_secret())
        .map_err(|e| VaultError::Keystore(format!("keychain store for '{key_name}': {e}")))?;
    tracing::debug!(key = key_name, "stored secret in platform keychain");
    Ok(())
}

/// Retrieve a secret from the platform keychain.
pub fn get_secret(service: &str, key_name: &str) -> VaultResult<Option<SecretString>> {
    let entry = keyring::Entry::new(service, key_name)
        .map_err(|e| VaultError::Keystore(format!("keychain entry creation: {e}")))?;
    match entry.get_password() {
        Ok(mut password) => {
            let secret = SecretString::from(password.clone());
            password.zeroize();
            Ok(Some(secret))
        }
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(VaultError::Keystore(format!(
            "keychain get for '{key_name}': {e}"
        ))),
    }
}

/// Delete a secret from the platform keychain.
pub fn delete_secret(service: &str, key_name: &str) -> VaultResult<()> {
    let entry = keyring::Entry::new(service, key_name)
        .map_err(|e| VaultError::Keystore(format!("keychain entry creation: {e}")))?;
    match entry.delete_credential() {
        Ok(()) => {
            tracing::debug!(key = key_name, "deleted secret from platform keychain");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => Ok(()), // already deleted
        Err(e) => Err(VaultError::Keystore(format!(
            "keychain delete for '{key_name}': {e}"
        ))),
    }
}

/// Whether the platform keychain actually persists credentials.
///
/// Writes a throwaway entry and reads it back through a fresh handle. Builds
/// without a platform store fall back to keyring's mock store, where every
/// handle is its own credential and the read comes back empty.
pub fn is_available(service: &str) -> bool {
    const CHECK_ENTRY: &str = "__vkey_availability__";
    let written = store_secret(service, CHECK_ENTRY, &SecretString::from("ok"));
    let readable = written.is_ok()
        && matches!(get_secret(service, CHECK_ENTRY), Ok(Some(s)) if s.expose_secret() == "ok");
    let _ = delete_secret(service, CHECK_ENTRY);
    if !readable {
        tracing::debug!(service, "platform keychain does not persist credentials");
    }
    readable
}

/// Local key vault in the platform keychain.
#[derive(Debug)]
pub struct KeychainKeyVault {
    service: String,
    index_path: PathBuf,
    index_lock: Mutex<()>,
}

impl KeychainKeyVault {
    pub fn new(service: &str, index_path: PathBuf) -> Self {
        Self {
            service: service.to_string(),
            index_path,
            index_lock: Mutex::new(()),
        }
    }

    fn with_index<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&mut VaultIndex) -> VaultResult<(T, bool)>,
    {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| VaultError::Keystore("keychain index lock poisoned".into()))?;
        VaultIndex::update(&self.index_path, f)
    }
}

impl LocalKeyVault for KeychainKeyVault {
    fn put(&self, record: &DeviceRecord) -> VaultResult<()> {
        let stored = StoredRecord::from_record(record);
        let mut json = serde_json::to_string(&stored)
            .map_err(|e| VaultError::Keystore(format!("serializing device record: {e}")))?;
        let secret = SecretString::from(json.clone());
        json.zeroize();

        store_secret(&self.service, &entries::device_key(&record.vault_id), &secret)?;
        self.with_index(|index| {
            index.upsert(record.vault_id, record.authorized_at);
            Ok(((), true))
        })
    }

    fn get(&self, vault_id: &VaultId) -> VaultResult<Option<DeviceRecord>> {
        let Some(secret) = get_secret(&self.service, &entries::device_key(vault_id))? else {
            return Ok(None);
        };
        let stored: StoredRecord = serde_json::from_str(secret.expose_secret()).map_err(|e| {
            VaultError::Keystore(format!("parsing device record for vault {vault_id}: {e}"))
        })?;
        stored.into_record().map(Some)
    }

    fn delete(&self, vault_id: &VaultId) -> VaultResult<()> {
        delete_secret(&self.service, &entries::device_key(vault_id))?;
        self.with_index(|index| {
            let removed = index.remove(vault_id);
            Ok(((), removed))
        })
    }

    fn clear_all(&self) -> VaultResult<()> {
        self.with_index(|index| {
            for vault_id in index.vault_ids() {
                delete_secret(&self.service, &entries::device_key(&vault_id))?;
                index.remove(&vault_id);
            }
            Ok(((), true))
        })?;
        tracing::info!(service = %self.service, "cleared all device records from keychain");
        Ok(())
    }

    fn vault_ids(&self) -> VaultResult<Vec<VaultId>> {
        self.with_index(|index| Ok((index.vault_ids(), false)))
    }

    fn backend_name(&self) -> &'static str {
        "keychain"
    }
}
