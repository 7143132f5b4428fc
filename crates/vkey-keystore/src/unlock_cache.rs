//! Opt-in instant-unlock cache.
//!
//! Holds the plaintext MasterKey so unlock needs no unwrap at all. Only
//! constructed when `[unlock] instant_unlock = true`.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use vkey_core::{VaultError, VaultId, VaultResult};
use vkey_crypto::{MasterKey, KEY_SIZE};
use zeroize::Zeroize;

use crate::index::VaultIndex;
use crate::keychain::{delete_secret, entries, get_secret, store_secret};
use crate::record::now_millis;

pub const UNLOCK_INDEX_NAME: &str = "instant-unlock-index.json";

pub trait InstantUnlockCache: Send + Sync {
    fn store(&self, vault_id: &VaultId, master: &MasterKey) -> VaultResult<()>;

    fn load(&self, vault_id: &VaultId) -> VaultResult<Option<MasterKey>>;

    fn remove(&self, vault_id: &VaultId) -> VaultResult<()>;

    fn clear(&self) -> VaultResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryUnlockCache {
    keys: RwLock<HashMap<VaultId, MasterKey>>,
}

impl MemoryUnlockCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> VaultError {
    VaultError::Keystore("unlock cache lock poisoned".into())
}

impl InstantUnlockCache for MemoryUnlockCache {
    fn store(&self, vault_id: &VaultId, master: &MasterKey) -> VaultResult<()> {
        self.keys
            .write()
            .map_err(poisoned)?
            .insert(*vault_id, master.clone());
        Ok(())
    }

    fn load(&self, vault_id: &VaultId) -> VaultResult<Option<MasterKey>> {
        Ok(self.keys.read().map_err(poisoned)?.get(vault_id).cloned())
    }

    fn remove(&self, vault_id: &VaultId) -> VaultResult<()> {
        self.keys.write().map_err(poisoned)?.remove(vault_id);
        Ok(())
    }

    fn clear(&self) -> VaultResult<()> {
        self.keys.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// Instant-unlock cache in the platform keychain, base64 per vault.
///
/// Cached vault ids are listed in a [`VaultIndex`] file so that `clear`
/// reaches entries written by earlier processes.
#[derive(Debug)]
pub struct KeychainUnlockCache {
    service: String,
    index_path: PathBuf,
    index_lock: Mutex<()>,
}

impl KeychainUnlockCache {
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
        let _guard = self.index_lock.lock().map_err(poisoned)?;
        VaultIndex::update(&self.index_path, f)
    }
}

impl InstantUnlockCache for KeychainUnlockCache {
    fn store(&self, vault_id: &VaultId, master: &MasterKey) -> VaultResult<()> {
        let secret = SecretString::from(B64.encode(master.as_bytes()));
        store_secret(&self.service, &entries::instant_unlock(vault_id), &secret)?;
        self.with_index(|index| {
            index.upsert(*vault_id, now_millis());
            Ok(((), true))
        })
    }

    fn load(&self, vault_id: &VaultId) -> VaultResult<Option<MasterKey>> {
        let Some(secret) = get_secret(&self.service, &entries::instant_unlock(vault_id))? else {
            return Ok(None);
        };
        let mut decoded = B64.decode(secret.expose_secret()).map_err(|_| {
            VaultError::Keystore(format!("instant-unlock entry for {vault_id} is not base64"))
        })?;
        if decoded.len() != KEY_SIZE {
            decoded.zeroize();
            tracing::warn!(vault = %vault_id, "discarding malformed instant-unlock entry");
            return Ok(None);
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        let key = MasterKey::from_bytes(bytes);
        bytes.zeroize();
        Ok(Some(key))
    }

    fn remove(&self, vault_id: &VaultId) -> VaultResult<()> {
        delete_secret(&self.service, &entries::instant_unlock(vault_id))?;
        self.with_index(|index| {
            let removed = index.remove(vault_id);
            Ok(((), removed))
        })
    }

    fn clear(&self) -> VaultResult<()> {
        let cleared = self.with_index(|index| {
            let vaults = index.vault_ids();
            for vault_id in &vaults {
                delete_secret(&self.service, &entries::instant_unlock(vault_id))?;
                index.remove(vault_id);
            }
            Ok((vaults.len(), true))
        })?;
        tracing::info!(service = %self.service, cleared, "instant-unlock cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkey_crypto::generate_master_key;

    #[test]
    fn test_memory_cache_store_load_remove() {
        let cache = MemoryUnlockCache::new();
        let vault = VaultId::new_random();
        let master = generate_master_key().unwrap();

        assert!(cache.load(&vault).unwrap().is_none());
        cache.store(&vault, &master).unwrap();
        assert_eq!(
            cache.load(&vault).unwrap().unwrap().as_bytes(),
            master.as_bytes()
        );
        cache.remove(&vault).unwrap();
        assert!(cache.load(&vault).unwrap().is_none());
    }

    #[test]
    fn test_keychain_cache_clear_reaches_other_instances() {
        let service = format!("vkey-test-{}", uuid::Uuid::new_v4());
        if !crate::keychain::is_available(&service) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join(UNLOCK_INDEX_NAME);
        let vault = VaultId::new_random();

        KeychainUnlockCache::new(&service, index_path.clone())
            .store(&vault, &generate_master_key().unwrap())
            .unwrap();

        let later = KeychainUnlockCache::new(&service, index_path.clone());
        assert!(later.load(&vault).unwrap().is_some());
        later.clear().unwrap();
        assert!(later.load(&vault).unwrap().is_none());
        assert!(VaultIndex::load(&index_path).unwrap().vault_ids().is_empty());
    }

    #[test]
    fn test_memory_cache_clear() {
        let cache = MemoryUnlockCache::new();
        let a = VaultId::new_random();
        let b = VaultId::new_random();
        cache.store(&a, &generate_master_key().unwrap()).unwrap();
        cache.store(&b, &generate_master_key().unwrap()).unwrap();
        cache.clear().unwrap();
        assert!(cache.load(&a).unwrap().is_none());
        assert!(cache.load(&b).unwrap().is_none());
    }
}
