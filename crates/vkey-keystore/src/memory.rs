use std::collections::HashMap;
use std::sync::RwLock;

use vkey_core::{VaultError, VaultId, VaultResult};

use crate::record::DeviceRecord;
use crate::LocalKeyVault;

/// In-process local key vault.
#[derive(Debug, Default)]
pub struct MemoryKeyVault {
    records: RwLock<HashMap<VaultId, DeviceRecord>>,
}

impl MemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> VaultError {
    VaultError::Keystore("memory key vault lock poisoned".into())
}

impl LocalKeyVault for MemoryKeyVault {
    fn put(&self, record: &DeviceRecord) -> VaultResult<()> {
        self.records
            .write()
            .map_err(poisoned)?
            .insert(record.vault_id, record.clone());
        Ok(())
    }

    fn get(&self, vault_id: &VaultId) -> VaultResult<Option<DeviceRecord>> {
        Ok(self.records.read().map_err(poisoned)?.get(vault_id).cloned())
    }

    fn delete(&self, vault_id: &VaultId) -> VaultResult<()> {
        self.records.write().map_err(poisoned)?.remove(vault_id);
        Ok(())
    }

    fn clear_all(&self) -> VaultResult<()> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn vault_ids(&self) -> VaultResult<Vec<VaultId>> {
        Ok(self.records.read().map_err(poisoned)?.keys().copied().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkey_crypto::{generate_master_key, wrap, DeviceWrapKey};

    fn record() -> DeviceRecord {
        let vault = VaultId::new_random();
        let key = DeviceWrapKey::generate().unwrap();
        let wrapped = wrap(&generate_master_key().unwrap(), &key, &vault).unwrap();
        DeviceRecord::new(vault, key, wrapped)
    }

    #[test]
    fn test_put_get_delete() {
        let store = MemoryKeyVault::new();
        let rec = record();

        store.put(&rec).unwrap();
        let loaded = store.get(&rec.vault_id).unwrap().unwrap();
        assert_eq!(loaded.key, rec.key);
        assert_eq!(loaded.wrapped, rec.wrapped);

        store.delete(&rec.vault_id).unwrap();
        assert!(store.get(&rec.vault_id).unwrap().is_none());
        // idempotent
        store.delete(&rec.vault_id).unwrap();
    }

    #[test]
    fn test_put_overwrites() {
        let store = MemoryKeyVault::new();
        let first = record();
        let key = DeviceWrapKey::generate().unwrap();
        let wrapped = wrap(&generate_master_key().unwrap(), &key, &first.vault_id).unwrap();
        let second = DeviceRecord::new(first.vault_id, key, wrapped);

        store.put(&first).unwrap();
        store.put(&second).unwrap();
        assert_eq!(store.get(&first.vault_id).unwrap().unwrap().key, second.key);
        assert_eq!(store.vault_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_all() {
        let store = MemoryKeyVault::new();
        store.put(&record()).unwrap();
        store.put(&record()).unwrap();
        assert_eq!(store.vault_ids().unwrap().len(), 2);
        store.clear_all().unwrap();
        assert!(store.vault_ids().unwrap().is_empty());
    }
}
