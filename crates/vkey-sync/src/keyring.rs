//! Per-tab in-memory keyring: vault id → unlocked MasterKey.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use vkey_core::VaultId;
use vkey_crypto::MasterKey;

/// The unlocked keys of one tab. Clones share the same map.
///
/// Nothing here is persisted; dropping the last clone zeroizes every key.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Arc<RwLock<HashMap<VaultId, MasterKey>>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns true when the vault was not held before.
    pub async fn insert(&self, vault_id: VaultId, key: MasterKey) -> bool {
        self.keys.write().await.insert(vault_id, key).is_none()
    }

    pub async fn get(&self, vault_id: &VaultId) -> Option<MasterKey> {
        self.keys.read().await.get(vault_id).cloned()
    }

    pub async fn contains(&self, vault_id: &VaultId) -> bool {
        self.keys.read().await.contains_key(vault_id)
    }

    pub async fn remove(&self, vault_id: &VaultId) -> bool {
        self.keys.write().await.remove(vault_id).is_some()
    }

    /// Drop every key; returns how many were held.
    pub async fn clear(&self) -> usize {
        let mut keys = self.keys.write().await;
        let n = keys.len();
        keys.clear();
        n
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }

    pub async fn vault_ids(&self) -> Vec<VaultId> {
        self.keys.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkey_crypto::generate_master_key;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let ring = Keyring::new();
        let vault = VaultId::new_random();
        let key = generate_master_key().unwrap();

        assert!(ring.insert(vault, key.clone()).await);
        assert!(!ring.insert(vault, key.clone()).await, "second insert overwrites");
        assert_eq!(ring.get(&vault).await.unwrap().as_bytes(), key.as_bytes());
        assert!(ring.remove(&vault).await);
        assert!(ring.get(&vault).await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let ring = Keyring::new();
        let other = ring.clone();
        ring.insert(VaultId::new_random(), generate_master_key().unwrap())
            .await;
        assert_eq!(other.len().await, 1);
        assert_eq!(other.clear().await, 1);
        assert!(ring.is_empty().await);
    }
}
