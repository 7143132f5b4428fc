//! Non-secret index of the vaults a keychain-backed device holds records for.
//!
//! Platform keychains cannot enumerate entries portably, so the keychain
//! backend keeps this list beside its data to support `vault_ids` and
//! `clear_all`. It contains vault ids and timestamps only. The instant-unlock
//! cache keeps a second index of the same shape for its own entries.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vkey_core::{VaultError, VaultId, VaultResult};

use crate::lockfile::{atomic_replace, with_exclusive_lock};

pub const DEFAULT_INDEX_NAME: &str = "keychain-index.json";

/// One indexed vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vault_id: VaultId,
    /// Unix epoch milliseconds of the most recent authorization
    pub authorized_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultIndex {
    pub entries: Vec<IndexEntry>,
}

impl VaultIndex {
    /// Load the index from a JSON file; a missing file is an empty index.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            VaultError::Keystore(format!("parsing vault index {}: {e}", path.display()))
        })
    }

    /// Replace the index file atomically. Callers hold the index lock.
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| VaultError::Keystore(format!("serializing vault index: {e}")))?;
        atomic_replace(path, &json)
    }

    /// Load, edit and save the index at `path` under its cross-process lock.
    /// The file is only rewritten when `f` reports a change.
    pub fn update<T, F>(path: &Path, f: F) -> VaultResult<T>
    where
        F: FnOnce(&mut VaultIndex) -> VaultResult<(T, bool)>,
    {
        with_exclusive_lock(path, || {
            let mut index = Self::load(path)?;
            let (out, dirty) = f(&mut index)?;
            if dirty {
                index.save(path)?;
            }
            Ok(out)
        })
    }

    /// Add or refresh an entry.
    pub fn upsert(&mut self, vault_id: VaultId, authorized_at: u64) {
        match self.entries.iter_mut().find(|e| e.vault_id == vault_id) {
            Some(entry) => entry.authorized_at = authorized_at,
            None => self.entries.push(IndexEntry {
                vault_id,
                authorized_at,
            }),
        }
    }

    pub fn remove(&mut self, vault_id: &VaultId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.vault_id != vault_id);
        self.entries.len() != before
    }

    pub fn vault_ids(&self) -> Vec<VaultId> {
        self.entries.iter().map(|e| e.vault_id).collect()
    }
}
