//! vkey-keystore: per-device local key vault
//!
//! Backend selection (config `[keystore] backend`):
//!   1. `file`     - 0600 JSON file in the data directory (software keystore, default)
//!   2. `keychain` - platform keychain via `keyring`, one entry per vault;
//!                   refused when the host keychain does not persist entries
//!   3. `memory`   - process memory; nothing survives restart
//!
//! The instant-unlock cache is separate and off unless
//! `[unlock] instant_unlock = true`.

pub mod file;
pub mod index;
pub mod keychain;
mod lockfile;
pub mod memory;
pub mod record;
pub mod unlock_cache;

pub use file::FileKeyVault;
pub use keychain::KeychainKeyVault;
pub use memory::MemoryKeyVault;
pub use record::DeviceRecord;
pub use unlock_cache::{InstantUnlockCache, KeychainUnlockCache, MemoryUnlockCache};

use std::sync::Arc;
use vkey_core::config::{expand_tilde, KeystoreBackend, VaultConfig};
use vkey_core::{VaultError, VaultId, VaultResult};

/// Device-local storage of [`DeviceRecord`]s, shared by every tab of an origin.
pub trait LocalKeyVault: Send + Sync {
    /// Insert or overwrite the record for `record.vault_id`.
    fn put(&self, record: &DeviceRecord) -> VaultResult<()>;

    fn get(&self, vault_id: &VaultId) -> VaultResult<Option<DeviceRecord>>;

    /// Remove one record. Missing records are not an error.
    fn delete(&self, vault_id: &VaultId) -> VaultResult<()>;

    fn clear_all(&self) -> VaultResult<()>;

    fn vault_ids(&self) -> VaultResult<Vec<VaultId>>;

    /// Short backend name for logs and `status` output.
    fn backend_name(&self) -> &'static str;
}

/// Open the configured local key vault.
pub fn open_keystore(config: &VaultConfig) -> VaultResult<Arc<dyn LocalKeyVault>> {
    let dir = expand_tilde(&config.keystore.path);
    let vault: Arc<dyn LocalKeyVault> = match config.keystore.backend {
        KeystoreBackend::Memory => Arc::new(MemoryKeyVault::new()),
        KeystoreBackend::File => Arc::new(FileKeyVault::open(dir.join(file::DEFAULT_FILE_NAME))?),
        KeystoreBackend::Keychain => {
            if !keychain::is_available(&config.keystore.service) {
                return Err(VaultError::Keystore(
                    "platform keychain does not persist credentials on this host; \
                     set [keystore] backend = \"file\""
                        .into(),
                ));
            }
            Arc::new(KeychainKeyVault::new(
                &config.keystore.service,
                dir.join(index::DEFAULT_INDEX_NAME),
            ))
        }
    };
    tracing::debug!(backend = vault.backend_name(), "local key vault opened");
    Ok(vault)
}

/// Open the instant-unlock cache, or `None` when it is disabled or the
/// platform keychain cannot hold it.
pub fn open_unlock_cache(config: &VaultConfig) -> Option<Arc<dyn InstantUnlockCache>> {
    if !config.unlock.instant_unlock {
        return None;
    }
    let cache: Arc<dyn InstantUnlockCache> = match config.keystore.backend {
        KeystoreBackend::Memory => Arc::new(MemoryUnlockCache::new()),
        KeystoreBackend::File | KeystoreBackend::Keychain => {
            if !keychain::is_available(&config.keystore.service) {
                tracing::warn!(
                    "instant unlock requested but the platform keychain is unavailable; disabled"
                );
                return None;
            }
            let dir = expand_tilde(&config.keystore.path);
            Arc::new(KeychainUnlockCache::new(
                &config.keystore.service,
                dir.join(unlock_cache::UNLOCK_INDEX_NAME),
            ))
        }
    };
    tracing::warn!(
        "instant unlock enabled: master keys are cached in plaintext by the OS keychain \
         and are no longer protected only by the device wrap key"
    );
    Some(cache)
}
