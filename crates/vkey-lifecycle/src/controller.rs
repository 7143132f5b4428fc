//! Per-tab vault lifecycle: create, routine unlock, new-device recovery, lock.
//!
//! State per (vault, tab):
//! ```text
//! Locked ──recover──▶ Authorizing ──upload ok──▶ Unlocked
//!   ▲                      │ any failure               │
//!   └──────────────────────┘◀──── lock / LOCK_ALL ─────┘
//! Locked ──unlock (keyring / cache / device record / sibling tab)──▶ Unlocked
//! ```
//!
//! Recovery writes the remote artifact first and persists the local device
//! record only after that write succeeds, so a failure leaves nothing local
//! to roll back.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use vkey_core::config::VaultConfig;
use vkey_core::{Session, VaultError, VaultId, VaultResult, VaultState};
use vkey_crypto::{
    artifact_name, generate_master_key, parse_recovery_secret, unwrap, wrap, DeviceWrapKey,
    MasterKey, RecoveryKit, VaultArtifact,
};
use vkey_keystore::{
    open_keystore, open_unlock_cache, DeviceRecord, InstantUnlockCache, LocalKeyVault,
};
use vkey_storage::{RecoveryStore, RemoteConnector};
use vkey_sync::{Keyring, OriginChannel, TabSync};

/// Result of [`VaultController::create`]. The kit is shown to the user once.
#[derive(Debug)]
pub struct CreatedVault {
    pub vault_id: VaultId,
    pub recovery_kit: RecoveryKit,
}

/// Where a routine unlock found the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockSource {
    /// Already held by this tab
    Keyring,
    /// Plaintext instant-unlock cache
    InstantCache,
    /// Local device record, unwrapped on this device
    DeviceRecord,
    /// Answered by a sibling tab over the origin channel
    SiblingTab,
}

/// Drives the vault lifecycle for one tab.
pub struct VaultController {
    local: Arc<dyn LocalKeyVault>,
    remote: RemoteConnector,
    keyring: Keyring,
    sync: Option<TabSync>,
    unlock_cache: Option<Arc<dyn InstantUnlockCache>>,
    authorizing: Mutex<HashSet<VaultId>>,
    request_timeout: Duration,
}

impl VaultController {
    pub fn new(local: Arc<dyn LocalKeyVault>, remote: RemoteConnector) -> Self {
        Self {
            local,
            remote,
            keyring: Keyring::new(),
            sync: None,
            unlock_cache: None,
            authorizing: Mutex::new(HashSet::new()),
            request_timeout: Duration::from_millis(250),
        }
    }

    /// Build a controller from config. With `channel`, the tab joins
    /// cross-tab key sync on that origin channel.
    pub fn from_config(config: &VaultConfig, channel: Option<&OriginChannel>) -> VaultResult<Self> {
        let local = open_keystore(config)?;
        let remote = RemoteConnector::from_config(&config.remote)?;
        let mut controller = Self::new(local, remote)
            .with_request_timeout(Duration::from_millis(config.sync.request_timeout_ms));
        if let Some(channel) = channel {
            controller = controller.with_tab_sync(channel.clone());
        }
        if let Some(cache) = open_unlock_cache(config) {
            controller = controller.with_unlock_cache(cache);
        }
        Ok(controller)
    }

    /// Join cross-tab sync. The tab's keyring becomes the one shared with the
    /// sync listener.
    pub fn with_tab_sync(mut self, channel: OriginChannel) -> Self {
        let sync = TabSync::new(channel, self.keyring.clone());
        self.sync = Some(sync);
        self
    }

    pub fn with_unlock_cache(mut self, cache: Arc<dyn InstantUnlockCache>) -> Self {
        self.unlock_cache = Some(cache);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Start applying sibling-tab messages to this tab's keyring.
    pub fn spawn_sync_listener(&self) -> Option<JoinHandle<()>> {
        self.sync.as_ref().map(TabSync::spawn_listener)
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn local_vault(&self) -> &Arc<dyn LocalKeyVault> {
        &self.local
    }

    pub async fn state(&self, vault_id: &VaultId) -> VaultState {
        let authorizing = self
            .authorizing
            .lock()
            .map(|set| set.contains(vault_id))
            .unwrap_or(false);
        if authorizing {
            VaultState::Authorizing
        } else if self.keyring.contains(vault_id).await {
            VaultState::Unlocked
        } else {
            VaultState::Locked
        }
    }

    /// Vaults this device holds a device record for.
    pub fn authorized_vaults(&self) -> VaultResult<Vec<VaultId>> {
        self.local.vault_ids()
    }

    /// Create a vault: new MasterKey, recovery artifact uploaded, this device
    /// authorized, vault unlocked in every tab.
    pub async fn create(&self, session: &Session, name: &str) -> VaultResult<CreatedVault> {
        let store = self.remote.connect(session)?;

        let vault_id = VaultId::new_random();
        let master = generate_master_key()?;
        let device_key = DeviceWrapKey::generate()?;
        let wrapped = wrap(&master, &device_key, &vault_id)?;
        let created_at = now_millis();

        let artifact = VaultArtifact::new(vault_id, &master, &wrapped, created_at);
        let file_id = store
            .replace(&artifact_name(&vault_id), &artifact.to_bytes()?)
            .await?;

        self.local
            .put(&DeviceRecord::new(vault_id, device_key, wrapped))?;
        self.admit(vault_id, master.clone()).await;

        tracing::info!(vault = %vault_id, file_id = %file_id, name, "vault created");
        Ok(CreatedVault {
            vault_id,
            recovery_kit: RecoveryKit::new(name, vault_id, &master, created_at),
        })
    }

    /// Routine unlock on an authorized device. Never touches the network.
    pub async fn unlock(&self, vault_id: &VaultId) -> VaultResult<UnlockSource> {
        if self.keyring.contains(vault_id).await {
            return Ok(UnlockSource::Keyring);
        }

        if let Some(cache) = &self.unlock_cache {
            match cache.load(vault_id) {
                Ok(Some(master)) => {
                    self.keyring.insert(*vault_id, master.clone()).await;
                    self.announce(*vault_id, master);
                    tracing::info!(vault = %vault_id, "vault unlocked from instant-unlock cache");
                    return Ok(UnlockSource::InstantCache);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(vault = %vault_id, "instant-unlock cache read failed: {e}")
                }
            }
        }

        if let Some(record) = self.local.get(vault_id)? {
            let master = unwrap(&record.wrapped, &record.key, vault_id)?;
            self.admit(*vault_id, master).await;
            tracing::info!(
                vault = %vault_id,
                key_id = %record.key.key_id(),
                "vault unlocked with device key"
            );
            return Ok(UnlockSource::DeviceRecord);
        }

        if let Some(sync) = &self.sync {
            if let Some(master) = sync.request_key(*vault_id, self.request_timeout).await {
                self.keyring.insert(*vault_id, master).await;
                tracing::info!(vault = %vault_id, "vault unlocked by sibling tab");
                return Ok(UnlockSource::SiblingTab);
            }
        }

        tracing::debug!(vault = %vault_id, "no local key material; recovery required");
        Err(VaultError::NotAuthorized(*vault_id))
    }

    /// Authorize this device for `vault_id` with the user's recovery secret.
    ///
    /// The artifact's `recoveryKey` is preserved; its device-wrapped fields are
    /// replaced with this device's wrap.
    pub async fn recover(
        &self,
        session: &Session,
        vault_id: &VaultId,
        secret: &str,
    ) -> VaultResult<()> {
        let master = parse_recovery_secret(secret)?;
        let store = self.remote.connect(session)?;

        let _authorizing = AuthorizingGuard::enter(&self.authorizing, *vault_id)?;
        tracing::info!(vault = %vault_id, "authorizing device with recovery secret");

        let name = artifact_name(vault_id);
        let existing = fetch_artifact(store.as_ref(), &name).await?;
        if let Some(artifact) = &existing {
            let on_record = artifact.recovery_master_key()?;
            if on_record.as_bytes() != master.as_bytes() {
                tracing::warn!(vault = %vault_id, "recovery secret does not match artifact");
                return Err(VaultError::RecoveryKeyMismatch);
            }
        }

        let device_key = DeviceWrapKey::generate()?;
        let wrapped = wrap(&master, &device_key, vault_id)?;
        let updated = match &existing {
            Some(artifact) => artifact.rewrapped(&wrapped),
            None => {
                tracing::warn!(
                    vault = %vault_id,
                    "no recovery artifact on remote; writing a new one"
                );
                VaultArtifact::new(*vault_id, &master, &wrapped, now_millis())
            }
        };
        store.replace(&name, &updated.to_bytes()?).await?;

        self.local
            .put(&DeviceRecord::new(*vault_id, device_key, wrapped))?;
        self.admit(*vault_id, master).await;

        tracing::info!(vault = %vault_id, "device authorized");
        Ok(())
    }

    /// Lock one vault in this tab. The device record is kept.
    pub async fn lock(&self, vault_id: &VaultId) {
        if self.keyring.remove(vault_id).await {
            tracing::info!(vault = %vault_id, "vault locked");
        }
    }

    /// Lock every vault in every tab of the origin. Device records are kept.
    pub async fn lock_all(&self) {
        let dropped = self.keyring.clear().await;
        if let Some(sync) = &self.sync {
            sync.lock_all();
        }
        tracing::info!(dropped, "all vaults locked");
    }

    /// The unlocked key for content encryption, or `Locked`.
    pub async fn master_key(&self, vault_id: &VaultId) -> VaultResult<MasterKey> {
        self.keyring
            .get(vault_id)
            .await
            .ok_or(VaultError::Locked(*vault_id))
    }

    /// Remove this device's authorization for one vault. The remote artifact
    /// is untouched; the device can be re-authorized by recovery.
    pub async fn forget(&self, vault_id: &VaultId) -> VaultResult<()> {
        self.keyring.remove(vault_id).await;
        if let Some(cache) = &self.unlock_cache {
            cache.remove(vault_id)?;
        }
        self.local.delete(vault_id)?;
        tracing::info!(vault = %vault_id, "device authorization removed");
        Ok(())
    }

    /// Sign-out: drop every device record, cached key and keyring entry.
    ///
    /// Cached keys are evicted for every vault this device holds a record
    /// for, not only for those cached through this controller.
    pub async fn reset(&self) -> VaultResult<()> {
        self.lock_all().await;
        if let Some(cache) = &self.unlock_cache {
            for vault_id in self.local.vault_ids()? {
                cache.remove(&vault_id)?;
            }
            cache.clear()?;
        }
        self.local.clear_all()?;
        tracing::info!(backend = self.local.backend_name(), "local key vault reset");
        Ok(())
    }

    /// Fetch and decode the remote artifact of `vault_id`.
    pub async fn artifact(
        &self,
        session: &Session,
        vault_id: &VaultId,
    ) -> VaultResult<VaultArtifact> {
        let store = self.remote.connect(session)?;
        let Some(file_id) = store.find_by_name(&artifact_name(vault_id)).await? else {
            return Err(VaultError::ArtifactNotFound(*vault_id));
        };
        VaultArtifact::from_bytes(&store.fetch_content(&file_id).await?)
    }

    /// Probe the remote store with the session's credential.
    pub async fn remote_health(&self, session: &Session) -> VaultResult<()> {
        self.remote.connect(session)?.check_health().await
    }

    /// Hold `master` in this tab, share it with siblings and, when enabled,
    /// cache it for instant unlock.
    async fn admit(&self, vault_id: VaultId, master: MasterKey) {
        if let Some(cache) = &self.unlock_cache {
            if let Err(e) = cache.store(&vault_id, &master) {
                tracing::warn!(vault = %vault_id, "instant-unlock cache write failed: {e}");
            }
        }
        self.keyring.insert(vault_id, master.clone()).await;
        self.announce(vault_id, master);
    }

    fn announce(&self, vault_id: VaultId, master: MasterKey) {
        if let Some(sync) = &self.sync {
            sync.announce(vault_id, master);
        }
    }
}

impl std::fmt::Debug for VaultController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultController")
            .field("local", &self.local.backend_name())
            .field("remote", &self.remote)
            .field("tab", &self.sync.as_ref().map(TabSync::tab_id))
            .field("instant_unlock", &self.unlock_cache.is_some())
            .finish()
    }
}

/// The artifact named `name`, if any. With duplicates present, the one
/// `replace` would keep is read.
async fn fetch_artifact(
    store: &dyn RecoveryStore,
    name: &str,
) -> VaultResult<Option<VaultArtifact>> {
    let ids = store.find_all_by_name(name).await?;
    let Some(first) = ids.first() else {
        return Ok(None);
    };
    if ids.len() > 1 {
        tracing::warn!(name, count = ids.len(), "duplicate recovery artifacts; reading the first");
    }
    let bytes = store.fetch_content(first).await?;
    VaultArtifact::from_bytes(&bytes).map(Some)
}

/// Marks a vault `Authorizing` for the lifetime of the guard.
struct AuthorizingGuard<'a> {
    set: &'a Mutex<HashSet<VaultId>>,
    vault_id: VaultId,
}

impl<'a> AuthorizingGuard<'a> {
    fn enter(set: &'a Mutex<HashSet<VaultId>>, vault_id: VaultId) -> VaultResult<Self> {
        set.lock()
            .map_err(|_| VaultError::Other(anyhow::anyhow!("authorizing set lock poisoned")))?
            .insert(vault_id);
        Ok(Self { set, vault_id })
    }
}

impl Drop for AuthorizingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.vault_id);
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
