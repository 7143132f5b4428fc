//! One tab's participation in cross-tab key sync.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use vkey_core::VaultId;
use vkey_crypto::MasterKey;

use crate::channel::{Envelope, KeyMessage, OriginChannel, TabId};
use crate::keyring::Keyring;

/// Binds a tab's [`Keyring`] to the origin channel.
#[derive(Debug, Clone)]
pub struct TabSync {
    tab_id: TabId,
    channel: OriginChannel,
    keyring: Keyring,
    // receivers held by this tab's own listener tasks
    listeners: Arc<AtomicUsize>,
}

/// Counts a running listener; dropped when the task ends or is aborted.
struct ListenerGuard(Arc<AtomicUsize>);

impl ListenerGuard {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TabSync {
    pub fn new(channel: OriginChannel, keyring: Keyring) -> Self {
        Self {
            tab_id: TabId::new_random(),
            channel,
            keyring,
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// Share an unlocked key with sibling tabs (SYNC_KEY).
    pub fn announce(&self, vault_id: VaultId, key: MasterKey) {
        self.channel
            .send(self.tab_id, KeyMessage::SyncKey { vault_id, key });
    }

    /// Tell every sibling tab to drop all keys (LOCK_ALL).
    pub fn lock_all(&self) {
        self.channel.send(self.tab_id, KeyMessage::LockAll);
    }

    /// Ask sibling tabs for `vault_id`'s key and wait up to `timeout` for a
    /// SYNC_KEY answer.
    pub async fn request_key(&self, vault_id: VaultId, timeout: Duration) -> Option<MasterKey> {
        // subscribe before asking so the answer cannot be missed
        let mut rx = self.channel.subscribe();
        let own = 1 + self.listeners.load(Ordering::SeqCst);
        if self
            .channel
            .send(self.tab_id, KeyMessage::RequestKey { vault_id })
            <= own
        {
            tracing::debug!(vault = %vault_id, "no sibling tabs to ask");
            return None;
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(Envelope {
                        from,
                        message: KeyMessage::SyncKey { vault_id: v, key },
                    }) if from != self.tab_id && v == vault_id => return Some(key),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "key request receiver lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(found) => found,
            Err(_) => {
                tracing::debug!(vault = %vault_id, ?timeout, "no sibling tab answered key request");
                None
            }
        }
    }

    /// Apply one message from another tab to this tab's keyring.
    pub async fn handle(&self, envelope: Envelope) {
        if envelope.from == self.tab_id {
            return;
        }
        match envelope.message {
            KeyMessage::RequestKey { vault_id } => {
                if let Some(key) = self.keyring.get(&vault_id).await {
                    tracing::debug!(
                        vault = %vault_id,
                        to = %envelope.from,
                        "answering key request"
                    );
                    self.announce(vault_id, key);
                }
            }
            KeyMessage::SyncKey { vault_id, key } => {
                if self.keyring.insert(vault_id, key).await {
                    tracing::info!(
                        vault = %vault_id,
                        from = %envelope.from,
                        "vault unlocked by sibling tab"
                    );
                }
            }
            KeyMessage::LockAll => {
                let dropped = self.keyring.clear().await;
                tracing::info!(from = %envelope.from, dropped, "all vaults locked by sibling tab");
            }
        }
    }

    /// Spawn the message loop for this tab. The task holds a channel handle,
    /// so it runs until aborted.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let mut rx = self.channel.subscribe();
        let guard = ListenerGuard::enter(&self.listeners);
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            loop {
                match rx.recv().await {
                    Ok(envelope) => this.handle(envelope).await,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(tab = %this.tab_id, missed = n, "key sync listener lagged");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!(
                            tab = %this.tab_id,
                            "origin channel closed, key sync listener exiting"
                        );
                        return;
                    }
                }
            }
        })
    }
}
