//! Origin-wide broadcast channel between tabs.
//!
//! Message kinds:
//!   REQUEST_KEY  - a tab without the key asks its siblings for it
//!   SYNC_KEY     - a tab shares an unlocked key
//!   LOCK_ALL     - every tab drops every key
//!
//! Delivery is fire-and-forget and in-process only. Keys never leave the
//! origin: there is no wire encoding for these messages.

use std::fmt;
use tokio::sync::broadcast;
use vkey_core::VaultId;
use vkey_crypto::MasterKey;

/// Identity of one tab, used to ignore its own broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(uuid::Uuid);

impl TabId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub enum KeyMessage {
    RequestKey { vault_id: VaultId },
    SyncKey { vault_id: VaultId, key: MasterKey },
    LockAll,
}

impl KeyMessage {
    /// Message kind for logs; never includes key material.
    pub fn kind(&self) -> &'static str {
        match self {
            KeyMessage::RequestKey { .. } => "REQUEST_KEY",
            KeyMessage::SyncKey { .. } => "SYNC_KEY",
            KeyMessage::LockAll => "LOCK_ALL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: TabId,
    pub message: KeyMessage,
}

/// Shared by every tab of one origin. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OriginChannel {
    tx: broadcast::Sender<Envelope>,
}

impl OriginChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Broadcast to every subscribed tab. Returns how many received it; no
    /// subscribers is not an error.
    pub fn send(&self, from: TabId, message: KeyMessage) -> usize {
        let kind = message.kind();
        match self.tx.send(Envelope { from, message }) {
            Ok(n) => {
                tracing::trace!(kind, tab = %from, receivers = n, "key message sent");
                n
            }
            Err(_) => {
                tracing::trace!(kind, tab = %from, "key message sent with no listeners");
                0
            }
        }
    }
}
