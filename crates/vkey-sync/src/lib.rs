//! vkey-sync: per-tab keyring and cross-tab key sync
//!
//! Every tab of an origin holds its own [`Keyring`] and subscribes to one
//! shared [`OriginChannel`]. Unlocking in one tab (SYNC_KEY) unlocks the
//! siblings; LOCK_ALL locks them all. Device records are never touched here.

pub mod channel;
pub mod keyring;
pub mod tab;

pub use channel::{Envelope, KeyMessage, OriginChannel, TabId};
pub use keyring::Keyring;
pub use tab::TabSync;
