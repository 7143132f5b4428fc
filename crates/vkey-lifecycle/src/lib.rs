//! vkey-lifecycle: the vault lifecycle controller
//!
//! Ties together the wrap engine (vkey-crypto), the local key vault
//! (vkey-keystore), the remote recovery store (vkey-storage) and cross-tab
//! sync (vkey-sync). Content consumers only need
//! [`VaultController::master_key`].

pub mod controller;

pub use controller::{CreatedVault, UnlockSource, VaultController};
