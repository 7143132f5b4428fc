//! vkey-crypto: wrap/unwrap engine for vaultkey
//!
//! Key hierarchy:
//! ```text
//! MasterKey (256-bit random, one per vault, never rotated)
//!   ├── Content AEAD: AES-256-GCM (key=master, iv=random 96-bit per object)
//!   ├── Device wrap: AES-256-GCM (key=DeviceWrapKey, iv=random 96-bit, AAD=vault id)
//!   │   └── one DeviceWrapKey per (device, vault), non-extractable handle
//!   └── Recovery path: base64(MasterKey) in the remote artifact + offline kit
//! ```

pub mod artifact;
pub mod keys;
pub mod object;
pub mod recovery;
pub mod wrap;

pub use artifact::{artifact_name, VaultArtifact, ARTIFACT_VERSION};
pub use keys::{generate_master_key, DeviceWrapKey, MasterKey};
pub use object::{decrypt_object, encrypt_object};
pub use recovery::{encode_recovery_secret, parse_recovery_secret, secret_from_kit, RecoveryKit};
pub use wrap::{unwrap, wrap, WrappedKey};

/// Size of a master key and of a device wrap key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag (128-bit)
pub const TAG_SIZE: usize = 16;
