//! Key material: the vault MasterKey and the device-bound wrap key handle

use aes_gcm::{Aes256Gcm, Key, KeyInit};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use vkey_core::{VaultError, VaultResult};
use zeroize::{Zeroize, Zeroizing};

use crate::KEY_SIZE;

/// The 256-bit content-encryption key of one vault.
///
/// Zeroized on drop. `Debug` never prints the bytes.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh MasterKey from the OS CSPRNG.
pub fn generate_master_key() -> VaultResult<MasterKey> {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| VaultError::KeyGenerationFailed(format!("OS random source: {e}")))?;
    let key = MasterKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

struct DeviceKeyInner {
    key_id: uuid::Uuid,
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

/// Handle to a device-bound AES-256-GCM wrap key.
///
/// The handle can wrap and unwrap a [`MasterKey`] but has no accessor for its
/// raw bytes. Clones share the same key. Keystore backends that must persist
/// the key build with the `keystore` feature, which adds a sealed
/// export/import pair returning [`secrecy::SecretString`].
#[derive(Clone)]
pub struct DeviceWrapKey {
    inner: Arc<DeviceKeyInner>,
}

impl DeviceWrapKey {
    /// Generate a new non-extractable wrap key.
    pub fn generate() -> VaultResult<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut *bytes)
            .map_err(|e| VaultError::KeyGenerationFailed(format!("OS random source: {e}")))?;
        Ok(Self {
            inner: Arc::new(DeviceKeyInner {
                key_id: uuid::Uuid::new_v4(),
                bytes,
            }),
        })
    }

    /// Stable, non-secret identifier of this key (for logs and records).
    pub fn key_id(&self) -> uuid::Uuid {
        self.inner.key_id
    }

    pub(crate) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.inner.bytes))
    }

    /// Export the key for a keystore backend. The caller is responsible for
    /// handing the secret only to the backing store.
    #[cfg(feature = "keystore")]
    pub fn export_for_keystore(&self) -> secrecy::SecretString {
        use base64::{engine::general_purpose::STANDARD as B64, Engine};
        secrecy::SecretString::from(B64.encode(&*self.inner.bytes))
    }

    /// Rebuild a handle from a keystore export.
    #[cfg(feature = "keystore")]
    pub fn import_from_keystore(
        key_id: uuid::Uuid,
        secret: &secrecy::SecretString,
    ) -> VaultResult<Self> {
        use base64::{engine::general_purpose::STANDARD as B64, Engine};
        use secrecy::ExposeSecret;

        let mut decoded = B64
            .decode(secret.expose_secret())
            .map_err(|_| {
                VaultError::Keystore(format!("stored device key {key_id} is not base64"))
            })?;
        if decoded.len() != KEY_SIZE {
            decoded.zeroize();
            return Err(VaultError::Keystore(format!(
                "stored device key {key_id} has wrong size"
            )));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self {
            inner: Arc::new(DeviceKeyInner { key_id, bytes }),
        })
    }
}

impl PartialEq for DeviceWrapKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key_id == other.inner.key_id
    }
}

impl std::fmt::Debug for DeviceWrapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWrapKey")
            .field("key_id", &self.inner.key_id)
            .field("bytes", &"[NON-EXTRACTABLE]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_generation() {
        let k1 = generate_master_key().unwrap();
        let k2 = generate_master_key().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
        assert_ne!(k1.as_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn test_master_key_debug_redacted() {
        let key = MasterKey::from_bytes([7u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('7'));
    }

    #[test]
    fn test_device_keys_are_distinct() {
        let a = DeviceWrapKey::generate().unwrap();
        let b = DeviceWrapKey::generate().unwrap();
        assert_ne!(a.key_id(), b.key_id());
        assert_ne!(a, b);
        assert_eq!(a.clone(), a, "clones share the same key");
    }

    #[test]
    fn test_device_key_debug_hides_material() {
        let key = DeviceWrapKey::generate().unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("NON-EXTRACTABLE"));
        assert!(dbg.contains(&key.key_id().to_string()));
    }

    #[cfg(feature = "keystore")]
    #[test]
    fn test_keystore_export_import() {
        let key = DeviceWrapKey::generate().unwrap();
        let exported = key.export_for_keystore();
        let imported = DeviceWrapKey::import_from_keystore(key.key_id(), &exported).unwrap();

        let master = generate_master_key().unwrap();
        let vault = vkey_core::VaultId::new_random();
        let wrapped = crate::wrap(&master, &key, &vault).unwrap();
        let unwrapped = crate::unwrap(&wrapped, &imported, &vault).unwrap();
        assert_eq!(unwrapped.as_bytes(), master.as_bytes());
    }

    #[cfg(feature = "keystore")]
    #[test]
    fn test_keystore_import_rejects_bad_length() {
        let short = secrecy::SecretString::from("AAAA");
        let result = DeviceWrapKey::import_from_keystore(uuid::Uuid::new_v4(), &short);
        assert!(matches!(result, Err(VaultError::Keystore(_))));
    }
}
