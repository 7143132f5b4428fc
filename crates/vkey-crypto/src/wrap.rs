//! Wrap / unwrap a MasterKey under a device-bound key
//!
//! AES-256-GCM, one fresh 96-bit IV per call drawn from the OS CSPRNG, the
//! 128-bit tag kept apart from the ciphertext. The vault id is the associated
//! data, so a wrap produced for one vault does not verify for another.

use aes_gcm::{
    aead::{AeadInPlace, Nonce},
    Aes256Gcm, Tag,
};
use rand::{rngs::OsRng, RngCore};
use vkey_core::{VaultError, VaultId, VaultResult};
use zeroize::Zeroize;

use crate::keys::{DeviceWrapKey, MasterKey};
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Output of [`wrap`]: ciphertext, IV and authentication tag, stored separately.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub auth_tag: [u8; TAG_SIZE],
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedKey")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &self.iv)
            .finish_non_exhaustive()
    }
}

/// Encrypt `master` under `device_key`, bound to `vault_id`.
pub fn wrap(
    master: &MasterKey,
    device_key: &DeviceWrapKey,
    vault_id: &VaultId,
) -> VaultResult<WrappedKey> {
    let mut iv = [0u8; IV_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| VaultError::KeyGenerationFailed(format!("IV generation: {e}")))?;

    let mut buffer = master.as_bytes().to_vec();
    let tag = device_key
        .cipher()
        .encrypt_in_place_detached(
            Nonce::<Aes256Gcm>::from_slice(&iv),
            vault_id.as_bytes(),
            &mut buffer,
        )
        .map_err(|_| {
            buffer.zeroize();
            VaultError::Other(anyhow::anyhow!("AES-256-GCM key wrapping failed"))
        })?;

    let mut auth_tag = [0u8; TAG_SIZE];
    auth_tag.copy_from_slice(&tag);

    Ok(WrappedKey {
        ciphertext: buffer,
        iv,
        auth_tag,
    })
}

/// Decrypt and authenticate a wrapped MasterKey.
///
/// Any failure to verify, whether tampering, a different device key, or a
/// different vault, is `AuthenticationFailed`.
pub fn unwrap(
    wrapped: &WrappedKey,
    device_key: &DeviceWrapKey,
    vault_id: &VaultId,
) -> VaultResult<MasterKey> {
    if wrapped.ciphertext.len() != KEY_SIZE {
        tracing::debug!(
            len = wrapped.ciphertext.len(),
            "wrapped key has unexpected length"
        );
        return Err(VaultError::AuthenticationFailed);
    }

    let mut buffer = wrapped.ciphertext.clone();
    device_key
        .cipher()
        .decrypt_in_place_detached(
            Nonce::<Aes256Gcm>::from_slice(&wrapped.iv),
            vault_id.as_bytes(),
            &mut buffer,
            Tag::from_slice(&wrapped.auth_tag),
        )
        .map_err(|_| VaultError::AuthenticationFailed)?;

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&buffer);
    buffer.zeroize();
    let key = MasterKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}
