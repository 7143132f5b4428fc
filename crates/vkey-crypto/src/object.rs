//! Content encryption for vault objects (photos, videos)
//!
//! Encrypted object format (binary):
//! ```text
//! [12 bytes: random IV][N bytes: ciphertext][16 bytes: GCM tag]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use vkey_core::{VaultError, VaultResult};

use crate::keys::MasterKey;
use crate::{IV_SIZE, TAG_SIZE};

/// Encrypt one object under the vault's MasterKey with a fresh random IV.
pub fn encrypt_object(master: &MasterKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master.as_bytes()));

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| VaultError::Other(anyhow::anyhow!("object encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt an object produced by [`encrypt_object`].
pub fn decrypt_object(master: &MasterKey, encrypted: &[u8]) -> VaultResult<Vec<u8>> {
    if encrypted.len() < IV_SIZE + TAG_SIZE {
        return Err(VaultError::Other(anyhow::anyhow!(
            "encrypted object too short: {} bytes (minimum {})",
            encrypted.len(),
            IV_SIZE + TAG_SIZE
        )));
    }

    let (iv, ciphertext) = encrypted.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master.as_bytes()));

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| VaultError::AuthenticationFailed)
}
