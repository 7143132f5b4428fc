//! Recovery secret and the offline recovery kit
//!
//! The recovery secret is the MasterKey itself, standard base64. It is shown
//! once at vault creation as a downloadable kit; the user keeps it offline and
//! types or pastes it on a new device.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use vkey_core::{VaultError, VaultId, VaultResult};
use zeroize::Zeroize;

use crate::keys::MasterKey;
use crate::KEY_SIZE;

/// Encode a MasterKey as a recovery secret.
pub fn encode_recovery_secret(master: &MasterKey) -> String {
    B64.encode(master.as_bytes())
}

/// Validate and decode a user-supplied recovery secret.
///
/// Surrounding whitespace is ignored. Anything that is not standard base64 of
/// exactly 32 bytes is `InvalidRecoveryFormat`; the message never echoes the
/// input.
pub fn parse_recovery_secret(input: &str) -> VaultResult<MasterKey> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidRecoveryFormat(
            "recovery secret is empty".into(),
        ));
    }

    let mut decoded = B64
        .decode(trimmed)
        .map_err(|_| VaultError::InvalidRecoveryFormat("not valid base64".into()))?;

    if decoded.len() != KEY_SIZE {
        let len = decoded.len();
        decoded.zeroize();
        return Err(VaultError::InvalidRecoveryFormat(format!(
            "decodes to {len} bytes (expected {KEY_SIZE})"
        )));
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&decoded);
    decoded.zeroize();
    let key = MasterKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// Label of the line preceding the secret in a rendered kit.
const KIT_SECRET_LABEL: &str = "Recovery key:";

/// Pick the recovery secret out of text the user supplied: a whole rendered
/// kit, a `Recovery key: <secret>` line, or the bare secret.
///
/// Text without the kit label is returned trimmed, for
/// [`parse_recovery_secret`] to validate.
pub fn secret_from_kit(text: &str) -> &str {
    let mut lines = text.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix(KIT_SECRET_LABEL) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return rest;
            }
            return lines.find(|l| !l.is_empty()).unwrap_or("");
        }
    }
    text.trim()
}

/// The human-downloadable recovery kit produced at vault creation.
pub struct RecoveryKit {
    pub vault_name: String,
    pub vault_id: VaultId,
    pub recovery_secret: String,
    pub created_at: u64,
}

impl RecoveryKit {
    pub fn new(vault_name: &str, vault_id: VaultId, master: &MasterKey, created_at: u64) -> Self {
        Self {
            vault_name: vault_name.to_string(),
            vault_id,
            recovery_secret: encode_recovery_secret(master),
            created_at,
        }
    }

    /// Suggested file name for the download.
    pub fn file_name(&self) -> String {
        let slug: String = self
            .vault_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            format!("vkey-recovery-{}.txt", self.vault_id)
        } else {
            format!("vkey-recovery-{slug}.txt")
        }
    }

    /// Plaintext body of the kit.
    pub fn render(&self) -> String {
        format!(
            "VAULT RECOVERY KIT\n\
             ==================\n\
             \n\
             Vault:        {name}\n\
             Vault ID:     {id}\n\
             Created (ms): {created}\n\
             \n\
             {label}\n\
             {secret}\n\
             \n\
             Anyone holding this key can decrypt the vault. Store it offline.\n\
             You need it to open the vault on a device that has never opened it.\n",
            name = self.vault_name,
            id = self.vault_id,
            created = self.created_at,
            label = KIT_SECRET_LABEL,
            secret = self.recovery_secret,
        )
    }
}

impl Drop for RecoveryKit {
    fn drop(&mut self) {
        self.recovery_secret.zeroize();
    }
}

impl std::fmt::Debug for RecoveryKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryKit")
            .field("vault_name", &self.vault_name)
            .field("vault_id", &self.vault_id)
            .field("recovery_secret", &"[REDACTED]")
            .finish()
    }
}
