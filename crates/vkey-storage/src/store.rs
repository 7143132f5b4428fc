//! The recovery blob store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vkey_core::{VaultError, VaultResult};

/// Opaque identifier of one remote file, independent of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(uuid::Uuid);

impl FileId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// File-level operations on the user's private, app-scoped remote folder.
///
/// Names are not unique on the remote side. `find_by_name` refuses to guess
/// when several files share a name; `replace` is the only write path that
/// converges them back to one.
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Every file whose name is exactly `name`, in a stable order.
    async fn find_all_by_name(&self, name: &str) -> VaultResult<Vec<FileId>>;

    /// Create a new file. Existing files with the same name are untouched.
    async fn create(&self, name: &str, content: &[u8]) -> VaultResult<FileId>;

    async fn fetch_content(&self, id: &FileId) -> VaultResult<Vec<u8>>;

    /// Overwrite the content of an existing file by id.
    async fn update(&self, id: &FileId, content: &[u8]) -> VaultResult<()>;

    /// Remove a file. Deleting a missing file is not an error.
    async fn delete(&self, id: &FileId) -> VaultResult<()>;

    /// Whether the remote side answers at all.
    async fn check_health(&self) -> VaultResult<()> {
        Ok(())
    }

    /// The single file named `name`, if any.
    async fn find_by_name(&self, name: &str) -> VaultResult<Option<FileId>> {
        let mut ids = self.find_all_by_name(name).await?;
        match ids.len() {
            0 => Ok(None),
            1 => Ok(ids.pop()),
            count => Err(VaultError::DuplicateArtifact {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Write `content` as the one file named `name`.
    ///
    /// No match creates the file; one match is updated by id; several matches
    /// update the first and delete the rest.
    async fn replace(&self, name: &str, content: &[u8]) -> VaultResult<FileId> {
        let ids = self.find_all_by_name(name).await?;
        let Some((&keep, stale)) = ids.split_first() else {
            return self.create(name, content).await;
        };

        self.update(&keep, content).await?;
        if !stale.is_empty() {
            tracing::warn!(
                name,
                kept = %keep,
                removed = stale.len(),
                "repairing duplicate remote files"
            );
            for id in stale {
                self.delete(id).await?;
            }
        }
        Ok(keep)
    }
}
