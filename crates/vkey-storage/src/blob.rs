//! [`RecoveryStore`] over an OpenDAL operator.
//!
//! Remote layout under the operator root:
//! ```text
//! <file_id>/<name>
//! ```
//! One directory per file id keeps equal names representable, the same way a
//! drive API returns several files for one name query.

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use vkey_core::{VaultError, VaultResult};

use crate::store::{FileId, RecoveryStore};

/// Blob store client bound to one authenticated operator.
#[derive(Debug, Clone)]
pub struct BlobStoreClient {
    op: Operator,
}

impl BlobStoreClient {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// Full path of the file stored under `id`, if it exists.
    async fn resolve(&self, id: &FileId) -> VaultResult<Option<String>> {
        let dir = format!("{id}/");
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(fetch_error(e)),
        };
        Ok(entries
            .into_iter()
            .map(|entry| entry.path().to_string())
            .find(|path| path != &dir && !path.ends_with('/')))
    }

    async fn file_ids(&self) -> VaultResult<Vec<FileId>> {
        let entries = match self.op.list("/").await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(fetch_error(e)),
        };
        let mut ids: Vec<FileId> = entries
            .iter()
            .filter_map(|entry| entry.name().trim_end_matches('/').parse().ok())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn validate_name(name: &str) -> VaultResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(VaultError::Other(anyhow::anyhow!(
            "invalid remote file name: {name:?}"
        )));
    }
    Ok(())
}

// 401/403 from the provider surface as PermissionDenied: the session
// credential is missing, expired or lacks the app-folder scope.
fn fetch_error(e: opendal::Error) -> VaultError {
    match e.kind() {
        ErrorKind::PermissionDenied => VaultError::RemoteAuthRequired,
        _ => VaultError::RemoteFetchFailed(e.to_string()),
    }
}

fn upload_error(e: opendal::Error) -> VaultError {
    match e.kind() {
        ErrorKind::PermissionDenied => VaultError::RemoteAuthRequired,
        _ => VaultError::RemoteUploadFailed(e.to_string()),
    }
}

#[async_trait]
impl RecoveryStore for BlobStoreClient {
    async fn find_all_by_name(&self, name: &str) -> VaultResult<Vec<FileId>> {
        validate_name(name)?;
        let mut found = Vec::new();
        for id in self.file_ids().await? {
            match self.op.exists(&format!("{id}/{name}")).await {
                Ok(true) => found.push(id),
                Ok(false) => {}
                Err(e) => return Err(fetch_error(e)),
            }
        }
        tracing::debug!(name, matches = found.len(), "remote name lookup");
        Ok(found)
    }

    async fn create(&self, name: &str, content: &[u8]) -> VaultResult<FileId> {
        validate_name(name)?;
        let id = FileId::new_random();
        self.op
            .write(&format!("{id}/{name}"), content.to_vec())
            .await
            .map_err(upload_error)?;
        tracing::info!(name, file_id = %id, bytes = content.len(), "remote file created");
        Ok(id)
    }

    async fn fetch_content(&self, id: &FileId) -> VaultResult<Vec<u8>> {
        let path = self
            .resolve(id)
            .await?
            .ok_or_else(|| VaultError::RemoteFetchFailed(format!("no remote file with id {id}")))?;
        let data = self.op.read(&path).await.map_err(fetch_error)?;
        Ok(data.to_vec())
    }

    async fn update(&self, id: &FileId, content: &[u8]) -> VaultResult<()> {
        let path = self.resolve(id).await?.ok_or_else(|| {
            VaultError::RemoteUploadFailed(format!("no remote file with id {id} to update"))
        })?;
        self.op
            .write(&path, content.to_vec())
            .await
            .map_err(upload_error)?;
        tracing::info!(file_id = %id, bytes = content.len(), "remote file updated");
        Ok(())
    }

    async fn delete(&self, id: &FileId) -> VaultResult<()> {
        if let Some(path) = self.resolve(id).await? {
            self.op.delete(&path).await.map_err(upload_error)?;
        }
        match self.op.delete(&format!("{id}/")).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(upload_error(e)),
        }
        tracing::info!(file_id = %id, "remote file deleted");
        Ok(())
    }

    async fn check_health(&self) -> VaultResult<()> {
        crate::health::check_health(&self.op).await
    }
}
