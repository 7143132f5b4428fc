//! Remote store health check

use opendal::Operator;
use vkey_core::{VaultError, VaultResult};

/// Verify the remote store is reachable by listing the root
pub async fn check_health(op: &Operator) -> VaultResult<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| match e.kind() {
            opendal::ErrorKind::PermissionDenied => VaultError::RemoteAuthRequired,
            _ => VaultError::RemoteFetchFailed(format!("remote health check failed: {e}")),
        })
}
