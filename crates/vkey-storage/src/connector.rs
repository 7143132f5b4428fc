//! Session-bound access to the recovery blob store.

use std::sync::Arc;
use vkey_core::config::{RemoteBackend, RemoteConfig};
use vkey_core::{Session, VaultError, VaultResult};

use crate::blob::BlobStoreClient;
use crate::operator::{build_gdrive_operator, build_memory_operator};
use crate::store::RecoveryStore;

#[derive(Clone)]
enum Source {
    /// A fresh operator per session, authenticated with its bearer token
    Gdrive,
    /// One shared store for every session (memory backend, test doubles)
    Fixed(Arc<dyn RecoveryStore>),
}

/// Turns an authenticated [`Session`] into a [`RecoveryStore`].
#[derive(Clone)]
pub struct RemoteConnector {
    config: RemoteConfig,
    source: Source,
}

impl RemoteConnector {
    pub fn from_config(config: &RemoteConfig) -> VaultResult<Self> {
        let source = match config.backend {
            RemoteBackend::Gdrive => Source::Gdrive,
            RemoteBackend::Memory => {
                let op = build_memory_operator(config)?;
                Source::Fixed(Arc::new(BlobStoreClient::new(op)))
            }
        };
        Ok(Self {
            config: config.clone(),
            source,
        })
    }

    /// Connector that always hands out `store`.
    pub fn fixed(store: Arc<dyn RecoveryStore>) -> Self {
        Self {
            config: RemoteConfig {
                backend: RemoteBackend::Memory,
                ..Default::default()
            },
            source: Source::Fixed(store),
        }
    }

    pub fn backend(&self) -> RemoteBackend {
        self.config.backend
    }

    /// Every backend requires the session's bearer credential, so a signed-out
    /// caller gets `RemoteAuthRequired` before any network call.
    pub fn connect(&self, session: &Session) -> VaultResult<Arc<dyn RecoveryStore>> {
        let Some(token) = session.access_token() else {
            tracing::debug!(user = %session.user_id, "remote access without credential");
            return Err(VaultError::RemoteAuthRequired);
        };
        match &self.source {
            Source::Gdrive => {
                let op = build_gdrive_operator(&self.config, token)?;
                Ok(Arc::new(BlobStoreClient::new(op)))
            }
            Source::Fixed(store) => Ok(Arc::clone(store)),
        }
    }
}

impl std::fmt::Debug for RemoteConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnector")
            .field("backend", &self.config.backend)
            .field("root", &self.config.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn memory_config() -> RemoteConfig {
        RemoteConfig {
            backend: RemoteBackend::Memory,
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_requires_credential() {
        let connector = RemoteConnector::from_config(&memory_config()).unwrap();
        let err = connector.connect(&Session::anonymous("alice")).err().unwrap();
        assert!(matches!(err, VaultError::RemoteAuthRequired));
    }

    #[tokio::test]
    async fn test_memory_sessions_share_one_store() {
        let connector = RemoteConnector::from_config(&memory_config()).unwrap();
        let session = Session::anonymous("alice").with_access_token(SecretString::from("t"));

        let a = connector.connect(&session).unwrap();
        let b = connector.connect(&session).unwrap();

        let id = a.create("vault_x.key", b"data").await.unwrap();
        assert_eq!(b.fetch_content(&id).await.unwrap(), b"data");
    }

    #[test]
    fn test_gdrive_connect_builds_operator() {
        let connector = RemoteConnector::from_config(&RemoteConfig::default()).unwrap();
        assert_eq!(connector.backend(), RemoteBackend::Gdrive);
        let session = Session::anonymous("bob").with_access_token(SecretString::from("ya29.x"));
        assert!(connector.connect(&session).is_ok());
    }
}
