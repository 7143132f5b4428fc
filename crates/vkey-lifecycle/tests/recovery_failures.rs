//! Integration test: recovery and creation failure paths leave no trace.

use async_trait::async_trait;
use base64::Engine as _;
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vkey_core::{Session, VaultError, VaultId, VaultResult, VaultState};
use vkey_crypto::{artifact_name, encode_recovery_secret, generate_master_key};
use vkey_keystore::{LocalKeyVault, MemoryKeyVault};
use vkey_lifecycle::VaultController;
use vkey_storage::{BlobStoreClient, FileId, RecoveryStore, RemoteConnector};

/// Reads pass through; writes fail while `fail_writes` is set.
struct FlakyStore {
    inner: BlobStoreClient,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        let op = opendal::Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        Self {
            inner: BlobStoreClient::new(op),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn check_write(&self) -> VaultResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::RemoteUploadFailed("simulated 503".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecoveryStore for FlakyStore {
    async fn find_all_by_name(&self, name: &str) -> VaultResult<Vec<FileId>> {
        self.inner.find_all_by_name(name).await
    }

    async fn create(&self, name: &str, content: &[u8]) -> VaultResult<FileId> {
        self.check_write()?;
        self.inner.create(name, content).await
    }

    async fn fetch_content(&self, id: &FileId) -> VaultResult<Vec<u8>> {
        self.inner.fetch_content(id).await
    }

    async fn update(&self, id: &FileId, content: &[u8]) -> VaultResult<()> {
        self.check_write()?;
        self.inner.update(id, content).await
    }

    async fn delete(&self, id: &FileId) -> VaultResult<()> {
        self.check_write()?;
        self.inner.delete(id).await
    }
}

struct Device {
    controller: VaultController,
    local: Arc<dyn LocalKeyVault>,
}

fn device(store: &Arc<FlakyStore>) -> Device {
    let local: Arc<dyn LocalKeyVault> = Arc::new(MemoryKeyVault::new());
    Device {
        controller: VaultController::new(local.clone(), RemoteConnector::fixed(store.clone())),
        local,
    }
}

fn session() -> Session {
    Session::anonymous("bob").with_access_token(SecretString::from("token"))
}

async fn artifact_bytes(store: &FlakyStore, vault: &VaultId) -> Vec<u8> {
    let id = store
        .find_by_name(&artifact_name(vault))
        .await
        .unwrap()
        .unwrap();
    store.fetch_content(&id).await.unwrap()
}

#[tokio::test]
async fn invalid_recovery_secret_touches_nothing() {
    let store = Arc::new(FlakyStore::new());
    let a = device(&store);
    let b = device(&store);
    let vault = a.controller.create(&session(), "Album").await.unwrap().vault_id;
    let before = artifact_bytes(&store, &vault).await;

    let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
    for bad in ["", "   ", "not base64!!", short.as_str()] {
        let err = b.controller.recover(&session(), &vault, bad).await.unwrap_err();
        assert!(
            matches!(err, VaultError::InvalidRecoveryFormat(_)),
            "{bad:?} gave {err:?}"
        );
    }

    assert_eq!(b.controller.state(&vault).await, VaultState::Locked);
    assert!(b.local.vault_ids().unwrap().is_empty());
    assert_eq!(artifact_bytes(&store, &vault).await, before);
}

#[tokio::test]
async fn wrong_recovery_secret_is_rejected() {
    let store = Arc::new(FlakyStore::new());
    let a = device(&store);
    let b = device(&store);
    let vault = a.controller.create(&session(), "Album").await.unwrap().vault_id;
    let before = artifact_bytes(&store, &vault).await;

    let other = encode_recovery_secret(&generate_master_key().unwrap());
    let err = b.controller.recover(&session(), &vault, &other).await.unwrap_err();

    assert!(matches!(err, VaultError::RecoveryKeyMismatch));
    assert!(b.local.get(&vault).unwrap().is_none());
    assert_eq!(b.controller.state(&vault).await, VaultState::Locked);
    assert_eq!(artifact_bytes(&store, &vault).await, before);
}

#[tokio::test]
async fn failed_upload_during_recovery_leaves_no_record() {
    let store = Arc::new(FlakyStore::new());
    let a = device(&store);
    let b = device(&store);
    let created = a.controller.create(&session(), "Album").await.unwrap();
    let vault = created.vault_id;
    let before = artifact_bytes(&store, &vault).await;

    store.fail_writes.store(true, Ordering::SeqCst);
    let err = b
        .controller
        .recover(&session(), &vault, &created.recovery_kit.recovery_secret)
        .await
        .unwrap_err();

    assert!(matches!(err, VaultError::RemoteUploadFailed(_)));
    assert!(b.local.get(&vault).unwrap().is_none());
    assert_eq!(b.controller.state(&vault).await, VaultState::Locked);
    assert_eq!(artifact_bytes(&store, &vault).await, before);

    // the user retries once the remote is back
    store.fail_writes.store(false, Ordering::SeqCst);
    b.controller
        .recover(&session(), &vault, &created.recovery_kit.recovery_secret)
        .await
        .unwrap();
    assert!(b.local.get(&vault).unwrap().is_some());
}

#[tokio::test]
async fn failed_upload_during_create_leaves_no_record() {
    let store = Arc::new(FlakyStore::new());
    let a = device(&store);
    store.fail_writes.store(true, Ordering::SeqCst);

    let err = a.controller.create(&session(), "Album").await.unwrap_err();

    assert!(matches!(err, VaultError::RemoteUploadFailed(_)));
    assert!(a.local.vault_ids().unwrap().is_empty());
    assert!(a.controller.keyring().is_empty().await);
}

#[tokio::test]
async fn duplicate_artifacts_detected_and_repaired() {
    let store = Arc::new(FlakyStore::new());
    let a = device(&store);
    let b = device(&store);
    let created = a.controller.create(&session(), "Album").await.unwrap();
    let vault = created.vault_id;
    let name = artifact_name(&vault);

    // a racing device created a second file under the same name
    let copy = artifact_bytes(&store, &vault).await;
    store.inner.create(&name, &copy).await.unwrap();
    assert!(matches!(
        a.controller.artifact(&session(), &vault).await,
        Err(VaultError::DuplicateArtifact { count: 2, .. })
    ));

    b.controller
        .recover(&session(), &vault, &created.recovery_kit.recovery_secret)
        .await
        .unwrap();

    assert_eq!(store.find_all_by_name(&name).await.unwrap().len(), 1);
    let artifact = a.controller.artifact(&session(), &vault).await.unwrap();
    assert_eq!(artifact.recovery_key, created.recovery_kit.recovery_secret);
}

#[tokio::test]
async fn recovery_without_remote_artifact_writes_one() {
    let store = Arc::new(FlakyStore::new());
    let b = device(&store);
    let master = generate_master_key().unwrap();
    let secret = encode_recovery_secret(&master);
    let vault = VaultId::new_random();

    b.controller.recover(&session(), &vault, &secret).await.unwrap();

    let artifact = b.controller.artifact(&session(), &vault).await.unwrap();
    assert_eq!(artifact.recovery_key, secret);
    assert_eq!(artifact.master_key_id, vault);
}
