//! Software keystore: every device record in one JSON file.
//!
//! The file is created 0600 on unix and replaced atomically (temp file +
//! rename), so a crash mid-write leaves the previous contents intact. Every
//! access holds the advisory lock from [`crate::lockfile`], so concurrent
//! vkey processes sharing the file do not lose each other's records. This is
//! weaker than a platform keychain: anyone who can read the file as this user
//! can unwrap the vault keys in it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use vkey_core::{VaultError, VaultId, VaultResult};

use crate::lockfile::{atomic_replace, with_exclusive_lock};
use crate::record::{DeviceRecord, StoredRecord};
use crate::LocalKeyVault;

pub const DEFAULT_FILE_NAME: &str = "device-keys.json";

const FILE_VERSION: u32 = 1;

#[derive(Default, Serialize, Deserialize)]
struct KeyFile {
    version: u32,
    records: Vec<StoredRecord>,
}

/// Local key vault backed by a single JSON file.
#[derive(Debug)]
pub struct FileKeyVault {
    path: PathBuf,
    // keeps threads of this process off the file lock at the same time
    lock: Mutex<()>,
}

impl FileKeyVault {
    /// Open (without creating) the key file at `path`.
    pub fn open(path: PathBuf) -> VaultResult<Self> {
        if path.is_dir() {
            return Err(VaultError::Keystore(format!(
                "key file path is a directory: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> VaultResult<KeyFile> {
        if !self.path.exists() {
            return Ok(KeyFile {
                version: FILE_VERSION,
                records: Vec::new(),
            });
        }
        let content = std::fs::read(&self.path)?;
        let file: KeyFile = serde_json::from_slice(&content).map_err(|e| {
            VaultError::Keystore(format!("parsing {}: {e}", self.path.display()))
        })?;
        if file.version != FILE_VERSION {
            return Err(VaultError::Keystore(format!(
                "unsupported key file version {} in {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(file)
    }

    fn save(&self, file: &KeyFile) -> VaultResult<()> {
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| VaultError::Keystore(format!("serializing key file: {e}")))?;
        atomic_replace(&self.path, &json)
    }

    /// Run `f` holding both the in-process and the cross-process lock.
    fn locked<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce() -> VaultResult<T>,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| VaultError::Keystore("key file lock poisoned".into()))?;
        with_exclusive_lock(&self.path, f)
    }

    fn modify<F>(&self, f: F) -> VaultResult<()>
    where
        F: FnOnce(&mut KeyFile),
    {
        self.locked(|| {
            let mut file = self.load()?;
            f(&mut file);
            self.save(&file)
        })
    }
}

impl LocalKeyVault for FileKeyVault {
    fn put(&self, record: &DeviceRecord) -> VaultResult<()> {
        let stored = StoredRecord::from_record(record);
        self.modify(|file| {
            file.records.retain(|r| r.vault_id != stored.vault_id);
            file.records.push(stored);
        })
    }

    fn get(&self, vault_id: &VaultId) -> VaultResult<Option<DeviceRecord>> {
        let mut file = self.locked(|| self.load())?;
        match file.records.iter().position(|r| &r.vault_id == vault_id) {
            Some(idx) => file.records.swap_remove(idx).into_record().map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, vault_id: &VaultId) -> VaultResult<()> {
        self.modify(|file| file.records.retain(|r| &r.vault_id != vault_id))
    }

    fn clear_all(&self) -> VaultResult<()> {
        self.modify(|file| file.records.clear())
    }

    fn vault_ids(&self) -> VaultResult<Vec<VaultId>> {
        let file = self.locked(|| self.load())?;
        Ok(file.records.iter().map(|r| r.vault_id).collect())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkey_crypto::{generate_master_key, unwrap, wrap, DeviceWrapKey};

    fn record() -> (DeviceRecord, vkey_crypto::MasterKey) {
        let vault = VaultId::new_random();
        let master = generate_master_key().unwrap();
        let key = DeviceWrapKey::generate().unwrap();
        let wrapped = wrap(&master, &key, &vault).unwrap();
        (DeviceRecord::new(vault, key, wrapped), master)
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);
        let (rec, master) = record();

        FileKeyVault::open(path.clone()).unwrap().put(&rec).unwrap();

        let reopened = FileKeyVault::open(path).unwrap();
        let loaded = reopened.get(&rec.vault_id).unwrap().unwrap();
        let unwrapped = unwrap(&loaded.wrapped, &loaded.key, &rec.vault_id).unwrap();
        assert_eq!(unwrapped.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyVault::open(dir.path().join("none.json")).unwrap();
        assert!(store.vault_ids().unwrap().is_empty());
        assert!(store.get(&VaultId::new_random()).unwrap().is_none());
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyVault::open(dir.path().join(DEFAULT_FILE_NAME)).unwrap();
        let (a, _) = record();
        let (b, _) = record();
        store.put(&a).unwrap();
        store.put(&b).unwrap();

        store.delete(&a.vault_id).unwrap();
        assert_eq!(store.vault_ids().unwrap(), vec![b.vault_id]);

        store.clear_all().unwrap();
        assert!(store.vault_ids().unwrap().is_empty());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyVault::open(dir.path().join(DEFAULT_FILE_NAME)).unwrap();
        store.put(&record().0).unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                format!(".{DEFAULT_FILE_NAME}.lock"),
                DEFAULT_FILE_NAME.to_string()
            ]
        );
    }

    #[test]
    fn test_concurrent_handles_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = FileKeyVault::open(path).unwrap();
                    let mut ids = Vec::new();
                    for _ in 0..25 {
                        let (rec, _) = record();
                        store.put(&rec).unwrap();
                        ids.push(rec.vault_id);
                    }
                    ids
                })
            })
            .collect();
        let mut expected: Vec<VaultId> = writers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();

        let mut stored = FileKeyVault::open(path).unwrap().vault_ids().unwrap();
        expected.sort();
        stored.sort();
        assert_eq!(stored, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyVault::open(dir.path().join(DEFAULT_FILE_NAME)).unwrap();
        store.put(&record().0).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);
        std::fs::write(&path, br#"{"version": 9, "records": []}"#).unwrap();
        let store = FileKeyVault::open(path).unwrap();
        assert!(matches!(store.vault_ids(), Err(VaultError::Keystore(_))));
    }
}
