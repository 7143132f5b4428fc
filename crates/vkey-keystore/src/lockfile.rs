//! Cross-process serialization and atomic replacement of keystore files.
//!
//! Every handle on a data file, in this process or another, takes an
//! exclusive advisory lock on a sibling `.<name>.lock` file for the whole
//! read-modify-write cycle. The data file itself is never locked because it
//! is replaced by rename. Advisory locks are cooperative: only vkey handles
//! respect them.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use vkey_core::{VaultError, VaultResult};

fn lock_path(path: &Path) -> PathBuf {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!(".{name}.lock"))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Run `f` while holding the exclusive lock for `path`. The lock is released
/// when the lock file handle is dropped.
pub(crate) fn with_exclusive_lock<T, F>(path: &Path, f: F) -> VaultResult<T>
where
    F: FnOnce() -> VaultResult<T>,
{
    std::fs::create_dir_all(parent_dir(path))?;
    let lock_path = lock_path(path);
    let file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| {
            VaultError::Keystore(format!("opening lock file {}: {e}", lock_path.display()))
        })?;
    FileExt::lock_exclusive(&file).map_err(|e| {
        VaultError::Keystore(format!("locking {}: {e}", lock_path.display()))
    })?;
    f()
}

/// Write `content` to a fresh temp file beside `path` and rename it into
/// place. The temp file is created owner-only (0600 on unix) before any byte
/// is written, and its name is unique per call.
pub(crate) fn atomic_replace(path: &Path, content: &[u8]) -> VaultResult<()> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".vkey-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VaultError::Io(e.error))?;

    tracing::debug!(path = %path.display(), "keystore file written");
    Ok(())
}
