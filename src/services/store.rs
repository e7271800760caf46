//! File/blob store collaborator: raw-text artifacts and counter state.
//!
//! The pipeline persists two kinds of state through this trait: the
//! recovered raw text of every document (an audit side-channel) and the
//! tender counter (the one piece of shared mutable state in the system).
//! Writes are atomic — a reader never observes a partial write — and the
//! lock operations give the counter its cross-process mutual exclusion.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Keyed byte storage with atomic writes and advisory locks.
///
/// `read` returns `Ok(None)` for a missing key — "not found" is a normal
/// outcome, not an error. `write` must be atomic: either the full new
/// content is visible or the old content is, never a torn mixture.
/// `try_lock`/`unlock` implement advisory mutual exclusion per key; a
/// `try_lock` returning `false` means another holder has it.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    async fn try_lock(&self, key: &str) -> io::Result<bool>;
    async fn unlock(&self, key: &str) -> io::Result<()>;
}

// ── Filesystem implementation ────────────────────────────────────────────

/// Directory-backed store. Keys map to paths under the root; writes go
/// through a temp file in the same directory followed by a rename, and
/// locks are `O_EXCL` lock files next to the locked key.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may carry a directory component ("raw_text/foo.txt");
        // anything escaping the root is flattened.
        let sanitized: PathBuf = Path::new(key)
            .components()
            .filter(|c| matches!(c, std::path::Component::Normal(_)))
            .collect();
        self.root.join(sanitized)
    }

    fn lock_path_for(&self, key: &str) -> PathBuf {
        let mut p = self.path_for(key).into_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: temp file in the target directory, then rename.
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let bytes = bytes.to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let tmp = tempfile::NamedTempFile::new_in(&parent)?;
            std::fs::write(tmp.path(), &bytes)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| io::Error::other(format!("store write task panicked: {e}")))??;

        debug!("Wrote artifact: {}", path.display());
        Ok(())
    }

    async fn try_lock(&self, key: &str) -> io::Result<bool> {
        let lock = self.lock_path_for(key);
        if let Some(parent) = lock.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // create_new fails with AlreadyExists while another holder lives,
        // across both threads and processes.
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn unlock(&self, key: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.lock_path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ── In-memory implementation ─────────────────────────────────────────────

/// In-process store used by tests and by callers that do not need
/// persistence across runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<String, Vec<u8>>,
    locks: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.blobs.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn try_lock(&self, key: &str) -> io::Result<bool> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.locks.insert(key.to_string()))
    }

    async fn unlock(&self, key: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.locks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert_eq!(store.read("nope.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fs_store_roundtrip_with_subdir_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write("raw_text/doc_raw.txt", b"hello").await.unwrap();
        let got = store.read("raw_text/doc_raw.txt").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn fs_store_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.try_lock("counter").await.unwrap());
        assert!(!store.try_lock("counter").await.unwrap());
        store.unlock("counter").await.unwrap();
        assert!(store.try_lock("counter").await.unwrap());
        store.unlock("counter").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_key_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write("../zz_escape_check.txt", b"x").await.unwrap();
        assert!(dir.path().join("zz_escape_check.txt").exists());
        assert!(!dir.path().parent().unwrap().join("zz_escape_check.txt").exists());
    }

    #[tokio::test]
    async fn memory_store_lock_semantics() {
        let store = MemoryStore::new();
        assert!(store.try_lock("k").await.unwrap());
        assert!(!store.try_lock("k").await.unwrap());
        store.unlock("k").await.unwrap();
        assert!(store.try_lock("k").await.unwrap());
    }
}
