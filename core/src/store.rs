//! Locked, atomic persistence of a single project document.
//!
//! Readers take a shared lock on a sentinel file next to the document; writers
//! take an exclusive one. The document itself is never locked, because the
//! atomic rename replaces its inode on every save.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LockConfig;
use crate::error::Result;
use crate::error::TeamError;
use crate::lock::FileLock;
use crate::lock::Lock;
use crate::lock::LockGuard;
use crate::lock::LockMode;
use crate::validation;

/// On-disk locations for one project inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    data_dir: PathBuf,
    project: String,
}

impl ProjectPaths {
    /// Rejects names that would escape `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, project: &str) -> Result<Self> {
        validation::project_name(project)?;
        Ok(Self {
            data_dir: data_dir.into(),
            project: project.to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn document(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.project))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join(format!(".{}.lock", self.project))
    }
}

/// Write `bytes` to `path` so that readers see either the old or the new
/// content, never a prefix of it.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| TeamError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| TeamError::io(dir, e))?;

    tmp.write_all(bytes).map_err(|e| TeamError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| TeamError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| TeamError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| TeamError::io(path, e.error))?;

    sync_dir(dir);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(path = %dir.display(), error = %err, "dir_sync_failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
        Err(err) => Err(TeamError::io(path, err)),
    }
}

fn parse<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| TeamError::corrupt(path, e))
}

pub struct DocumentStore {
    paths: ProjectPaths,
    lock: Arc<dyn Lock>,
    timeout: Duration,
}

impl DocumentStore {
    /// File-backed store using the project's lock sentinel.
    pub fn new(paths: ProjectPaths, config: &LockConfig) -> Self {
        let lock = FileLock::new(paths.lock_file()).with_backoff(config.backoff());
        Self {
            paths,
            lock: Arc::new(lock),
            timeout: config.timeout(),
        }
    }

    /// Store with a caller-supplied lock, e.g. [`crate::lock::MemoryLock`].
    pub fn with_lock(paths: ProjectPaths, lock: Arc<dyn Lock>, timeout: Duration) -> Self {
        Self {
            paths,
            lock,
            timeout,
        }
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn document_path(&self) -> PathBuf {
        self.paths.document()
    }

    pub fn exists(&self) -> bool {
        self.paths.document().is_file()
    }

    fn acquire(&self, mode: LockMode) -> Result<LockGuard> {
        self.lock.acquire(mode, self.timeout)
    }

    /// Raw document bytes under a shared lock.
    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        let guard = self.acquire(LockMode::Shared)?;
        let path = self.paths.document();
        let bytes = read_optional(&path)?;
        guard.release()?;
        bytes.ok_or_else(|| self.not_found())
    }

    pub fn load<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.paths.document();
        let bytes = self.load_bytes()?;
        parse(&path, &bytes)
    }

    pub fn save<T: Serialize>(&self, document: &T) -> Result<()> {
        self.transaction(|txn| txn.write(document))
    }

    /// Run `f` while holding the exclusive lock. Reads and writes inside the
    /// closure see no interleaved writers.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<R>) -> Result<R> {
        let guard = self.acquire(LockMode::Exclusive)?;
        let mut txn = WriteTxn { store: self };
        let out = f(&mut txn);
        guard.release()?;
        out
    }

    fn not_found(&self) -> TeamError {
        TeamError::NotFound(format!(
            "project '{}' ({})",
            self.paths.project(),
            self.paths.document().display()
        ))
    }
}

/// Handle to the document while the exclusive lock is held.
pub struct WriteTxn<'a> {
    store: &'a DocumentStore,
}

impl WriteTxn<'_> {
    pub fn path(&self) -> PathBuf {
        self.store.paths.document()
    }

    pub fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        read_optional(&self.path())
    }

    pub fn read<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let path = self.path();
        self.read_bytes()?
            .map(|bytes| parse(&path, &bytes))
            .transpose()
    }

    /// Like [`WriteTxn::read`] but a missing document is `NotFound`.
    pub fn read_existing<T: DeserializeOwned>(&self) -> Result<T> {
        self.read()?.ok_or_else(|| self.store.not_found())
    }

    pub fn write<T: Serialize>(&mut self, document: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        self.write_bytes(&bytes)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let path = self.path();
        atomic_write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "document_saved");
        Ok(())
    }

    /// Remove the document, leaving the lock sentinel in place.
    pub fn remove(&mut self) -> Result<bool> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(false),
            Err(err) => Err(TeamError::io(&path, err)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lock::MemoryLock;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        value: u64,
    }

    fn store(dir: &TempDir) -> DocumentStore {
        let paths = ProjectPaths::new(dir.path(), "demo").unwrap();
        let config = LockConfig {
            timeout_secs: 1,
            ..LockConfig::default()
        };
        DocumentStore::new(paths, &config)
    }

    #[test]
    fn paths_reject_traversal() {
        assert!(ProjectPaths::new("/tmp", "../escape").is_err());
        let paths = ProjectPaths::new("/data", "demo").unwrap();
        assert_eq!(paths.document(), PathBuf::from("/data/demo.json"));
        assert_eq!(paths.lock_file(), PathBuf::from("/data/.demo.lock"));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = Doc {
            name: "a".into(),
            value: 7,
        };
        store.save(&doc).unwrap();
        assert_eq!(store.load::<Doc>().unwrap(), doc);
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).load::<Doc>().unwrap_err();
        assert!(matches!(err, TeamError::NotFound(_)), "{err:?}");
    }

    #[test]
    fn unparsable_document_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.document_path(), b"{\"name\": ").unwrap();
        let err = store.load::<Doc>().unwrap_err();
        assert!(matches!(err, TeamError::CorruptDocument { .. }), "{err:?}");
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for value in 0..5 {
            store
                .save(&Doc {
                    name: "a".into(),
                    value,
                })
                .unwrap();
        }
        let stray: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn writer_blocks_second_writer_until_timeout() {
        let dir = TempDir::new().unwrap();
        let holder = store(&dir);
        let paths = ProjectPaths::new(dir.path(), "demo").unwrap();
        let contender = DocumentStore::new(
            paths,
            &LockConfig {
                timeout_secs: 0,
                ..LockConfig::default()
            },
        );

        holder
            .transaction(|_txn| {
                let err = contender.save(&Doc {
                    name: "b".into(),
                    value: 1,
                });
                assert!(matches!(err, Err(TeamError::LockTimeout { .. })));
                Ok(())
            })
            .unwrap();
        assert!(!holder.exists());
    }

    #[test]
    fn failed_transaction_keeps_prior_document() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = Doc {
            name: "a".into(),
            value: 1,
        };
        store.save(&doc).unwrap();

        let result: Result<()> = store.transaction(|txn| {
            let mut current: Doc = txn.read_existing()?;
            current.value += 1;
            Err(TeamError::validation("value", "rejected"))
        });
        assert!(result.is_err());
        assert_eq!(store.load::<Doc>().unwrap(), doc);
    }

    #[test]
    fn remove_keeps_lock_sentinel() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save(&Doc {
                name: "a".into(),
                value: 1,
            })
            .unwrap();
        let removed = store.transaction(|txn| txn.remove()).unwrap();
        assert!(removed);
        assert!(!store.exists());
        assert!(store.paths().lock_file().exists());
    }

    #[test]
    fn memory_lock_backed_store() {
        let dir = TempDir::new().unwrap();
        let paths = ProjectPaths::new(dir.path(), "mem").unwrap();
        let store = DocumentStore::with_lock(
            paths,
            Arc::new(MemoryLock::new("mem")),
            Duration::from_millis(100),
        );
        store
            .save(&Doc {
                name: "m".into(),
                value: 3,
            })
            .unwrap();
        assert_eq!(store.load::<Doc>().unwrap().value, 3);
    }
}
