//! Compressed pre-write snapshots of the project document.

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::BackupConfig;
use crate::error::Result;
use crate::error::TeamError;
use crate::store::atomic_write;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
const TIMESTAMP_LEN: usize = 22;
const SUFFIX: &str = ".json.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Disambiguates snapshots taken within the same microsecond.
    #[serde(skip)]
    seq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub restored_from: String,
    /// Snapshot of the document as it was just before the restore.
    pub pre_restore_snapshot: Option<PathBuf>,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    project: String,
    max_backups: usize,
    enabled: bool,
}

impl BackupManager {
    pub fn new(project: &str, dir: impl Into<PathBuf>, config: &BackupConfig) -> Self {
        Self {
            dir: dir.into(),
            project: project.to_string(),
            max_backups: config.max_backups,
            enabled: config.enabled,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot `document` if it exists. Failures are logged and reported as
    /// `None` so the caller's save can proceed.
    pub fn snapshot(&self, document: &Path) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        match self.try_snapshot(document) {
            Ok(Some(path)) => {
                let pruned = self.prune();
                info!(
                    project = %self.project,
                    path = %path.display(),
                    pruned,
                    "backup_created"
                );
                Some(path)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(project = %self.project, error = %err, "backup_failed");
                None
            }
        }
    }

    fn try_snapshot(&self, document: &Path) -> Result<Option<PathBuf>> {
        let bytes = match fs::read(document) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(TeamError::io(document, err)),
        };
        let compressed = compress(&bytes).map_err(|e| TeamError::io(document, e))?;
        let path = self.next_path(Utc::now());
        atomic_write(&path, &compressed)?;
        Ok(Some(path))
    }

    fn next_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format(TIMESTAMP_FORMAT);
        let base = self.dir.join(format!("{}_{stamp}{SUFFIX}", self.project));
        if !base.exists() {
            return base;
        }
        (1u32..)
            .map(|seq| self.dir.join(format!("{}_{stamp}_{seq}{SUFFIX}", self.project)))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }

    /// This project's backups, newest first.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(TeamError::io(&self.dir, err)),
        };
        let mut entries: Vec<BackupEntry> = read_dir
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let (created_at, seq) = self.parse_name(&name)?;
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                Some(BackupEntry {
                    path: entry.path(),
                    name,
                    size,
                    created_at,
                    seq,
                })
            })
            .collect();
        entries.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        Ok(entries)
    }

    fn parse_name(&self, name: &str) -> Option<(DateTime<Utc>, u32)> {
        let rest = name
            .strip_prefix(self.project.as_str())?
            .strip_prefix('_')?
            .strip_suffix(SUFFIX)?;
        let stamp = rest.get(..TIMESTAMP_LEN)?;
        let created = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        let seq = match &rest[TIMESTAMP_LEN..] {
            "" => 0,
            tail => tail.strip_prefix('_')?.parse().ok()?,
        };
        Some((created.and_utc(), seq))
    }

    /// Delete everything past the retention limit, oldest first. Returns how
    /// many files were removed.
    pub fn prune(&self) -> usize {
        let entries = match self.list() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(project = %self.project, error = %err, "backup_prune_failed");
                return 0;
            }
        };
        let mut removed = 0;
        for entry in entries.iter().skip(self.max_backups).rev() {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %entry.path.display(), "backup_pruned");
                }
                Err(err) => {
                    warn!(path = %entry.path.display(), error = %err, "backup_prune_failed");
                }
            }
        }
        removed
    }

    fn find(&self, name: &str) -> Result<BackupEntry> {
        self.list()?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| TeamError::NotFound(format!("backup '{name}'")))
    }

    /// Decompressed contents of a backup.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.find(name)?;
        let compressed = fs::read(&entry.path).map_err(|e| TeamError::io(&entry.path, e))?;
        decompress(&compressed).map_err(|e| TeamError::corrupt(&entry.path, e))
    }

    /// Replace `target` with the contents of backup `name`, snapshotting the
    /// current `target` first. The caller holds the document's exclusive lock.
    pub fn restore(&self, name: &str, target: &Path) -> Result<RestoreOutcome> {
        let bytes = self.read(name)?;
        if let Err(err) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            return Err(TeamError::corrupt(self.dir.join(name), err));
        }
        let pre_restore_snapshot = self.snapshot(target);
        atomic_write(target, &bytes)?;
        info!(
            project = %self.project,
            backup = name,
            target = %target.display(),
            "backup_restored"
        );
        Ok(RestoreOutcome {
            restored_from: name.to_string(),
            pre_restore_snapshot,
            bytes: bytes.len(),
        })
    }
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, max_backups: usize) -> BackupManager {
        let config = BackupConfig {
            enabled: true,
            max_backups,
            dir: None,
        };
        BackupManager::new("demo", dir.path().join("backups"), &config)
    }

    #[test]
    fn nothing_to_snapshot_without_document() {
        let dir = TempDir::new().unwrap();
        let backups = manager(&dir, 3);
        assert_eq!(backups.snapshot(&dir.path().join("demo.json")), None);
        assert!(backups.list().unwrap().is_empty());
    }

    #[test]
    fn snapshot_is_gzip_of_document() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("demo.json");
        fs::write(&doc, br#"{"v":1}"#).unwrap();

        let backups = manager(&dir, 3);
        let path = backups.snapshot(&doc).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("demo_"));
        assert!(name.ends_with(".json.gz"));
        assert_eq!(backups.read(&name).unwrap(), br#"{"v":1}"#.to_vec());
    }

    #[test]
    fn retention_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("demo.json");
        let backups = manager(&dir, 3);
        for v in 0..6 {
            fs::write(&doc, format!(r#"{{"v":{v}}}"#)).unwrap();
            backups.snapshot(&doc).unwrap();
        }
        let entries = backups.list().unwrap();
        assert_eq!(entries.len(), 3);
        let newest = backups.read(&entries[0].name).unwrap();
        let oldest = backups.read(&entries[2].name).unwrap();
        assert_eq!(newest, br#"{"v":5}"#.to_vec());
        assert_eq!(oldest, br#"{"v":3}"#.to_vec());
    }

    #[test]
    fn other_projects_are_ignored() {
        let dir = TempDir::new().unwrap();
        let backups = manager(&dir, 3);
        fs::create_dir_all(backups.dir()).unwrap();
        fs::write(backups.dir().join("demo_x_20250101_000000_000000.json.gz"), b"").unwrap();
        fs::write(backups.dir().join("notes.txt"), b"").unwrap();
        assert!(backups.list().unwrap().is_empty());
    }

    #[test]
    fn same_instant_names_get_sequence_suffix() {
        let dir = TempDir::new().unwrap();
        let backups = manager(&dir, 5);
        fs::create_dir_all(backups.dir()).unwrap();
        let now = Utc::now();
        let first = backups.next_path(now);
        fs::write(&first, b"").unwrap();
        let second = backups.next_path(now);
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.json.gz"));
    }

    #[test]
    fn restore_snapshots_current_state_first() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("demo.json");
        let backups = manager(&dir, 10);

        fs::write(&doc, br#"{"v":"old"}"#).unwrap();
        let old = backups.snapshot(&doc).unwrap();
        fs::write(&doc, br#"{"v":"new"}"#).unwrap();

        let old_name = old.file_name().unwrap().to_string_lossy().into_owned();
        let outcome = backups.restore(&old_name, &doc).unwrap();
        assert_eq!(fs::read(&doc).unwrap(), br#"{"v":"old"}"#.to_vec());
        assert_eq!(outcome.bytes, br#"{"v":"old"}"#.len());

        let undo = outcome.pre_restore_snapshot.unwrap();
        let undo_name = undo.file_name().unwrap().to_string_lossy().into_owned();
        backups.restore(&undo_name, &doc).unwrap();
        assert_eq!(fs::read(&doc).unwrap(), br#"{"v":"new"}"#.to_vec());
    }

    #[test]
    fn restore_of_unknown_backup_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = manager(&dir, 3)
            .restore("demo_nope.json.gz", &dir.path().join("demo.json"))
            .unwrap_err();
        assert!(matches!(err, TeamError::NotFound(_)));
    }

    #[test]
    fn disabled_manager_never_writes() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("demo.json");
        fs::write(&doc, b"{}").unwrap();
        let backups = BackupManager::new(
            "demo",
            dir.path().join("backups"),
            &BackupConfig {
                enabled: false,
                max_backups: 3,
                dir: None,
            },
        );
        assert_eq!(backups.snapshot(&doc), None);
        assert!(!backups.dir().exists());
    }
}
