//! Append-only NDJSON audit ledger.
//!
//! Each append takes its own exclusive lock on `{ledger}.lock`, separate from
//! any document lock, and holds it only for the single write.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::ErrorKind as IoErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

use crate::access::AccessRole;
use crate::config::AuditConfig;
use crate::config::LockConfig;
use crate::encryption::FieldCipher;
use crate::error::Result;
use crate::error::TeamError;
use crate::lock::FileLock;
use crate::lock::Lock;
use crate::lock::LockMode;

/// Detail fields that may carry personal data.
pub const SENSITIVE_FIELDS: &[&str] = &["before", "after", "assignee"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<AccessRole>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<u32>,
    #[serde(default)]
    pub details: Value,
}

/// Conjunctive filter over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub project: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub user: Option<String>,
    pub action: Option<String>,
    pub team_id: Option<u32>,
    pub limit: Option<usize>,
    /// Keep the last `limit` matches instead of the first.
    pub most_recent: bool,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.project.as_deref().is_none_or(|p| record.project == p)
            && self.since.is_none_or(|t| record.timestamp >= t)
            && self.until.is_none_or(|t| record.timestamp <= t)
            && self.user.as_deref().is_none_or(|u| record.user == u)
            && self.action.as_deref().is_none_or(|a| record.action == a)
            && self.team_id.is_none_or(|id| record.team_id == Some(id))
    }
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    lock: FileLock,
    timeout: Duration,
    enabled: bool,
    default_limit: usize,
    cipher: Option<FieldCipher>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, audit: &AuditConfig, lock: &LockConfig) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            lock: FileLock::new(PathBuf::from(lock_path)).with_backoff(lock.backoff()),
            path,
            timeout: lock.timeout(),
            enabled: audit.enabled,
            default_limit: audit.default_limit,
            cipher: None,
        }
    }

    pub fn with_cipher(mut self, cipher: Option<FieldCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut record = record.clone();
        if let Some(cipher) = &self.cipher {
            cipher.encrypt_fields(&mut record.details, SENSITIVE_FIELDS)?;
        }
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let guard = self.lock.acquire(LockMode::Exclusive, self.timeout)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TeamError::io(&self.path, e))?;
        file.write_all(&line)
            .and_then(|()| file.sync_data())
            .map_err(|e| TeamError::io(&self.path, e))?;
        guard.release()?;
        debug!(action = %record.action, user = %record.user, "audit_appended");
        Ok(())
    }

    /// Append, logging instead of failing. The document write that preceded
    /// this call stays committed either way.
    pub fn record(&self, record: &AuditRecord) {
        if let Err(err) = self.append(record) {
            warn!(
                action = %record.action,
                path = %self.path.display(),
                error = %err,
                "audit_append_failed"
            );
        }
    }

    /// Rotated ledgers oldest first, then the live one.
    fn sources(&self) -> Vec<PathBuf> {
        let mut rotated: Vec<(u32, PathBuf)> = Vec::new();
        if let (Some(dir), Some(name)) = (self.path.parent(), self.path.file_name()) {
            let prefix = format!("{}.", name.to_string_lossy());
            let dir = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            };
            if let Ok(read_dir) = fs::read_dir(dir) {
                for entry in read_dir.flatten() {
                    let file_name = entry.file_name().to_string_lossy().into_owned();
                    if let Some(n) = file_name
                        .strip_prefix(&prefix)
                        .and_then(|rest| rest.parse::<u32>().ok())
                    {
                        rotated.push((n, entry.path()));
                    }
                }
            }
        }
        rotated.sort_by(|a, b| b.0.cmp(&a.0));
        let mut sources: Vec<PathBuf> = rotated.into_iter().map(|(_, p)| p).collect();
        sources.push(self.path.clone());
        sources
    }

    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let limit = query.limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let guard = self.lock.acquire(LockMode::Shared, self.timeout)?;
        let mut matches = Vec::new();
        let mut skipped = 0usize;
        for source in self.sources() {
            let file = match fs::File::open(&source) {
                Ok(f) => f,
                Err(err) if err.kind() == IoErrorKind::NotFound => continue,
                Err(err) => return Err(TeamError::io(&source, err)),
            };
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| TeamError::io(&source, e))?;
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(mut record) = serde_json::from_str::<AuditRecord>(&line) else {
                    skipped += 1;
                    continue;
                };
                if !query.matches(&record) {
                    continue;
                }
                if let Some(cipher) = &self.cipher {
                    cipher.decrypt_fields(&mut record.details, SENSITIVE_FIELDS);
                }
                matches.push(record);
                if !query.most_recent && matches.len() >= limit {
                    break;
                }
            }
            if !query.most_recent && matches.len() >= limit {
                break;
            }
        }
        guard.release()?;
        if skipped > 0 {
            debug!(skipped, path = %self.path.display(), "audit_lines_skipped");
        }
        if query.most_recent && matches.len() > limit {
            matches.drain(..matches.len() - limit);
        }
        matches.sort_by_key(|r| r.timestamp);
        Ok(matches)
    }

    /// Whether the ledger can be read (a missing ledger is readable).
    pub fn check_readable(&self) -> Result<()> {
        match fs::File::open(&self.path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(TeamError::io(&self.path, err)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn ledger(dir: &TempDir) -> AuditLog {
        AuditLog::new(
            dir.path().join("audit.log"),
            &AuditConfig::default(),
            &LockConfig::default(),
        )
    }

    fn record(user: &str, action: &str, team_id: Option<u32>, at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            timestamp: at,
            project: "demo".into(),
            user: user.into(),
            user_role: Some(AccessRole::Admin),
            action: action.into(),
            team_id,
            details: json!({"before": null, "after": "x"}),
        }
    }

    #[test]
    fn append_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let now = Utc::now();
        log.append(&record("a", "assign_role", Some(1), now)).unwrap();
        log.append(&record("b", "start_team", Some(2), now)).unwrap();
        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn query_filters_are_conjunctive() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let t0 = Utc::now();
        log.append(&record("alice", "assign_role", Some(1), t0)).unwrap();
        log.append(&record("alice", "start_team", Some(1), t0)).unwrap();
        log.append(&record("bob", "assign_role", Some(1), t0)).unwrap();
        log.append(&record("alice", "assign_role", Some(2), t0)).unwrap();

        let found = log
            .query(&AuditQuery {
                user: Some("alice".into()),
                action: Some("assign_role".into()),
                team_id: Some(1),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user, "alice");
        assert_eq!(found[0].team_id, Some(1));
    }

    #[test]
    fn query_skips_garbage_and_sorts_by_time() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let t0 = Utc::now();
        log.append(&record("a", "x", None, t0 + ChronoDuration::seconds(5))).unwrap();
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(b"not json\n{\"half\":\n").unwrap();
        log.append(&record("a", "x", None, t0)).unwrap();

        let found = log.query(&AuditQuery::default()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].timestamp < found[1].timestamp);
    }

    #[test]
    fn limit_and_most_recent() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let t0 = Utc::now();
        for i in 0..5 {
            log.append(&record(&format!("u{i}"), "x", None, t0 + ChronoDuration::seconds(i)))
                .unwrap();
        }
        let first = log
            .query(&AuditQuery {
                limit: Some(2),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(
            first.iter().map(|r| r.user.as_str()).collect::<Vec<_>>(),
            vec!["u0", "u1"]
        );
        let recent = log
            .query(&AuditQuery {
                limit: Some(2),
                most_recent: true,
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(
            recent.iter().map(|r| r.user.as_str()).collect::<Vec<_>>(),
            vec!["u3", "u4"]
        );
    }

    #[test]
    fn zero_limit_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let t0 = Utc::now();
        for i in 0..3 {
            log.append(&record(&format!("u{i}"), "x", None, t0 + ChronoDuration::seconds(i)))
                .unwrap();
        }
        for most_recent in [false, true] {
            let found = log
                .query(&AuditQuery {
                    limit: Some(0),
                    most_recent,
                    ..AuditQuery::default()
                })
                .unwrap();
            assert!(found.is_empty(), "most_recent={most_recent}");
        }
    }

    #[test]
    fn time_range() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let t0 = Utc::now();
        for i in 0..4 {
            log.append(&record("u", "x", Some(i as u32), t0 + ChronoDuration::minutes(i)))
                .unwrap();
        }
        let found = log
            .query(&AuditQuery {
                since: Some(t0 + ChronoDuration::minutes(1)),
                until: Some(t0 + ChronoDuration::minutes(2)),
                ..AuditQuery::default()
            })
            .unwrap();
        assert_eq!(
            found.iter().map(|r| r.team_id).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
    }

    #[test]
    fn rotated_files_are_scanned_first() {
        let dir = TempDir::new().unwrap();
        let log = ledger(&dir);
        let t0 = Utc::now();
        let old = record("old", "x", None, t0 - ChronoDuration::days(2));
        let older = record("older", "x", None, t0 - ChronoDuration::days(3));
        fs::write(
            dir.path().join("audit.log.1"),
            format!("{}\n", serde_json::to_string(&old).unwrap()),
        )
        .unwrap();
        fs::write(
            dir.path().join("audit.log.2"),
            format!("{}\n", serde_json::to_string(&older).unwrap()),
        )
        .unwrap();
        log.append(&record("new", "x", None, t0)).unwrap();

        let users: Vec<String> = log
            .query(&AuditQuery::default())
            .unwrap()
            .into_iter()
            .map(|r| r.user)
            .collect();
        assert_eq!(users, vec!["older", "old", "new"]);
    }

    #[test]
    fn sensitive_details_are_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let cipher = FieldCipher::from_key("audit-key").unwrap();
        let log = ledger(&dir).with_cipher(Some(cipher));
        log.append(&record("a", "assign_role", Some(1), Utc::now())).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(!raw.contains("\"after\":\"x\""));
        assert!(raw.contains("ENC:"));

        let found = log.query(&AuditQuery::default()).unwrap();
        assert_eq!(found[0].details["after"], "x");
    }

    #[test]
    fn disabled_ledger_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(
            dir.path().join("audit.log"),
            &AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            },
            &LockConfig::default(),
        );
        log.append(&record("a", "x", None, Utc::now())).unwrap();
        assert!(!log.path().exists());
    }
}
