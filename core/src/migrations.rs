//! Schema versioning for the project document.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::error::TeamError;

pub const CURRENT_VERSION: &str = "1.0.0";
const BASELINE_VERSION: &str = "0.0.0";

/// Compare dotted versions numerically; missing segments count as zero and
/// non-numeric segments sort before any number.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<Option<u64>> { v.split('.').map(|s| s.trim().parse().ok()).collect() };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(Some(0));
        let y = b.get(i).copied().unwrap_or(Some(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

struct Migration {
    from: &'static str,
    to: &'static str,
    apply: fn(&mut Value),
}

const MIGRATIONS: &[Migration] = &[Migration {
    from: BASELINE_VERSION,
    to: CURRENT_VERSION,
    apply: baseline_to_v1,
}];

fn baseline_to_v1(doc: &mut Value) {
    let Some(map) = doc.as_object_mut() else {
        return;
    };
    if let Some(Value::Array(teams)) = map.get_mut("teams") {
        for team in teams.iter_mut().filter_map(Value::as_object_mut) {
            team.entry("status")
                .or_insert_with(|| Value::String("not_started".into()));
            team.entry("roles").or_insert_with(|| Value::Array(Vec::new()));
            team.entry("exit_criteria")
                .or_insert_with(|| Value::Array(Vec::new()));
        }
    }
    map.entry("teams").or_insert_with(|| Value::Array(Vec::new()));
}

fn document_version(doc: &Value) -> String {
    doc.get("version")
        .and_then(Value::as_str)
        .unwrap_or(BASELINE_VERSION)
        .to_string()
}

/// Bring `doc` up to [`CURRENT_VERSION`]. Returns the version it started at
/// when anything ran.
pub fn migrate(path: &Path, doc: &mut Value) -> Result<Option<String>> {
    if !doc.is_object() {
        return Err(TeamError::corrupt(path, "document is not a JSON object"));
    }
    let original = document_version(doc);
    match compare_versions(&original, CURRENT_VERSION) {
        Ordering::Equal => return Ok(None),
        Ordering::Greater => {
            return Err(TeamError::corrupt(
                path,
                format!("version {original} is newer than supported {CURRENT_VERSION}"),
            ));
        }
        Ordering::Less => {}
    }

    let mut version = original.clone();
    for step in MIGRATIONS {
        if compare_versions(&version, step.to).is_lt() && compare_versions(&version, step.from).is_ge() {
            (step.apply)(doc);
            info!(from = %version, to = step.to, path = %path.display(), "migration_applied");
            version = step.to.to_string();
        }
    }

    if let Some(map) = doc.as_object_mut() {
        map.insert("version".into(), Value::String(version));
        map.insert("migrated_from".into(), Value::String(original.clone()));
        map.insert("migrated_at".into(), Value::String(Utc::now().to_rfc3339()));
    }
    Ok(Some(original))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MigrationStatus {
    NotFound,
    Current { version: String },
    NeedsMigration { from: String, to: String },
}

pub fn status(doc: Option<&Value>) -> MigrationStatus {
    let Some(doc) = doc else {
        return MigrationStatus::NotFound;
    };
    let version = document_version(doc);
    if compare_versions(&version, CURRENT_VERSION).is_lt() {
        MigrationStatus::NeedsMigration {
            from: version,
            to: CURRENT_VERSION.to_string(),
        }
    } else {
        MigrationStatus::Current { version }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn numeric_version_ordering() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.9.9", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn unversioned_document_is_upgraded() {
        let mut doc = json!({
            "project_name": "legacy",
            "updated_at": "2024-01-01T00:00:00Z",
            "teams": [{"id": 1, "name": "A", "phase": "Phase 1: Strategy, Governance & Planning"}]
        });
        let from = migrate(Path::new("legacy.json"), &mut doc).unwrap();
        assert_eq!(from.as_deref(), Some("0.0.0"));
        assert_eq!(doc["version"], CURRENT_VERSION);
        assert_eq!(doc["migrated_from"], "0.0.0");
        assert_eq!(doc["teams"][0]["status"], "not_started");
        assert!(doc["migrated_at"].is_string());
    }

    #[test]
    fn current_document_is_untouched() {
        let mut doc = json!({"version": CURRENT_VERSION, "teams": []});
        let before = doc.clone();
        assert_eq!(migrate(Path::new("x"), &mut doc).unwrap(), None);
        assert_eq!(doc, before);
    }

    #[test]
    fn newer_document_is_rejected() {
        let mut doc = json!({"version": "9.0.0"});
        let err = migrate(Path::new("x"), &mut doc).unwrap_err();
        assert!(matches!(err, TeamError::CorruptDocument { .. }));
    }

    #[test]
    fn status_report() {
        assert_eq!(status(None), MigrationStatus::NotFound);
        assert_eq!(
            status(Some(&json!({"version": "0.5"}))),
            MigrationStatus::NeedsMigration {
                from: "0.5".into(),
                to: CURRENT_VERSION.into()
            }
        );
        assert_eq!(
            status(Some(&json!({"version": "1.0.0"}))),
            MigrationStatus::Current {
                version: "1.0.0".into()
            }
        );
    }
}
