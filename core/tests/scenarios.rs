//! End-to-end workflows against a real data directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use teamctl_core::AccessRole;
use teamctl_core::AuditQuery;
use teamctl_core::Phase;
use teamctl_core::Principal;
use teamctl_core::TeamConfig;
use teamctl_core::TeamError;
use teamctl_core::TeamFilter;
use teamctl_core::TeamManager;
use teamctl_core::TeamStatus;
use teamctl_core::User;
use teamctl_core::config::RateLimitConfig;

fn open(dir: &TempDir, principal: impl Into<Principal>) -> TeamManager {
    TeamManager::open("atlas", Arc::new(TeamConfig::with_data_dir(dir.path())))
        .unwrap()
        .with_principal(principal)
}

fn admin() -> User {
    User::new("admin", AccessRole::Admin)
}

#[test]
fn assign_then_reload_from_disk() {
    let dir = TempDir::new().unwrap();
    {
        let m = open(&dir, admin());
        m.initialize_project(false).unwrap();
        m.assign_role(1, "Lead Product Manager", "Alice").unwrap();
    }

    let fresh = open(&dir, Principal::Anonymous);
    let team = fresh.team_status(1).unwrap().team;
    let role = team.role("Lead Product Manager").unwrap();
    assert_eq!(role.assigned_to.as_deref(), Some("Alice"));
}

#[test]
fn save_survives_broken_backup_and_audit_sinks() {
    let dir = TempDir::new().unwrap();
    let config = TeamConfig::with_data_dir(dir.path());
    let m = open(&dir, admin());
    m.initialize_project(false).unwrap();

    // Neither sink can be written: the ledger path is a directory and the
    // backup directory is a plain file.
    fs::remove_file(config.audit_path()).unwrap();
    fs::create_dir(config.audit_path()).unwrap();
    let backup_dir = config.backup_dir();
    if backup_dir.is_dir() {
        fs::remove_dir_all(&backup_dir).unwrap();
    }
    fs::write(&backup_dir, b"").unwrap();

    m.assign_role(1, "Lead Product Manager", "Alice").unwrap();

    let fresh = open(&dir, Principal::Anonymous);
    let team = fresh.team_status(1).unwrap().team;
    let role = team.role("Lead Product Manager").unwrap();
    assert_eq!(role.assigned_to.as_deref(), Some("Alice"));
    assert!(backup_dir.is_file());
    assert!(config.audit_path().is_dir());
}

#[test]
fn team_lifecycle_and_phase_progress() {
    let dir = TempDir::new().unwrap();
    let m = open(&dir, admin());
    m.initialize_project(false).unwrap();

    m.start_team(1, None).unwrap();
    let team = m.team_status(1).unwrap().team;
    assert_eq!(team.status, TeamStatus::Active);
    assert!(team.started_at.is_some());
    assert!(team.completed_at.is_none());

    m.complete_team(1).unwrap();
    let team = m.team_status(1).unwrap().team;
    assert_eq!(team.status, TeamStatus::Completed);
    assert!(team.completed_at.is_some());

    let phase = m.phase_status(team.phase).unwrap();
    assert_eq!(phase.completed, 1);
    assert_eq!(phase.total_teams, 3);
    assert!((phase.progress_pct - 100.0 / 3.0).abs() < 1e-9);

    let actions: Vec<String> = m
        .query_audit(&AuditQuery {
            team_id: Some(1),
            ..AuditQuery::default()
        })
        .unwrap()
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(actions, vec!["start_team", "complete_team"]);
}

#[test]
fn viewer_cannot_initialize() {
    let dir = TempDir::new().unwrap();
    let viewer = open(&dir, User::new("val", AccessRole::Viewer));
    let err = viewer.initialize_project(false).unwrap_err();
    assert!(matches!(err, TeamError::PermissionDenied { .. }));
    assert!(err.kind().is_pre_lock());
    assert!(!viewer.exists());
    assert!(!viewer.document_path().exists());
}

#[test]
fn anonymous_cannot_mutate() {
    let dir = TempDir::new().unwrap();
    open(&dir, admin()).initialize_project(false).unwrap();
    let anon = open(&dir, Principal::Anonymous);
    assert!(matches!(
        anon.start_team(1, None),
        Err(TeamError::PermissionDenied { .. })
    ));
    assert!(matches!(
        anon.query_audit(&AuditQuery::default()),
        Err(TeamError::PermissionDenied { .. })
    ));
}

#[test]
fn rate_limit_resets_after_window() {
    let dir = TempDir::new().unwrap();
    let mut config = TeamConfig::with_data_dir(dir.path());
    config.rate_limit = RateLimitConfig {
        enabled: true,
        requests_per_window: 1,
        window_secs: 1,
    };
    let m = TeamManager::open("atlas", Arc::new(config))
        .unwrap()
        .with_principal(admin());

    m.initialize_project(false).unwrap();
    let err = m.start_team(1, None).unwrap_err();
    assert!(matches!(err, TeamError::RateLimitExceeded { .. }));

    thread::sleep(Duration::from_millis(1100));
    m.start_team(1, None).unwrap();
}

#[test]
fn reassignment_moves_person_between_roles() {
    let dir = TempDir::new().unwrap();
    let m = open(&dir, admin());
    m.initialize_project(false).unwrap();
    m.assign_role(8, "Integration Engineer", "lin").unwrap();
    m.reassign_role(8, "Integration Engineer", "IAM Specialist", "lin")
        .unwrap();

    let team = m.team_status(8).unwrap().team;
    assert_eq!(team.role("Integration Engineer").unwrap().assigned_to, None);
    assert_eq!(
        team.role("IAM Specialist").unwrap().assigned_to.as_deref(),
        Some("lin")
    );
    assert_eq!(m.person_assignments("lin").unwrap().len(), 1);
}

#[test]
fn queries_over_a_busy_project() {
    let dir = TempDir::new().unwrap();
    let m = open(&dir, admin());
    m.initialize_project(false).unwrap();
    m.assign_role(1, "Lead Product Manager", "kim").unwrap();
    m.assign_role(5, "Developer Advocate", "kim").unwrap();
    m.start_team(2, None).unwrap();
    m.block_team(3, "legal review").unwrap();

    let dups = m.duplicate_assignments().unwrap();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].person, "kim");

    let active = m
        .query_teams(&TeamFilter {
            status: Some(TeamStatus::Active),
            ..TeamFilter::default()
        })
        .unwrap();
    assert_eq!(active.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2]);

    let summaries = m.list_teams(Some(Phase::Strategy)).unwrap();
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0].assigned_count, 1);

    let status = m.project_status().unwrap();
    assert_eq!(status.total_teams, 12);
    assert_eq!(status.total_roles, 49);
    assert_eq!(status.assigned_roles, 2);
    assert_eq!(status.phases.len(), 5);

    let report = m.validate_size(None).unwrap();
    assert!(!report.valid);
    assert_eq!(report.teams_checked, 12);
    assert_eq!(report.violations.len(), 12);
}

#[test]
fn audit_records_before_and_after() {
    let dir = TempDir::new().unwrap();
    let m = open(&dir, admin());
    m.initialize_project(false).unwrap();
    m.assign_role(4, "DBA", "x").unwrap_err();
    m.assign_role(6, "DBA", "dee").unwrap();
    m.assign_role(6, "DBA", "eve").unwrap();

    let records = m
        .query_audit(&AuditQuery {
            action: Some("assign_role".into()),
            ..AuditQuery::default()
        })
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].details["before"], "dee");
    assert_eq!(records[1].details["after"], "eve");
    assert_eq!(records[1].user, "admin");
    assert_eq!(records[1].user_role, Some(AccessRole::Admin));
}
