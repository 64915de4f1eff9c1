//! The mutation pipeline and read queries over one project.
//!
//! Every mutation runs the same sequence: input validation, authorization and
//! rate limiting (none of which touch the disk), then under the exclusive
//! document lock: load, mutate, snapshot a backup, atomic save. The audit
//! record is appended after the lock is released.

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::warn;

use crate::access::AccessController;
use crate::access::Operation;
use crate::access::Principal;
use crate::access::User;
use crate::audit::AuditLog;
use crate::audit::AuditQuery;
use crate::audit::AuditRecord;
use crate::backup::BackupEntry;
use crate::backup::BackupManager;
use crate::config::TeamConfig;
use crate::encryption::FieldCipher;
use crate::error::Result;
use crate::error::TeamError;
use crate::gates;
use crate::lock::Lock;
use crate::migrations;
use crate::migrations::MigrationStatus;
use crate::model::DuplicateAssignee;
use crate::model::Phase;
use crate::model::PhaseStatus;
use crate::model::Project;
use crate::model::Reassignment;
use crate::model::RoleAssignment;
use crate::model::SizeReport;
use crate::model::Team;
use crate::model::TeamFilter;
use crate::model::TeamStatus;
use crate::model::TeamSummary;
use crate::rate_limit::RateLimiter;
use crate::store::DocumentStore;
use crate::store::ProjectPaths;
use crate::validation;

/// What a mutation hands back to the pipeline.
struct Change<R> {
    output: R,
    team_id: Option<u32>,
    details: Value,
    event: &'static str,
}

impl<R> Change<R> {
    fn new(event: &'static str, team_id: Option<u32>, details: Value, output: R) -> Self {
        Self {
            output,
            team_id,
            details,
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub assigned_count: usize,
    pub total_roles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectStatus {
    pub project_name: String,
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub encrypted: bool,
    pub total_teams: usize,
    pub total_roles: usize,
    pub assigned_roles: usize,
    pub phases: Vec<PhaseStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub backup: String,
    pub pre_restore_snapshot: Option<PathBuf>,
    pub team_count: usize,
    /// Size of the restored document.
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|c| c.healthy)
    }
}

pub struct TeamManager {
    config: Arc<TeamConfig>,
    paths: ProjectPaths,
    store: DocumentStore,
    backups: BackupManager,
    audit: AuditLog,
    limiter: RateLimiter,
    access: AccessController,
    cipher: Option<FieldCipher>,
    principal: Principal,
}

impl TeamManager {
    /// Open `project` under `config.data_dir`. Nothing is created on disk
    /// until the first successful mutation.
    pub fn open(project: &str, config: Arc<TeamConfig>) -> Result<Self> {
        let paths = ProjectPaths::new(&config.data_dir, project)?;
        let cipher = config
            .encryption
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(FieldCipher::from_key)
            .transpose()?;
        let store = DocumentStore::new(paths.clone(), &config.lock);
        let backups = BackupManager::new(project, config.backup_dir(), &config.backup);
        let audit = AuditLog::new(config.audit_path(), &config.audit, &config.lock)
            .with_cipher(cipher.clone());
        let limiter = RateLimiter::new(&config.rate_limit);
        Ok(Self {
            config,
            paths,
            store,
            backups,
            audit,
            limiter,
            access: AccessController::new(),
            cipher,
            principal: Principal::Anonymous,
        })
    }

    pub fn with_principal(mut self, principal: impl Into<Principal>) -> Self {
        self.principal = principal.into();
        self
    }

    /// Swap the document lock, e.g. for an in-process [`crate::lock::MemoryLock`].
    pub fn with_lock(mut self, lock: Arc<dyn Lock>) -> Self {
        self.store = DocumentStore::with_lock(self.paths.clone(), lock, self.config.lock.timeout());
        self
    }

    pub fn project_name(&self) -> &str {
        self.paths.project()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    pub fn document_path(&self) -> PathBuf {
        self.paths.document()
    }

    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------

    /// Parse, migrate and decrypt raw document bytes. With `for_write`, an
    /// encrypted document without a key is an error; reads return the stored
    /// ciphertext instead.
    fn decode(&self, path: &Path, bytes: &[u8], for_write: bool) -> Result<Project> {
        let mut value: Value =
            serde_json::from_slice(bytes).map_err(|e| TeamError::corrupt(path, e))?;
        migrations::migrate(path, &mut value)?;
        let mut project: Project =
            serde_json::from_value(value).map_err(|e| TeamError::corrupt(path, e))?;
        if project.encrypted {
            match &self.cipher {
                Some(cipher) => {
                    cipher.decrypt_project(&mut project);
                    project.encrypted = true;
                }
                None if for_write => {
                    return Err(TeamError::Encryption(format!(
                        "project '{}' is encrypted and no key is configured",
                        project.project_name
                    )));
                }
                None => {}
            }
        }
        Ok(project)
    }

    fn encode(&self, project: &Project) -> Result<Vec<u8>> {
        if !project.encrypted {
            return Ok(serde_json::to_vec_pretty(project)?);
        }
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| TeamError::Encryption("no encryption key configured".into()))?;
        let mut sealed = project.clone();
        cipher.encrypt_project(&mut sealed)?;
        Ok(serde_json::to_vec_pretty(&sealed)?)
    }

    // -------------------------------------------------------------------------
    // Pipeline
    // -------------------------------------------------------------------------

    fn admit(&self, operation: Operation, target_team: Option<u32>) -> Result<&User> {
        let user = self
            .access
            .authorize(&self.principal, operation, target_team)?;
        let decision = self.limiter.check(&user.id);
        if !decision.allowed {
            warn!(user = %user.id, operation = %operation, "rate_limited");
            return Err(TeamError::RateLimitExceeded {
                user: user.id.clone(),
                retry_after: decision.info.reset_after,
            });
        }
        Ok(user)
    }

    fn audit(&self, user: &User, action: &str, team_id: Option<u32>, details: Value) {
        self.audit.record(&AuditRecord {
            timestamp: Utc::now(),
            project: self.project_name().to_string(),
            user: user.id.clone(),
            user_role: Some(user.role),
            action: action.to_string(),
            team_id,
            details,
        });
    }

    /// Load → mutate → backup → save under the exclusive lock, then audit.
    fn mutate<R>(
        &self,
        operation: Operation,
        target_team: Option<u32>,
        apply: impl FnOnce(&mut Project, &User) -> Result<Change<R>>,
    ) -> Result<R> {
        let user = self.admit(operation, target_team)?;
        let change = self.store.transaction(|txn| {
            let path = txn.path();
            let bytes = txn.read_bytes()?.ok_or_else(|| {
                TeamError::NotFound(format!("project '{}'", self.project_name()))
            })?;
            let mut project = self.decode(&path, &bytes, true)?;
            let change = apply(&mut project, user)?;
            project.touch(Utc::now());
            let encoded = self.encode(&project)?;
            self.backups.snapshot(&path);
            txn.write_bytes(&encoded)?;
            Ok(change)
        })?;
        self.audit(user, operation.as_str(), change.team_id, change.details);
        info!(
            project = %self.project_name(),
            user = %user.id,
            team_id = change.team_id,
            "{}",
            change.event
        );
        Ok(change.output)
    }

    fn load_for_read(&self) -> Result<Project> {
        let bytes = self.store.load_bytes()?;
        self.decode(&self.store.document_path(), &bytes, false)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Create the document from the standard template. An existing document
    /// is only replaced with `force`, after being backed up.
    pub fn initialize_project(&self, force: bool) -> Result<Project> {
        let user = self.admit(Operation::InitializeProject, None)?;
        let (project, replaced) = self.store.transaction(|txn| {
            let path = txn.path();
            let replaced = path.is_file();
            if replaced && !force {
                return Err(TeamError::AlreadyExists(format!(
                    "project '{}' (use force to overwrite)",
                    self.project_name()
                )));
            }
            let mut project = Project::from_template(self.project_name(), Utc::now());
            project.encrypted = self.cipher.is_some();
            let encoded = self.encode(&project)?;
            if replaced {
                self.backups.snapshot(&path);
            }
            txn.write_bytes(&encoded)?;
            Ok((project, replaced))
        })?;
        self.audit(
            user,
            Operation::InitializeProject.as_str(),
            None,
            json!({
                "teams": project.teams.len(),
                "roles": project.role_count(),
                "force": force,
                "replaced": replaced,
                "encrypted": project.encrypted,
            }),
        );
        info!(project = %self.project_name(), user = %user.id, replaced, "project_initialized");
        Ok(project)
    }

    pub fn assign_role(&self, team_id: u32, role: &str, person: &str) -> Result<Option<String>> {
        validation::role_name(role)?;
        validation::person(person)?;
        let warn_duplicates = self.config.duplicate_detection.enabled;
        self.mutate(Operation::AssignRole, Some(team_id), |project, _| {
            let before = project.team_mut(team_id)?.assign(role, person)?;
            if warn_duplicates {
                let mut teams: Vec<u32> = project
                    .person_assignments(person)
                    .iter()
                    .map(|a| a.team_id)
                    .collect();
                teams.dedup();
                if teams.len() > 1 {
                    warn!(person, ?teams, "duplicate_assignment");
                }
            }
            let details = json!({
                "role": role,
                "before": before,
                "after": person,
            });
            Ok(Change::new("role_assigned", Some(team_id), details, before))
        })
    }

    pub fn unassign_role(&self, team_id: u32, role: &str) -> Result<String> {
        validation::role_name(role)?;
        self.mutate(Operation::UnassignRole, Some(team_id), |project, _| {
            let before = project.team_mut(team_id)?.unassign(role)?;
            let details = json!({"role": role, "before": before, "after": Value::Null});
            Ok(Change::new("role_unassigned", Some(team_id), details, before))
        })
    }

    /// Move `person` from `from_role` to `to_role` in one team. Fails without
    /// changes unless `person` currently holds `from_role`.
    pub fn reassign_role(
        &self,
        team_id: u32,
        from_role: &str,
        to_role: &str,
        person: &str,
    ) -> Result<Reassignment> {
        validation::role_name(from_role)?;
        validation::role_name(to_role)?;
        validation::person(person)?;
        self.mutate(Operation::ReassignRole, Some(team_id), |project, _| {
            let moved = project.team_mut(team_id)?.reassign(from_role, to_role, person)?;
            let details = json!({
                "from_role": from_role,
                "to_role": to_role,
                "assignee": person,
                "before": moved.displaced,
            });
            Ok(Change::new("role_reassigned", Some(team_id), details, moved))
        })
    }

    /// Start a team. `gate_override` carries an admin's reason for starting
    /// despite an unmet phase gate.
    pub fn start_team(&self, team_id: u32, gate_override: Option<&str>) -> Result<TeamStatus> {
        let override_reason = match gate_override {
            Some(reason) => Some(validation::reason("reason", Some(reason))?.to_string()),
            None => None,
        };
        if override_reason.is_some() {
            self.access
                .authorize(&self.principal, Operation::OverridePhaseGate, Some(team_id))?;
        }
        let enforce = self.config.phase_gates.enforce;
        self.mutate(Operation::StartTeam, Some(team_id), |project, user| {
            let team = project.team(team_id)?;
            let startable = matches!(team.status, TeamStatus::NotStarted | TeamStatus::Blocked);
            let mut overridden = Value::Null;
            if enforce
                && startable
                && let Some((gate, pending)) = gates::blocking_gate(project, team.phase)
            {
                let Some(reason) = override_reason.as_deref() else {
                    return Err(TeamError::PhaseGateBlocked {
                        team_id,
                        gate: gate.name.to_string(),
                        pending,
                    });
                };
                warn!(
                    team_id,
                    gate = gate.name,
                    ?pending,
                    user = %user.id,
                    reason,
                    "phase_gate_override"
                );
                overridden = json!({"gate": gate.name, "pending": pending, "reason": reason});
            }
            let previous = project.team_mut(team_id)?.start(Utc::now())?;
            let details = json!({
                "before": previous.as_str(),
                "after": TeamStatus::Active.as_str(),
                "override": overridden,
            });
            Ok(Change::new("team_started", Some(team_id), details, previous))
        })
    }

    pub fn complete_team(&self, team_id: u32) -> Result<TeamStatus> {
        let from_blocked = self.config.phase_gates.complete_from_blocked;
        self.mutate(Operation::CompleteTeam, Some(team_id), |project, _| {
            let previous = project
                .team_mut(team_id)?
                .complete(Utc::now(), from_blocked)?;
            let details = json!({
                "before": previous.as_str(),
                "after": TeamStatus::Completed.as_str(),
            });
            Ok(Change::new("team_completed", Some(team_id), details, previous))
        })
    }

    pub fn block_team(&self, team_id: u32, reason: &str) -> Result<TeamStatus> {
        let reason = validation::reason("reason", Some(reason))?;
        self.mutate(Operation::BlockTeam, Some(team_id), |project, _| {
            let previous = project.team_mut(team_id)?.block(reason)?;
            let details = json!({
                "before": previous.as_str(),
                "after": TeamStatus::Blocked.as_str(),
                "reason": reason,
            });
            Ok(Change::new("team_blocked", Some(team_id), details, previous))
        })
    }

    pub fn delete_team(&self, team_id: u32, confirmed: bool) -> Result<Team> {
        if !confirmed {
            return Err(TeamError::ConfirmationRequired(format!(
                "deleting team {team_id}"
            )));
        }
        self.mutate(Operation::DeleteTeam, Some(team_id), |project, _| {
            let removed = project.remove_team(team_id)?;
            let details = json!({ "deleted_data": removed });
            Ok(Change::new("team_deleted", Some(team_id), details, removed))
        })
    }

    /// Remove the project document after a final backup. The lock sentinel
    /// stays behind.
    pub fn delete_project(&self, confirmed: bool) -> Result<Option<PathBuf>> {
        if !confirmed {
            return Err(TeamError::ConfirmationRequired(format!(
                "deleting project '{}'",
                self.project_name()
            )));
        }
        let user = self.admit(Operation::DeleteProject, None)?;
        self.store.transaction(|txn| {
            let path = txn.path();
            let bytes = txn.read_bytes()?.ok_or_else(|| {
                TeamError::NotFound(format!("project '{}'", self.project_name()))
            })?;
            let team_count = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| v.get("teams").and_then(Value::as_array).map(Vec::len));
            let backup = self.backups.snapshot(&path);
            self.audit(
                user,
                Operation::DeleteProject.as_str(),
                None,
                json!({"final_backup": backup, "teams": team_count}),
            );
            txn.remove()?;
            info!(project = %self.project_name(), user = %user.id, "project_deleted");
            Ok(backup)
        })
    }

    /// Replace the document with a backup. The current document, if any, is
    /// snapshotted first so the restore can itself be undone.
    pub fn restore(&self, backup_name: &str) -> Result<RestoreSummary> {
        if backup_name.contains(['/', '\\']) || backup_name.contains("..") {
            return Err(TeamError::validation(
                "backup",
                "must be a backup file name, not a path",
            ));
        }
        let user = self.admit(Operation::RestoreBackup, None)?;
        let summary = self.store.transaction(|txn| {
            let outcome = self.backups.restore(backup_name, &txn.path())?;
            let team_count = txn
                .read::<Value>()?
                .and_then(|v| v.get("teams").and_then(Value::as_array).map(Vec::len))
                .unwrap_or(0);
            Ok(RestoreSummary {
                backup: outcome.restored_from,
                pre_restore_snapshot: outcome.pre_restore_snapshot,
                team_count,
                bytes: outcome.bytes,
            })
        })?;
        self.audit(
            user,
            Operation::RestoreBackup.as_str(),
            None,
            json!({
                "backup": summary.backup,
                "pre_restore_snapshot": summary.pre_restore_snapshot,
                "teams": summary.team_count,
                "bytes": summary.bytes,
            }),
        );
        info!(project = %self.project_name(), backup = backup_name, "backup_restored");
        Ok(summary)
    }

    pub fn encrypt_project(&self) -> Result<()> {
        if self.cipher.is_none() {
            return Err(TeamError::Encryption("no encryption key configured".into()));
        }
        self.mutate(Operation::EncryptProject, None, |project, _| {
            let was = project.encrypted;
            project.encrypted = true;
            Ok(Change::new(
                "project_encrypted",
                None,
                json!({"already_encrypted": was}),
                (),
            ))
        })
    }

    pub fn decrypt_project(&self) -> Result<()> {
        if self.cipher.is_none() {
            return Err(TeamError::Encryption("no encryption key configured".into()));
        }
        self.mutate(Operation::DecryptProject, None, |project, _| {
            let was = project.encrypted;
            project.encrypted = false;
            Ok(Change::new(
                "project_decrypted",
                None,
                json!({"was_encrypted": was}),
                (),
            ))
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn load_project(&self) -> Result<Project> {
        self.load_for_read()
    }

    pub fn team_status(&self, team_id: u32) -> Result<TeamDetail> {
        let project = self.load_for_read()?;
        let team = project.team(team_id)?.clone();
        Ok(TeamDetail {
            assigned_count: team.assigned_count(),
            total_roles: team.roles.len(),
            team,
        })
    }

    pub fn list_teams(&self, phase: Option<Phase>) -> Result<Vec<TeamSummary>> {
        Ok(self.load_for_read()?.summaries(phase))
    }

    pub fn phase_status(&self, phase: Phase) -> Result<PhaseStatus> {
        Ok(self.load_for_read()?.phase_status(phase))
    }

    pub fn all_phase_statuses(&self) -> Result<Vec<PhaseStatus>> {
        let project = self.load_for_read()?;
        Ok(Phase::ALL.iter().map(|p| project.phase_status(*p)).collect())
    }

    pub fn person_assignments(&self, person: &str) -> Result<Vec<RoleAssignment>> {
        Ok(self.load_for_read()?.person_assignments(person))
    }

    pub fn project_status(&self) -> Result<ProjectStatus> {
        let project = self.load_for_read()?;
        Ok(ProjectStatus {
            total_teams: project.teams.len(),
            total_roles: project.role_count(),
            assigned_roles: project.assigned_count(),
            phases: Phase::ALL.iter().map(|p| project.phase_status(*p)).collect(),
            encrypted: project.encrypted,
            project_name: project.project_name,
            version: project.version,
            updated_at: project.updated_at,
        })
    }

    pub fn query_teams(&self, filter: &TeamFilter) -> Result<Vec<TeamSummary>> {
        let project = self.load_for_read()?;
        Ok(project
            .query(filter)
            .into_iter()
            .map(TeamSummary::from)
            .collect())
    }

    pub fn agent_team(&self, agent_type: &str) -> Result<Team> {
        let team_id = gates::agent_team(agent_type)
            .ok_or_else(|| TeamError::NotFound(format!("agent type '{agent_type}'")))?;
        Ok(self.load_for_read()?.team(team_id)?.clone())
    }

    pub fn validate_size(&self, team_id: Option<u32>) -> Result<SizeReport> {
        self.load_for_read()?
            .validate_size(team_id, self.config.team_size)
    }

    pub fn duplicate_assignments(&self) -> Result<Vec<DuplicateAssignee>> {
        Ok(self.load_for_read()?.duplicate_assignments())
    }

    pub fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        self.backups.list()
    }

    /// Audit records for this project. Requires an authenticated user.
    pub fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.access
            .authorize(&self.principal, Operation::QueryAudit, None)?;
        let mut scoped = query.clone();
        scoped.project = Some(self.project_name().to_string());
        self.audit.query(&scoped)
    }

    pub fn migration_status(&self) -> Result<MigrationStatus> {
        if !self.store.exists() {
            return Ok(migrations::status(None));
        }
        let path = self.store.document_path();
        let bytes = self.store.load_bytes()?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| TeamError::corrupt(&path, e))?;
        Ok(migrations::status(Some(&value)))
    }

    pub fn health(&self) -> HealthReport {
        fn check(name: &'static str, result: Result<String>) -> HealthCheck {
            match result {
                Ok(detail) => HealthCheck {
                    name,
                    healthy: true,
                    detail,
                },
                Err(err) => HealthCheck {
                    name,
                    healthy: false,
                    detail: err.to_string(),
                },
            }
        }

        let checks = vec![
            check("filesystem", filesystem_roundtrip()),
            check("data_dir", self.check_data_dir()),
            check("document", self.check_document()),
            check(
                "audit",
                self.audit
                    .check_readable()
                    .map(|()| self.audit.path().display().to_string()),
            ),
        ];
        let healthy = checks.iter().all(|c| c.healthy);
        HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            checks,
        }
    }

    fn check_data_dir(&self) -> Result<String> {
        let dir = self.paths.data_dir();
        std::fs::create_dir_all(dir).map_err(|e| TeamError::io(dir, e))?;
        tempfile::tempfile_in(dir).map_err(|e| TeamError::io(dir, e))?;
        Ok(dir.display().to_string())
    }

    fn check_document(&self) -> Result<String> {
        if !self.store.exists() {
            return Ok("absent".into());
        }
        self.load_for_read()?;
        match self.migration_status()? {
            MigrationStatus::Current { version } => Ok(format!("version {version}")),
            MigrationStatus::NeedsMigration { from, .. } => Err(TeamError::corrupt(
                self.store.document_path(),
                format!("version {from} needs migration"),
            )),
            MigrationStatus::NotFound => Ok("absent".into()),
        }
    }
}

fn filesystem_roundtrip() -> Result<String> {
    const PROBE: &[u8] = b"teamctl-health";
    let mut file = tempfile::NamedTempFile::new().map_err(|e| TeamError::io("<tmp>", e))?;
    let path = file.path().to_path_buf();
    file.write_all(PROBE).map_err(|e| TeamError::io(&path, e))?;
    let mut back = Vec::new();
    file.reopen()
        .and_then(|mut f| f.read_to_end(&mut back))
        .map_err(|e| TeamError::io(&path, e))?;
    if back != PROBE {
        return Err(TeamError::corrupt(&path, "probe read back differently"));
    }
    Ok("temp write/read ok".into())
}
