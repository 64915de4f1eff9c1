//! Project → Team → Role entity graph and the team status state machine.
//!
//! Everything here is pure: no I/O, no locking. The manager loads a
//! [`Project`], applies one of these transitions, and persists the result.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::TeamSizeConfig;
use crate::error::Result;
use crate::error::TeamError;
use crate::migrations::CURRENT_VERSION;
use crate::migrations::compare_versions;
use crate::template;

// =============================================================================
// Phase
// =============================================================================

/// Delivery phase a team belongs to. Serialized as its full label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "Phase 1: Strategy, Governance & Planning")]
    Strategy,
    #[serde(rename = "Phase 2: Platform & Foundation")]
    Platform,
    #[serde(rename = "Phase 3: The Build Squads")]
    Build,
    #[serde(rename = "Phase 4: Validation & Hardening")]
    Validation,
    #[serde(rename = "Phase 5: Delivery & Sustainment")]
    Delivery,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Strategy,
        Phase::Platform,
        Phase::Build,
        Phase::Validation,
        Phase::Delivery,
    ];

    pub fn number(self) -> u8 {
        match self {
            Phase::Strategy => 1,
            Phase::Platform => 2,
            Phase::Build => 3,
            Phase::Validation => 4,
            Phase::Delivery => 5,
        }
    }

    pub fn from_number(n: u8) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.number() == n)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Strategy => "Phase 1: Strategy, Governance & Planning",
            Phase::Platform => "Phase 2: Platform & Foundation",
            Phase::Build => "Phase 3: The Build Squads",
            Phase::Validation => "Phase 4: Validation & Hardening",
            Phase::Delivery => "Phase 5: Delivery & Sustainment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Phase {
    type Err = TeamError;

    /// Accepts the full label, `N`, or `phase N`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some(phase) = Phase::ALL.into_iter().find(|p| p.label() == trimmed) {
            return Ok(phase);
        }
        let lowered = trimmed.to_ascii_lowercase();
        let digits = lowered.strip_prefix("phase").unwrap_or(&lowered).trim();
        digits
            .parse::<u8>()
            .ok()
            .and_then(Phase::from_number)
            .ok_or_else(|| {
                TeamError::validation(
                    "phase",
                    format!("'{s}' is not one of the five delivery phases"),
                )
            })
    }
}

// =============================================================================
// TeamStatus
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    #[default]
    NotStarted,
    Active,
    Completed,
    Blocked,
}

impl TeamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TeamStatus::NotStarted => "not_started",
            TeamStatus::Active => "active",
            TeamStatus::Completed => "completed",
            TeamStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TeamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeamStatus {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "not_started" => Ok(TeamStatus::NotStarted),
            "active" => Ok(TeamStatus::Active),
            "completed" => Ok(TeamStatus::Completed),
            "blocked" => Ok(TeamStatus::Blocked),
            _ => Err(TeamError::validation(
                "status",
                format!("'{s}' is not one of not_started, active, completed, blocked"),
            )),
        }
    }
}

// =============================================================================
// Role / Team / Project
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub responsibility: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl Role {
    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: u32,
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub exit_criteria: Vec<String>,
    #[serde(default)]
    pub status: TeamStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

impl Team {
    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    fn role_index(&self, name: &str) -> Result<usize> {
        self.roles
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| TeamError::NotFound(format!("role '{name}' in team {}", self.id)))
    }

    pub fn assigned_count(&self) -> usize {
        self.roles.iter().filter(|r| r.is_assigned()).count()
    }

    /// not_started | blocked → active. Returns the previous status.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<TeamStatus> {
        let previous = self.status;
        match previous {
            TeamStatus::NotStarted | TeamStatus::Blocked => {}
            TeamStatus::Active | TeamStatus::Completed => {
                return Err(self.invalid("start"));
            }
        }
        self.status = TeamStatus::Active;
        self.started_at.get_or_insert(now);
        self.blocked_reason = None;
        Ok(previous)
    }

    /// active → completed, or blocked → completed when `allow_from_blocked`
    /// and the team was started at some point.
    pub fn complete(&mut self, now: DateTime<Utc>, allow_from_blocked: bool) -> Result<TeamStatus> {
        let previous = self.status;
        let allowed = match previous {
            TeamStatus::Active => true,
            TeamStatus::Blocked => allow_from_blocked && self.started_at.is_some(),
            TeamStatus::NotStarted | TeamStatus::Completed => false,
        };
        if !allowed {
            return Err(self.invalid("complete"));
        }
        self.status = TeamStatus::Completed;
        self.completed_at = Some(now);
        self.blocked_reason = None;
        Ok(previous)
    }

    /// any → blocked. Blocking a completed team clears `completed_at`.
    pub fn block(&mut self, reason: &str) -> Result<TeamStatus> {
        let previous = self.status;
        if previous == TeamStatus::Blocked {
            return Err(self.invalid("block"));
        }
        self.status = TeamStatus::Blocked;
        self.completed_at = None;
        self.blocked_reason = Some(reason.to_string());
        Ok(previous)
    }

    /// Set the role's assignee, returning who held it before.
    pub fn assign(&mut self, role: &str, person: &str) -> Result<Option<String>> {
        let idx = self.role_index(role)?;
        Ok(self.roles[idx].assigned_to.replace(person.to_string()))
    }

    /// Clear the role's assignee, returning who held it.
    pub fn unassign(&mut self, role: &str) -> Result<String> {
        let idx = self.role_index(role)?;
        self.roles[idx]
            .assigned_to
            .take()
            .ok_or_else(|| TeamError::NotFound(format!("assignment for role '{role}'")))
    }

    /// Move `expected` from `from` to `to`. Nothing changes unless every
    /// check passes.
    pub fn reassign(&mut self, from: &str, to: &str, expected: &str) -> Result<Reassignment> {
        if from == to {
            return Err(TeamError::validation(
                "role",
                "source and target roles must differ",
            ));
        }
        let from_idx = self.role_index(from)?;
        let to_idx = self.role_index(to)?;
        let current = self.roles[from_idx].assigned_to.as_deref();
        if current != Some(expected) {
            return Err(TeamError::AssigneeMismatch {
                role: from.to_string(),
                expected: expected.to_string(),
                actual: current.map(str::to_string),
            });
        }
        let person = self.roles[from_idx].assigned_to.take();
        let displaced = std::mem::replace(&mut self.roles[to_idx].assigned_to, person);
        Ok(Reassignment {
            person: expected.to_string(),
            from_role: from.to_string(),
            to_role: to.to_string(),
            displaced,
        })
    }

    fn invalid(&self, action: &'static str) -> TeamError {
        TeamError::InvalidTransition {
            team_id: self.id,
            status: self.status,
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub person: String,
    pub from_role: String,
    pub to_role: String,
    /// Previous holder of the target role, now unassigned.
    pub displaced: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// The persisted project document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_name: String,
    pub version: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(rename = "__encrypted__", default, skip_serializing_if = "is_false")]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
}

impl Project {
    /// A fresh project built from the standard team template.
    pub fn from_template(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            project_name: name.to_string(),
            version: CURRENT_VERSION.to_string(),
            updated_at: now,
            teams: template::standard_teams(),
            encrypted: false,
            migrated_from: None,
            migrated_at: None,
        }
    }

    pub fn team(&self, id: u32) -> Result<&Team> {
        self.teams
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| self.missing_team(id))
    }

    pub fn team_mut(&mut self, id: u32) -> Result<&mut Team> {
        let missing = self.missing_team(id);
        self.teams.iter_mut().find(|t| t.id == id).ok_or(missing)
    }

    pub fn remove_team(&mut self, id: u32) -> Result<Team> {
        let idx = self
            .teams
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| self.missing_team(id))?;
        Ok(self.teams.remove(idx))
    }

    fn missing_team(&self, id: u32) -> TeamError {
        TeamError::NotFound(format!("team {id} in project '{}'", self.project_name))
    }

    /// Stamp before persisting. Keeps teams ordered by id and never lowers
    /// the schema version.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.teams.sort_by_key(|t| t.id);
        if compare_versions(&self.version, CURRENT_VERSION).is_lt() {
            self.version = CURRENT_VERSION.to_string();
        }
    }

    pub fn role_count(&self) -> usize {
        self.teams.iter().map(|t| t.roles.len()).sum()
    }

    pub fn assigned_count(&self) -> usize {
        self.teams.iter().map(Team::assigned_count).sum()
    }

    pub fn teams_in(&self, phase: Phase) -> impl Iterator<Item = &Team> {
        self.teams.iter().filter(move |t| t.phase == phase)
    }

    pub fn phase_status(&self, phase: Phase) -> PhaseStatus {
        let mut status = PhaseStatus {
            phase,
            total_teams: 0,
            completed: 0,
            active: 0,
            blocked: 0,
            not_started: 0,
            progress_pct: 0.0,
        };
        for team in self.teams_in(phase) {
            status.total_teams += 1;
            match team.status {
                TeamStatus::Completed => status.completed += 1,
                TeamStatus::Active => status.active += 1,
                TeamStatus::Blocked => status.blocked += 1,
                TeamStatus::NotStarted => status.not_started += 1,
            }
        }
        if status.total_teams > 0 {
            status.progress_pct = status.completed as f64 / status.total_teams as f64 * 100.0;
        }
        status
    }

    pub fn summaries(&self, phase: Option<Phase>) -> Vec<TeamSummary> {
        let mut summaries: Vec<TeamSummary> = self
            .teams
            .iter()
            .filter(|t| phase.is_none_or(|p| t.phase == p))
            .map(TeamSummary::from)
            .collect();
        summaries.sort_by_key(|s| (s.phase, s.id));
        summaries
    }

    pub fn query(&self, filter: &TeamFilter) -> Vec<&Team> {
        self.teams.iter().filter(|t| filter.matches(t)).collect()
    }

    pub fn person_assignments(&self, person: &str) -> Vec<RoleAssignment> {
        self.teams
            .iter()
            .flat_map(|team| {
                team.roles
                    .iter()
                    .filter(move |r| r.assigned_to.as_deref() == Some(person))
                    .map(move |r| RoleAssignment::new(team, r))
            })
            .collect()
    }

    /// People holding roles in more than one team.
    pub fn duplicate_assignments(&self) -> Vec<DuplicateAssignee> {
        let mut by_person: BTreeMap<&str, Vec<RoleAssignment>> = BTreeMap::new();
        for team in &self.teams {
            for role in &team.roles {
                if let Some(person) = role.assigned_to.as_deref() {
                    by_person
                        .entry(person)
                        .or_default()
                        .push(RoleAssignment::new(team, role));
                }
            }
        }
        by_person
            .into_iter()
            .filter_map(|(person, assignments)| {
                let mut teams: Vec<u32> = assignments.iter().map(|a| a.team_id).collect();
                teams.dedup();
                (teams.len() > 1).then(|| DuplicateAssignee {
                    person: person.to_string(),
                    assignments,
                })
            })
            .collect()
    }

    /// Check assigned-role counts against the configured bounds. Read-only.
    pub fn validate_size(&self, team_id: Option<u32>, limits: TeamSizeConfig) -> Result<SizeReport> {
        let teams: Vec<&Team> = match team_id {
            Some(id) => vec![self.team(id)?],
            None => self.teams.iter().collect(),
        };
        let mut violations = Vec::new();
        for team in &teams {
            let assigned = team.assigned_count();
            let issue = if assigned < limits.min {
                Some(SizeIssue::Undersized)
            } else if assigned > limits.max {
                Some(SizeIssue::Oversized)
            } else {
                None
            };
            if let Some(issue) = issue {
                violations.push(SizeViolation {
                    team_id: team.id,
                    team_name: team.name.clone(),
                    issue,
                    assigned,
                    min: limits.min,
                    max: limits.max,
                });
            }
        }
        Ok(SizeReport {
            valid: violations.is_empty(),
            teams_checked: teams.len(),
            violations,
        })
    }
}

// =============================================================================
// Read-side views
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseStatus {
    pub phase: Phase,
    pub total_teams: usize,
    pub completed: usize,
    pub active: usize,
    pub blocked: usize,
    pub not_started: usize,
    pub progress_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSummary {
    pub id: u32,
    pub name: String,
    pub phase: Phase,
    pub status: TeamStatus,
    pub assigned_count: usize,
    pub total_roles: usize,
}

impl From<&Team> for TeamSummary {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            phase: team.phase,
            status: team.status,
            assigned_count: team.assigned_count(),
            total_roles: team.roles.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleAssignment {
    pub team_id: u32,
    pub team_name: String,
    pub phase: Phase,
    pub role_name: String,
    pub assigned_to: Option<String>,
}

impl RoleAssignment {
    fn new(team: &Team, role: &Role) -> Self {
        Self {
            team_id: team.id,
            team_name: team.name.clone(),
            phase: team.phase,
            role_name: role.name.clone(),
            assigned_to: role.assigned_to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateAssignee {
    pub person: String,
    pub assignments: Vec<RoleAssignment>,
}

/// Conjunctive team filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamFilter {
    pub status: Option<TeamStatus>,
    pub phase: Option<Phase>,
    pub assignee: Option<String>,
    pub role_name: Option<String>,
}

impl TeamFilter {
    pub fn matches(&self, team: &Team) -> bool {
        self.status.is_none_or(|s| team.status == s)
            && self.phase.is_none_or(|p| team.phase == p)
            && self.assignee.as_deref().is_none_or(|person| {
                team.roles
                    .iter()
                    .any(|r| r.assigned_to.as_deref() == Some(person))
            })
            && self
                .role_name
                .as_deref()
                .is_none_or(|name| team.role(name).is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeIssue {
    Undersized,
    Oversized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeViolation {
    pub team_id: u32,
    pub team_name: String,
    pub issue: SizeIssue,
    pub assigned: usize,
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub valid: bool,
    pub teams_checked: usize,
    pub violations: Vec<SizeViolation>,
}
