//! Role-based authorization for project mutations.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::Result;
use crate::error::TeamError;

/// Privilege tier. Ordering follows the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessRole {
    Viewer,
    TeamLead,
    Admin,
}

impl AccessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessRole::Viewer => "viewer",
            AccessRole::TeamLead => "team-lead",
            AccessRole::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessRole {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "viewer" => Ok(AccessRole::Viewer),
            "team-lead" | "lead" => Ok(AccessRole::TeamLead),
            "admin" => Ok(AccessRole::Admin),
            _ => Err(TeamError::validation(
                "role",
                format!("'{s}' is not one of viewer, team-lead, admin"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub role: AccessRole,
    /// Team a team-lead is responsible for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<u32>,
}

impl User {
    pub fn new(id: impl Into<String>, role: AccessRole) -> Self {
        Self {
            id: id.into(),
            role,
            team: None,
        }
    }

    pub fn with_team(mut self, team: u32) -> Self {
        self.team = Some(team);
        self
    }
}

/// Who is acting. There is no implicit viewer for `Anonymous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Authenticated(User),
    Anonymous,
}

impl Principal {
    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Authenticated(user) => Some(user),
            Principal::Anonymous => None,
        }
    }

    /// Identifier recorded in the audit trail and used as the rate-limit key.
    pub fn audit_id(&self) -> &str {
        self.user().map_or("anonymous", |u| u.id.as_str())
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Principal::Authenticated(user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    InitializeProject,
    AssignRole,
    UnassignRole,
    ReassignRole,
    StartTeam,
    CompleteTeam,
    BlockTeam,
    OverridePhaseGate,
    DeleteTeam,
    DeleteProject,
    RestoreBackup,
    EncryptProject,
    DecryptProject,
    QueryAudit,
}

impl Operation {
    pub const ALL: [Operation; 14] = [
        Operation::InitializeProject,
        Operation::AssignRole,
        Operation::UnassignRole,
        Operation::ReassignRole,
        Operation::StartTeam,
        Operation::CompleteTeam,
        Operation::BlockTeam,
        Operation::OverridePhaseGate,
        Operation::DeleteTeam,
        Operation::DeleteProject,
        Operation::RestoreBackup,
        Operation::EncryptProject,
        Operation::DecryptProject,
        Operation::QueryAudit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::InitializeProject => "initialize_project",
            Operation::AssignRole => "assign_role",
            Operation::UnassignRole => "unassign_role",
            Operation::ReassignRole => "reassign_role",
            Operation::StartTeam => "start_team",
            Operation::CompleteTeam => "complete_team",
            Operation::BlockTeam => "block_team",
            Operation::OverridePhaseGate => "override_phase_gate",
            Operation::DeleteTeam => "delete_team",
            Operation::DeleteProject => "delete_project",
            Operation::RestoreBackup => "restore_backup",
            Operation::EncryptProject => "encrypt_project",
            Operation::DecryptProject => "decrypt_project",
            Operation::QueryAudit => "query_audit",
        }
    }

    pub fn is_mutating(self) -> bool {
        !matches!(self, Operation::QueryAudit)
    }

    pub fn required_role(self) -> AccessRole {
        match self {
            Operation::QueryAudit => AccessRole::Viewer,
            Operation::OverridePhaseGate
            | Operation::DeleteProject
            | Operation::EncryptProject
            | Operation::DecryptProject => AccessRole::Admin,
            _ => AccessRole::TeamLead,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessController;

impl AccessController {
    pub fn new() -> Self {
        Self
    }

    /// Allow `operation` on `target_team` or return `PermissionDenied`.
    pub fn authorize<'p>(
        &self,
        principal: &'p Principal,
        operation: Operation,
        target_team: Option<u32>,
    ) -> Result<&'p User> {
        let deny = |reason: String| {
            debug!(operation = %operation, user = principal.audit_id(), %reason, "permission_denied");
            TeamError::PermissionDenied {
                operation: operation.to_string(),
                reason,
            }
        };

        let Some(user) = principal.user() else {
            return Err(deny("no authenticated user".into()));
        };

        let required = operation.required_role();
        if user.role < required {
            return Err(deny(format!(
                "role '{}' is below required '{required}'",
                user.role
            )));
        }

        if operation.is_mutating()
            && let Some(team) = target_team
            && user.role != AccessRole::Admin
            && user.team != Some(team)
        {
            return Err(deny(format!("user '{}' does not lead team {team}", user.id)));
        }

        Ok(user)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn principal(role: AccessRole, team: Option<u32>) -> Principal {
        let mut user = User::new("u", role);
        user.team = team;
        Principal::Authenticated(user)
    }

    #[test]
    fn anonymous_is_always_denied() {
        let ac = AccessController::new();
        for op in Operation::ALL {
            let err = ac.authorize(&Principal::Anonymous, op, None).unwrap_err();
            assert!(matches!(err, TeamError::PermissionDenied { .. }), "{op}");
        }
    }

    #[test]
    fn viewer_cannot_mutate() {
        let ac = AccessController::new();
        let viewer = principal(AccessRole::Viewer, Some(1));
        assert!(ac.authorize(&viewer, Operation::AssignRole, Some(1)).is_err());
        assert!(ac.authorize(&viewer, Operation::InitializeProject, None).is_err());
        assert!(ac.authorize(&viewer, Operation::QueryAudit, None).is_ok());
    }

    #[test]
    fn team_lead_is_scoped_to_own_team() {
        let ac = AccessController::new();
        let lead = principal(AccessRole::TeamLead, Some(3));
        assert!(ac.authorize(&lead, Operation::StartTeam, Some(3)).is_ok());
        assert!(ac.authorize(&lead, Operation::StartTeam, Some(4)).is_err());
        assert!(ac.authorize(&lead, Operation::InitializeProject, None).is_ok());
        assert!(ac.authorize(&lead, Operation::DeleteProject, None).is_err());
    }

    #[test]
    fn admin_passes_everything() {
        let ac = AccessController::new();
        let admin = principal(AccessRole::Admin, None);
        for op in Operation::ALL {
            assert!(ac.authorize(&admin, op, Some(9)).is_ok(), "{op}");
        }
    }

    #[test]
    fn role_parsing_and_order() {
        assert_eq!("team_lead".parse::<AccessRole>().unwrap(), AccessRole::TeamLead);
        assert_eq!("Admin".parse::<AccessRole>().unwrap(), AccessRole::Admin);
        assert!("root".parse::<AccessRole>().is_err());
        assert!(AccessRole::Viewer < AccessRole::TeamLead);
        assert!(AccessRole::TeamLead < AccessRole::Admin);
    }
}
