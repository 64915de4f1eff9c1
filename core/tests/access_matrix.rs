//! The authorization table, checked exhaustively and through the manager.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

use teamctl_core::AccessRole;
use teamctl_core::Operation;
use teamctl_core::Principal;
use teamctl_core::TeamConfig;
use teamctl_core::TeamError;
use teamctl_core::TeamManager;
use teamctl_core::User;
use teamctl_core::access::AccessController;

const ADMIN_ONLY: [Operation; 4] = [
    Operation::OverridePhaseGate,
    Operation::DeleteProject,
    Operation::EncryptProject,
    Operation::DecryptProject,
];

/// The hierarchy written out as a plain table.
fn expected(role: AccessRole, op: Operation, lead_team: Option<u32>, target: Option<u32>) -> bool {
    if op == Operation::QueryAudit {
        return true;
    }
    match role {
        AccessRole::Viewer => false,
        AccessRole::Admin => true,
        AccessRole::TeamLead => {
            !ADMIN_ONLY.contains(&op) && target.is_none_or(|t| lead_team == Some(t))
        }
    }
}

fn role_strategy() -> impl Strategy<Value = AccessRole> {
    prop_oneof![
        Just(AccessRole::Viewer),
        Just(AccessRole::TeamLead),
        Just(AccessRole::Admin),
    ]
}

fn op_strategy() -> impl Strategy<Value = Operation> {
    proptest::sample::select(Operation::ALL.to_vec())
}

#[test]
fn full_matrix() {
    let ac = AccessController::new();
    let roles = [AccessRole::Viewer, AccessRole::TeamLead, AccessRole::Admin];
    let teams = [None, Some(1), Some(2)];
    for role in roles {
        for op in Operation::ALL {
            for lead_team in teams {
                for target in teams {
                    let mut user = User::new("u", role);
                    user.team = lead_team;
                    let principal = Principal::Authenticated(user);
                    let allowed = ac.authorize(&principal, op, target).is_ok();
                    assert_eq!(
                        allowed,
                        expected(role, op, lead_team, target),
                        "role={role} op={op} lead_team={lead_team:?} target={target:?}"
                    );
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn authorize_matches_table(
        role in role_strategy(),
        op in op_strategy(),
        lead_team in proptest::option::of(1u32..=12),
        target in proptest::option::of(1u32..=12),
    ) {
        let mut user = User::new("p", role);
        user.team = lead_team;
        let principal = Principal::Authenticated(user);
        let result = AccessController::new().authorize(&principal, op, target);
        prop_assert_eq!(result.is_ok(), expected(role, op, lead_team, target));
        if let Err(err) = result {
            let is_denied = matches!(err, TeamError::PermissionDenied { .. });
            prop_assert!(is_denied);
        }
    }

    #[test]
    fn anonymous_never_passes(op in op_strategy(), target in proptest::option::of(1u32..=12)) {
        let result = AccessController::new().authorize(&Principal::Anonymous, op, target);
        let is_denied = matches!(result, Err(TeamError::PermissionDenied { .. }));
        prop_assert!(is_denied);
    }
}

#[test]
fn team_lead_mutates_only_own_team() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(TeamConfig::with_data_dir(dir.path()));
    TeamManager::open("rbac", Arc::clone(&config))
        .unwrap()
        .with_principal(User::new("admin", AccessRole::Admin))
        .initialize_project(false)
        .unwrap();

    let lead = TeamManager::open("rbac", config)
        .unwrap()
        .with_principal(User::new("lead", AccessRole::TeamLead).with_team(2));
    lead.assign_role(2, "Chief Architect", "ada").unwrap();
    let err = lead.assign_role(3, "Policy Manager", "ada").unwrap_err();
    assert!(matches!(err, TeamError::PermissionDenied { .. }));
    assert_eq!(lead.team_status(3).unwrap().assigned_count, 0);
}
