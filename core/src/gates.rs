//! Phase gates and agent-type routing.

use serde::Serialize;

use crate::model::Phase;
use crate::model::Project;
use crate::model::TeamStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseGate {
    pub name: &'static str,
    pub from: Phase,
    pub to: Phase,
    pub required_teams: &'static [u32],
    pub approval_team: u32,
    pub deliverables: &'static [&'static str],
}

pub const PHASE_GATES: [PhaseGate; 4] = [
    PhaseGate {
        name: "Architecture Review Board",
        from: Phase::Strategy,
        to: Phase::Platform,
        required_teams: &[1, 2, 3],
        approval_team: 2,
        deliverables: &[
            "Architecture Decision Records",
            "Approved Tech List",
            "Compliance Checklist",
        ],
    },
    PhaseGate {
        name: "Environment Readiness",
        from: Phase::Platform,
        to: Phase::Build,
        required_teams: &[4, 5, 6],
        approval_team: 4,
        deliverables: &["Infrastructure Provisioned", "CI/CD Pipelines", "Data Models"],
    },
    PhaseGate {
        name: "Feature Complete + Code Review",
        from: Phase::Build,
        to: Phase::Validation,
        required_teams: &[7, 8],
        approval_team: 7,
        deliverables: &[
            "Features Implemented",
            "Code Reviewed",
            "Documentation Complete",
        ],
    },
    PhaseGate {
        name: "Security + QA Sign-off",
        from: Phase::Validation,
        to: Phase::Delivery,
        required_teams: &[9, 10],
        approval_team: 9,
        deliverables: &["Security Review Passed", "Test Coverage Met", "UAT Sign-off"],
    },
];

/// The gate a team in `phase` must pass before it can start.
pub fn gate_into(phase: Phase) -> Option<&'static PhaseGate> {
    PHASE_GATES.iter().find(|g| g.to == phase)
}

/// Required teams of `gate` that are not yet completed. A required team that
/// is missing from the document counts as pending.
pub fn pending_teams(project: &Project, gate: &PhaseGate) -> Vec<u32> {
    gate.required_teams
        .iter()
        .copied()
        .filter(|id| {
            !project
                .team(*id)
                .is_ok_and(|t| t.status == TeamStatus::Completed)
        })
        .collect()
}

/// Unmet gate for starting a team in `phase`, with its pending team ids.
pub fn blocking_gate(project: &Project, phase: Phase) -> Option<(&'static PhaseGate, Vec<u32>)> {
    let gate = gate_into(phase)?;
    let pending = pending_teams(project, gate);
    (!pending.is_empty()).then_some((gate, pending))
}

pub fn agent_team(agent_type: &str) -> Option<u32> {
    let team = match agent_type.trim().to_ascii_lowercase().as_str() {
        "planner" | "architect" => 2,
        "infrastructure" => 4,
        "platform" => 5,
        "coder" | "backend" | "frontend" => 7,
        "security" => 9,
        "reviewer" | "tester" | "qa" => 10,
        "sre" | "ops" => 11,
        _ => return None,
    };
    Some(team)
}
