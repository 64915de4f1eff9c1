//! The standard twelve-team delivery template.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::model::Phase;
use crate::model::Role;
use crate::model::Team;
use crate::model::TeamStatus;

struct RoleDef {
    name: &'static str,
    responsibility: &'static str,
    deliverables: &'static [&'static str],
}

struct TeamDef {
    id: u32,
    name: &'static str,
    phase: Phase,
    description: &'static str,
    roles: &'static [RoleDef],
    exit_criteria: &'static [&'static str],
}

const STANDARD_TEAMS: &[TeamDef] = &[
    TeamDef {
        id: 1,
        name: "Business & Product Strategy",
        phase: Phase::Strategy,
        description: "The 'Why' - Business case and product strategy",
        roles: &[
            RoleDef {
                name: "Business Relationship Manager",
                responsibility: "Connects IT to C-suite",
                deliverables: &["Strategic alignment docs", "Executive briefings"],
            },
            RoleDef {
                name: "Lead Product Manager",
                responsibility: "Owns long-term roadmap",
                deliverables: &["Product roadmap", "OKRs", "Feature prioritization"],
            },
            RoleDef {
                name: "Business Systems Analyst",
                responsibility: "Translates business to technical",
                deliverables: &["Requirements specs", "User stories", "Acceptance criteria"],
            },
            RoleDef {
                name: "Financial Controller (FinOps)",
                responsibility: "Approves budget and cloud spend",
                deliverables: &["Budget forecasts", "Cost projections", "Spend reports"],
            },
        ],
        exit_criteria: &["Business case approved", "Budget allocated", "Roadmap defined", "Success metrics established"],
    },
    TeamDef {
        id: 2,
        name: "Enterprise Architecture",
        phase: Phase::Strategy,
        description: "The 'Standards' - Technology vision and standards",
        roles: &[
            RoleDef {
                name: "Chief Architect",
                responsibility: "Sets 5-year tech vision",
                deliverables: &["Architecture vision", "Tech radar", "Strategic plans"],
            },
            RoleDef {
                name: "Domain Architect",
                responsibility: "Specialized stack expertise",
                deliverables: &["Domain-specific patterns", "Best practices guides"],
            },
            RoleDef {
                name: "Solution Architect",
                responsibility: "Maps projects to standards",
                deliverables: &["Solution designs", "Architecture decision records"],
            },
            RoleDef {
                name: "Standards Lead",
                responsibility: "Manages Approved Tech List",
                deliverables: &["Technology standards", "Evaluation criteria", "Approved list"],
            },
        ],
        exit_criteria: &["Architecture approved", "Technology choices validated", "Standards compliance verified"],
    },
    TeamDef {
        id: 3,
        name: "GRC (Governance, Risk, & Compliance)",
        phase: Phase::Strategy,
        description: "Compliance and risk management",
        roles: &[
            RoleDef {
                name: "Compliance Officer",
                responsibility: "SOX/HIPAA/GDPR adherence",
                deliverables: &["Compliance checklists", "Audit reports"],
            },
            RoleDef {
                name: "Internal Auditor",
                responsibility: "Pre-production mock audits",
                deliverables: &["Audit findings", "Remediation plans"],
            },
            RoleDef {
                name: "Privacy Engineer",
                responsibility: "Data masking and PII",
                deliverables: &["Privacy impact assessments", "Data flow diagrams"],
            },
            RoleDef {
                name: "Policy Manager",
                responsibility: "Maintains SOPs",
                deliverables: &["Standard operating procedures", "Policy updates"],
            },
        ],
        exit_criteria: &["Compliance review passed", "Risk assessment complete", "Privacy requirements met", "Policies acknowledged"],
    },
    TeamDef {
        id: 4,
        name: "Infrastructure & Cloud Ops",
        phase: Phase::Platform,
        description: "Cloud infrastructure and networking",
        roles: &[
            RoleDef {
                name: "Cloud Architect",
                responsibility: "VPC and network design",
                deliverables: &["Network diagrams", "Security groups", "Routing tables"],
            },
            RoleDef {
                name: "IaC Engineer",
                responsibility: "Provisions the 'metal'",
                deliverables: &["Terraform modules", "Ansible playbooks", "Infrastructure code"],
            },
            RoleDef {
                name: "Network Security Engineer",
                responsibility: "Firewalls, VPNs, Direct Connect",
                deliverables: &["Security rules", "Network policies", "Access controls"],
            },
            RoleDef {
                name: "Storage Engineer",
                responsibility: "S3/SAN management",
                deliverables: &["Storage policies", "Backup strategies", "Archival rules"],
            },
        ],
        exit_criteria: &["Infrastructure provisioned", "Network connectivity verified", "Security rules applied", "Monitoring enabled"],
    },
    TeamDef {
        id: 5,
        name: "Platform Engineering",
        phase: Phase::Platform,
        description: "The 'Internal Tools' - Developer experience platform",
        roles: &[
            RoleDef {
                name: "Platform Product Manager",
                responsibility: "Developer experience as product",
                deliverables: &["Platform roadmap", "DX metrics", "Adoption reports"],
            },
            RoleDef {
                name: "CI/CD Architect",
                responsibility: "Golden pipelines",
                deliverables: &["Pipeline templates", "Build configs", "Deployment strategies"],
            },
            RoleDef {
                name: "Kubernetes Administrator",
                responsibility: "Cluster management",
                deliverables: &["Cluster configs", "Resource quotas", "Ingress rules"],
            },
            RoleDef {
                name: "Developer Advocate",
                responsibility: "Dev squad adoption",
                deliverables: &["Onboarding guides", "Training materials", "Feedback loops"],
            },
        ],
        exit_criteria: &["Platform services ready", "CI/CD pipelines functional", "Developer onboarding complete"],
    },
    TeamDef {
        id: 6,
        name: "Data Governance & Analytics",
        phase: Phase::Platform,
        description: "Enterprise data management",
        roles: &[
            RoleDef {
                name: "Data Architect",
                responsibility: "Enterprise data model",
                deliverables: &["Data models", "Schema designs", "Lineage documentation"],
            },
            RoleDef {
                name: "DBA",
                responsibility: "Production database performance",
                deliverables: &["Query optimization", "Index tuning", "Backup verification"],
            },
            RoleDef {
                name: "Data Privacy Officer",
                responsibility: "Retention and deletion rules",
                deliverables: &["Data retention policies", "Deletion workflows"],
            },
            RoleDef {
                name: "ETL Developer",
                responsibility: "Data flow management",
                deliverables: &["ETL pipelines", "Data quality checks", "Transformation logic"],
            },
        ],
        exit_criteria: &["Data models defined", "Pipelines operational", "Privacy controls implemented"],
    },
    TeamDef {
        id: 7,
        name: "Core Feature Squad",
        phase: Phase::Build,
        description: "The 'Devs' - Feature implementation",
        roles: &[
            RoleDef {
                name: "Technical Lead",
                responsibility: "Final word on implementation",
                deliverables: &["Code reviews", "Architecture decisions", "Technical guidance"],
            },
            RoleDef {
                name: "Senior Backend Engineer",
                responsibility: "Logic, APIs, microservices",
                deliverables: &["Backend services", "API endpoints", "Business logic"],
            },
            RoleDef {
                name: "Senior Frontend Engineer",
                responsibility: "Design system, state management",
                deliverables: &["UI components", "Frontend architecture", "State logic"],
            },
            RoleDef {
                name: "Accessibility (A11y) Expert",
                responsibility: "WCAG compliance",
                deliverables: &["A11y audits", "Remediation plans", "Testing reports"],
            },
            RoleDef {
                name: "Technical Writer",
                responsibility: "Internal/external docs",
                deliverables: &["API docs", "User guides", "Runbooks"],
            },
        ],
        exit_criteria: &["Features implemented", "Code reviewed and approved", "Documentation complete", "A11y requirements met"],
    },
    TeamDef {
        id: 8,
        name: "Middleware & Integration",
        phase: Phase::Build,
        description: "APIs and system integrations",
        roles: &[
            RoleDef {
                name: "API Product Manager",
                responsibility: "API lifecycle and versioning",
                deliverables: &["API specs", "Versioning strategy", "Deprecation plans"],
            },
            RoleDef {
                name: "Integration Engineer",
                responsibility: "SAP/Oracle/Mainframe connections",
                deliverables: &["Integration specs", "Data mappings", "Error handling"],
            },
            RoleDef {
                name: "Messaging Engineer",
                responsibility: "Kafka/RabbitMQ management",
                deliverables: &["Topic design", "Message schemas", "Consumer groups"],
            },
            RoleDef {
                name: "IAM Specialist",
                responsibility: "Okta/AD integration",
                deliverables: &["Auth flows", "Permission models", "Access policies"],
            },
        ],
        exit_criteria: &["APIs documented and tested", "Integrations verified", "Auth flows functional"],
    },
    TeamDef {
        id: 9,
        name: "Cybersecurity (AppSec)",
        phase: Phase::Validation,
        description: "Application security",
        roles: &[
            RoleDef {
                name: "Security Architect",
                responsibility: "Threat model review",
                deliverables: &["Threat models", "Security architecture", "Risk assessments"],
            },
            RoleDef {
                name: "Vulnerability Researcher",
                responsibility: "SAST/DAST/SCA scanners",
                deliverables: &["Scan reports", "Vulnerability triage", "Fix verification"],
            },
            RoleDef {
                name: "Penetration Tester",
                responsibility: "Manual security testing",
                deliverables: &["Pen test reports", "Exploit verification", "Remediation"],
            },
            RoleDef {
                name: "DevSecOps Engineer",
                responsibility: "Security in CI/CD",
                deliverables: &["Security gates", "Pipeline integration", "Compliance checks"],
            },
        ],
        exit_criteria: &["Security review passed", "Vulnerabilities remediated or accepted", "Pen testing complete", "Security gates passing"],
    },
    TeamDef {
        id: 10,
        name: "Quality Engineering (SDET)",
        phase: Phase::Validation,
        description: "Testing and quality assurance",
        roles: &[
            RoleDef {
                name: "QA Architect",
                responsibility: "Global testing strategy",
                deliverables: &["Test strategy", "Test plans", "Coverage reports"],
            },
            RoleDef {
                name: "SDET",
                responsibility: "Automated test code",
                deliverables: &["Test automation", "Framework maintenance", "CI integration"],
            },
            RoleDef {
                name: "Performance/Load Engineer",
                responsibility: "Scale testing",
                deliverables: &["Load test scripts", "Performance baselines", "Capacity reports"],
            },
            RoleDef {
                name: "Manual QA / UAT Coordinator",
                responsibility: "User acceptance testing",
                deliverables: &["Test cases", "UAT coordination", "Sign-off reports"],
            },
        ],
        exit_criteria: &["Test coverage requirements met", "Performance benchmarks achieved", "UAT sign-off obtained"],
    },
    TeamDef {
        id: 11,
        name: "Site Reliability Engineering (SRE)",
        phase: Phase::Delivery,
        description: "Reliability and observability",
        roles: &[
            RoleDef {
                name: "SRE Lead",
                responsibility: "Error budget and uptime SLA",
                deliverables: &["SLOs", "Error budgets", "Reliability reports"],
            },
            RoleDef {
                name: "Observability Engineer",
                responsibility: "Monitoring and logging",
                deliverables: &["Dashboards", "Alerts", "Log aggregation", "Traces"],
            },
            RoleDef {
                name: "Chaos Engineer",
                responsibility: "Resiliency testing",
                deliverables: &["Chaos experiments", "Failure scenarios", "Recovery tests"],
            },
            RoleDef {
                name: "Incident Manager",
                responsibility: "War room leadership",
                deliverables: &["Incident response", "Post-mortems", "Runbook updates"],
            },
        ],
        exit_criteria: &["Monitoring in place", "Alerts configured", "Runbooks complete", "Error budget healthy"],
    },
    TeamDef {
        id: 12,
        name: "IT Operations & Support (NOC)",
        phase: Phase::Delivery,
        description: "Production operations",
        roles: &[
            RoleDef {
                name: "NOC Analyst",
                responsibility: "24/7 monitoring",
                deliverables: &["Monitoring dashboards", "Alert triage", "Incident tickets"],
            },
            RoleDef {
                name: "Change Manager",
                responsibility: "Deployment approval",
                deliverables: &["Change requests", "Deployment windows", "CAB approval"],
            },
            RoleDef {
                name: "Release Manager",
                responsibility: "Go/No-Go coordination",
                deliverables: &["Release plans", "Rollback procedures", "Coordination"],
            },
            RoleDef {
                name: "L3 Support Engineer",
                responsibility: "Production bug escalation",
                deliverables: &["Root cause analysis", "Hotfix coordination", "KB articles"],
            },
        ],
        exit_criteria: &["Change approved", "Release deployed", "Support handoff complete"],
    },
];

/// Closed role vocabulary: every role name in the template.
static ROLE_NAMES: LazyLock<BTreeSet<&'static str>> = LazyLock::new(|| {
    STANDARD_TEAMS
        .iter()
        .flat_map(|t| t.roles.iter().map(|r| r.name))
        .collect()
});

pub fn standard_teams() -> Vec<Team> {
    STANDARD_TEAMS
        .iter()
        .map(|def| Team {
            id: def.id,
            name: def.name.to_string(),
            phase: def.phase,
            description: def.description.to_string(),
            roles: def
                .roles
                .iter()
                .map(|r| Role {
                    name: r.name.to_string(),
                    responsibility: r.responsibility.to_string(),
                    deliverables: r.deliverables.iter().map(ToString::to_string).collect(),
                    assigned_to: None,
                })
                .collect(),
            exit_criteria: def.exit_criteria.iter().map(ToString::to_string).collect(),
            status: TeamStatus::NotStarted,
            started_at: None,
            completed_at: None,
            blocked_reason: None,
        })
        .collect()
}

pub fn is_known_role(name: &str) -> bool {
    ROLE_NAMES.contains(name)
}

pub fn role_names() -> impl Iterator<Item = &'static str> {
    ROLE_NAMES.iter().copied()
}
