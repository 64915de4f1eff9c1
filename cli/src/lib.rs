//! `teamctl` command surface over [`teamctl_core::TeamManager`].
//!
//! Every command resolves to a JSON payload. `--json` prints it as is;
//! otherwise a short human summary is rendered. Failures map to the exit code
//! of their [`teamctl_core::ErrorKind`].

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde_json::Value;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use teamctl_core::AccessRole;
use teamctl_core::AuditQuery;
use teamctl_core::ConfigLoader;
use teamctl_core::Phase;
use teamctl_core::Principal;
use teamctl_core::TeamError;
use teamctl_core::TeamManager;
use teamctl_core::User;
use teamctl_core::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "teamctl", version, about = "Manage project team and role assignments")]
pub struct Cli {
    /// Project name; also the document file name.
    #[arg(long, short = 'p', env = "TEAMCTL_PROJECT", default_value = "default")]
    pub project: String,

    /// Config file (defaults to ./teamctl.toml or the user config dir).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Acting user id. Without one, every mutation is denied.
    #[arg(long, env = "TEAMCTL_USER")]
    pub user: Option<String>,

    /// viewer, team-lead or admin.
    #[arg(long, env = "TEAMCTL_ROLE", default_value = "viewer")]
    pub role: String,

    /// Team the acting team-lead owns.
    #[arg(long, env = "TEAMCTL_USER_TEAM")]
    pub user_team: Option<u32>,

    /// Correlation id attached to every log line.
    #[arg(long)]
    pub request_id: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging (unless RUST_LOG is set).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the project from the standard team template.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// List teams, optionally for one phase.
    List {
        #[arg(long)]
        phase: Option<String>,
    },
    /// Show one team with its roles.
    Show {
        #[arg(long)]
        team: u32,
    },
    Assign {
        #[arg(long)]
        team: u32,
        #[arg(long)]
        role: String,
        #[arg(long)]
        person: String,
    },
    Unassign {
        #[arg(long)]
        team: u32,
        #[arg(long)]
        role: String,
    },
    /// Move a person between two roles of the same team.
    Reassign {
        #[arg(long)]
        team: u32,
        #[arg(long)]
        from_role: String,
        #[arg(long)]
        to_role: String,
        #[arg(long)]
        person: String,
    },
    Start {
        #[arg(long)]
        team: u32,
        /// Start despite an unmet phase gate (admin only, needs --reason).
        #[arg(long = "override")]
        override_gate: bool,
        #[arg(long)]
        reason: Option<String>,
    },
    Complete {
        #[arg(long)]
        team: u32,
    },
    Block {
        #[arg(long)]
        team: u32,
        #[arg(long)]
        reason: String,
    },
    /// Phase progress for one or all phases.
    Status {
        #[arg(long)]
        phase: Option<String>,
    },
    /// Check assigned-role counts against the configured bounds.
    ValidateSize {
        #[arg(long)]
        team: Option<u32>,
    },
    /// People holding roles in more than one team.
    Duplicates,
    /// Every role a person holds.
    Person {
        #[arg(long)]
        person: String,
    },
    DeleteTeam {
        #[arg(long)]
        team: u32,
        #[arg(long)]
        confirmed: bool,
    },
    DeleteProject {
        #[arg(long)]
        confirmed: bool,
    },
    ListBackups,
    Restore {
        #[arg(long)]
        backup: String,
    },
    /// Query the audit trail.
    Audit {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        team: Option<u32>,
        /// RFC 3339 timestamp or YYYY-MM-DD.
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Show the newest matching records instead of the oldest.
        #[arg(long)]
        recent: bool,
    },
    Encrypt,
    Decrypt,
    MigrateStatus,
    Health,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD"))
}

pub fn default_request_id() -> String {
    format!(
        "tm-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        std::process::id()
    )
}

pub fn init_tracing(verbose: bool, format: LogFormat) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

impl Cli {
    fn principal(&self) -> Result<Principal, TeamError> {
        let Some(id) = self.user.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(Principal::Anonymous);
        };
        let role: AccessRole = self.role.parse()?;
        let mut user = User::new(id, role);
        user.team = self.user_team;
        Ok(Principal::Authenticated(user))
    }

    fn manager(&self) -> Result<TeamManager, TeamError> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = self.config.clone().or_else(ConfigLoader::find_config_file) {
            loader = loader.with_file(path);
        }
        if let Some(dir) = &self.data_dir {
            loader = loader.with_override("data_dir", dir.display().to_string());
        }
        let config = loader.load()?;
        Ok(TeamManager::open(&self.project, Arc::new(config))?.with_principal(self.principal()?))
    }
}

/// What a command produced: the JSON payload, the human rendering and the
/// exit code on success.
struct Output {
    payload: Value,
    text: String,
    code: i32,
}

impl Output {
    fn ok(payload: Value, text: impl Into<String>) -> Self {
        Self {
            payload,
            text: text.into(),
            code: 0,
        }
    }
}

fn parse_phase(raw: Option<&str>) -> Result<Option<Phase>, TeamError> {
    raw.map(validation::phase).transpose()
}

fn execute(cli: &Cli) -> Result<Output, TeamError> {
    let m = cli.manager()?;
    let out = match &cli.command {
        Command::Init { force } => {
            let project = m.initialize_project(*force)?;
            Output::ok(
                json!({"project": project.project_name, "teams": project.teams.len(), "roles": project.role_count()}),
                format!(
                    "Initialized project '{}' with {} teams and {} roles",
                    project.project_name,
                    project.teams.len(),
                    project.role_count()
                ),
            )
        }
        Command::List { phase } => {
            let teams = m.list_teams(parse_phase(phase.as_deref())?)?;
            let text = teams
                .iter()
                .map(|t| {
                    format!(
                        "{:>2}  {:<40} {:<12} {}/{}",
                        t.id,
                        t.name,
                        t.status.as_str(),
                        t.assigned_count,
                        t.total_roles
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Output::ok(serde_json::to_value(&teams)?, text)
        }
        Command::Show { team } => {
            let detail = m.team_status(*team)?;
            let mut text = format!(
                "Team {}: {} [{}]\n{}\n",
                detail.team.id,
                detail.team.name,
                detail.team.status,
                detail.team.phase
            );
            for role in &detail.team.roles {
                let holder = role.assigned_to.as_deref().unwrap_or("(unassigned)");
                text.push_str(&format!("  {:<36} {holder}\n", role.name));
            }
            Output::ok(serde_json::to_value(&detail)?, text.trim_end().to_string())
        }
        Command::Assign { team, role, person } => {
            let before = m.assign_role(*team, role, person)?;
            Output::ok(
                json!({"team_id": team, "role": role, "assigned_to": person, "previous": before}),
                format!("Assigned {person} to '{role}' in team {team}"),
            )
        }
        Command::Unassign { team, role } => {
            let before = m.unassign_role(*team, role)?;
            Output::ok(
                json!({"team_id": team, "role": role, "previous": before}),
                format!("Unassigned {before} from '{role}' in team {team}"),
            )
        }
        Command::Reassign {
            team,
            from_role,
            to_role,
            person,
        } => {
            let moved = m.reassign_role(*team, from_role, to_role, person)?;
            Output::ok(
                serde_json::to_value(&moved)?,
                format!("Moved {person} from '{from_role}' to '{to_role}' in team {team}"),
            )
        }
        Command::Start {
            team,
            override_gate,
            reason,
        } => {
            if reason.is_some() && !override_gate {
                return Err(TeamError::validation(
                    "reason",
                    "--reason is only valid with --override",
                ));
            }
            let gate_override = override_gate.then(|| reason.as_deref().unwrap_or(""));
            let previous = m.start_team(*team, gate_override)?;
            Output::ok(
                json!({"team_id": team, "previous": previous, "status": "active"}),
                format!("Team {team} started"),
            )
        }
        Command::Complete { team } => {
            let previous = m.complete_team(*team)?;
            Output::ok(
                json!({"team_id": team, "previous": previous, "status": "completed"}),
                format!("Team {team} completed"),
            )
        }
        Command::Block { team, reason } => {
            let previous = m.block_team(*team, reason)?;
            Output::ok(
                json!({"team_id": team, "previous": previous, "status": "blocked"}),
                format!("Team {team} blocked: {reason}"),
            )
        }
        Command::Status { phase } => {
            let statuses = match parse_phase(phase.as_deref())? {
                Some(p) => vec![m.phase_status(p)?],
                None => m.all_phase_statuses()?,
            };
            let text = statuses
                .iter()
                .map(|s| {
                    format!(
                        "{}: {}/{} completed ({:.0}%), {} active, {} blocked",
                        s.phase, s.completed, s.total_teams, s.progress_pct, s.active, s.blocked
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Output::ok(serde_json::to_value(&statuses)?, text)
        }
        Command::ValidateSize { team } => {
            let report = m.validate_size(*team)?;
            let text = if report.valid {
                format!("All {} team(s) within size bounds", report.teams_checked)
            } else {
                report
                    .violations
                    .iter()
                    .map(|v| {
                        format!(
                            "team {} ({}): {} assigned, expected {}-{}",
                            v.team_id, v.team_name, v.assigned, v.min, v.max
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            let code = if report.valid { 0 } else { 2 };
            Output {
                payload: serde_json::to_value(&report)?,
                text,
                code,
            }
        }
        Command::Duplicates => {
            let dups = m.duplicate_assignments()?;
            let text = if dups.is_empty() {
                "No duplicate assignments".to_string()
            } else {
                dups.iter()
                    .map(|d| format!("{}: {} roles", d.person, d.assignments.len()))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            Output::ok(serde_json::to_value(&dups)?, text)
        }
        Command::Person { person } => {
            let roles = m.person_assignments(person)?;
            let text = roles
                .iter()
                .map(|r| format!("team {} ({}): {}", r.team_id, r.team_name, r.role_name))
                .collect::<Vec<_>>()
                .join("\n");
            Output::ok(serde_json::to_value(&roles)?, text)
        }
        Command::DeleteTeam { team, confirmed } => {
            let removed = m.delete_team(*team, *confirmed)?;
            Output::ok(
                json!({"deleted_team": removed.id, "name": removed.name}),
                format!("Deleted team {} ({})", removed.id, removed.name),
            )
        }
        Command::DeleteProject { confirmed } => {
            let backup = m.delete_project(*confirmed)?;
            Output::ok(
                json!({"deleted_project": m.project_name(), "final_backup": backup}),
                format!("Deleted project '{}'", m.project_name()),
            )
        }
        Command::ListBackups => {
            let backups = m.list_backups()?;
            let text = backups
                .iter()
                .map(|b| format!("{}  {} bytes", b.name, b.size))
                .collect::<Vec<_>>()
                .join("\n");
            Output::ok(serde_json::to_value(&backups)?, text)
        }
        Command::Restore { backup } => {
            let summary = m.restore(backup)?;
            Output::ok(
                serde_json::to_value(&summary)?,
                format!("Restored '{}' ({} teams)", summary.backup, summary.team_count),
            )
        }
        Command::Audit {
            user,
            action,
            team,
            since,
            until,
            limit,
            recent,
        } => {
            let records = m.query_audit(&AuditQuery {
                project: None,
                since: *since,
                until: *until,
                user: user.clone(),
                action: action.clone(),
                team_id: *team,
                limit: Some(*limit),
                most_recent: *recent,
            })?;
            let text = records
                .iter()
                .map(|r| {
                    format!(
                        "{} {} {}{}",
                        r.timestamp.to_rfc3339(),
                        r.user,
                        r.action,
                        r.team_id.map(|t| format!(" team={t}")).unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Output::ok(serde_json::to_value(&records)?, text)
        }
        Command::Encrypt => {
            m.encrypt_project()?;
            Output::ok(json!({"encrypted": true}), "Project encrypted")
        }
        Command::Decrypt => {
            m.decrypt_project()?;
            Output::ok(json!({"encrypted": false}), "Project decrypted")
        }
        Command::MigrateStatus => {
            let status = m.migration_status()?;
            Output::ok(serde_json::to_value(&status)?, format!("{status:?}"))
        }
        Command::Health => {
            let report = m.health();
            let text = report
                .checks
                .iter()
                .map(|c| {
                    format!(
                        "{:<10} {} {}",
                        c.name,
                        if c.healthy { "ok" } else { "FAIL" },
                        c.detail
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Output {
                code: if report.is_healthy() { 0 } else { 10 },
                payload: serde_json::to_value(&report)?,
                text: format!("{}\n{text}", report.status),
            }
        }
    };
    Ok(out)
}

/// Run `cli`, writing results to `out` and errors to `err`. Returns the
/// process exit code.
pub fn run(cli: &Cli, out: &mut impl Write, err: &mut impl Write) -> i32 {
    let request_id = cli.request_id.clone().unwrap_or_else(default_request_id);
    let span = tracing::info_span!("teamctl", request_id = %request_id, project = %cli.project);
    let _entered = span.enter();

    match execute(cli) {
        Ok(output) => {
            let written = if cli.json {
                serde_json::to_string_pretty(&output.payload)
                    .map_err(std::io::Error::other)
                    .and_then(|s| writeln!(out, "{s}"))
            } else if output.text.is_empty() {
                Ok(())
            } else {
                writeln!(out, "{}", output.text)
            };
            if let Err(e) = written {
                tracing::error!(error = %e, "output_write_failed");
                return 10;
            }
            output.code
        }
        Err(error) => {
            tracing::debug!(error = %error, kind = ?error.kind(), "command_failed");
            let message = if cli.json {
                json!({
                    "error": error.to_string(),
                    "kind": format!("{:?}", error.kind()),
                    "retryable": error.is_retryable(),
                    "retry_after_secs": error.retry_after().map(|d| d.as_secs()),
                })
                .to_string()
            } else {
                format!("error: {error}")
            };
            let _ = writeln!(err, "{message}");
            error.exit_code()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_dates_and_timestamps() {
        let day = parse_time("2025-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        let ts = parse_time("2025-03-01T12:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-01T10:30:00+00:00");
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn request_id_shape() {
        let id = default_request_id();
        assert!(id.starts_with("tm-"));
        assert_eq!(id.split('-').count(), 3);
    }

    #[test]
    fn missing_user_is_anonymous() {
        let cli = Cli::parse_from(["teamctl", "health"]);
        assert_eq!(cli.principal().unwrap(), Principal::Anonymous);

        let cli = Cli::parse_from([
            "teamctl",
            "--user",
            "lee",
            "--role",
            "team-lead",
            "--user-team",
            "4",
            "health",
        ]);
        let principal = cli.principal().unwrap();
        let user = principal.user().unwrap();
        assert_eq!(user.role, AccessRole::TeamLead);
        assert_eq!(user.team, Some(4));
    }

    #[test]
    fn bad_role_is_validation_error() {
        let cli = Cli::parse_from(["teamctl", "--user", "x", "--role", "root", "health"]);
        assert_eq!(cli.principal().unwrap_err().exit_code(), 2);
    }
}
