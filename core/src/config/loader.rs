use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ConfigError;
use crate::encryption::KEY_ENV_VAR;
use crate::lock::PollBackoff;

type Result<T> = std::result::Result<T, ConfigError>;

/// Complete teamctl configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Directory holding documents, lock files, the ledger and backups.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub team_size: TeamSizeConfig,

    #[serde(default)]
    pub phase_gates: PhaseGateConfig,

    #[serde(default)]
    pub duplicate_detection: DuplicateDetectionConfig,

    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// Document lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> PollBackoff {
        PollBackoff {
            initial: Duration::from_millis(self.initial_backoff_ms),
            max: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Snapshots retained per project; oldest are pruned first.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Defaults to `{data_dir}/backups`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_audit_file")]
    pub file_name: String,

    #[serde(default = "default_audit_limit")]
    pub default_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Bounds on assigned roles per team, used by size validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSizeConfig {
    #[serde(default = "default_min_team_size")]
    pub min: usize,

    #[serde(default = "default_max_team_size")]
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseGateConfig {
    #[serde(default = "default_true")]
    pub enforce: bool,

    /// Allow `complete` directly from `blocked` for teams that were started.
    #[serde(default)]
    pub complete_from_blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Falls back to `TEAM_ENCRYPTION_KEY` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".teams")
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    250
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.25
}

fn default_max_backups() -> usize {
    10
}

fn default_audit_file() -> String {
    "audit.log".to_string()
}

fn default_audit_limit() -> usize {
    100
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_min_team_size() -> usize {
    4
}

fn default_max_team_size() -> usize {
    6
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_backups: default_max_backups(),
            dir: None,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: default_audit_file(),
            default_limit: default_audit_limit(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for TeamSizeConfig {
    fn default() -> Self {
        Self {
            min: default_min_team_size(),
            max: default_max_team_size(),
        }
    }
}

impl Default for PhaseGateConfig {
    fn default() -> Self {
        Self {
            enforce: true,
            complete_from_blocked: false,
        }
    }
}

impl Default for DuplicateDetectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock: LockConfig::default(),
            backup: BackupConfig::default(),
            audit: AuditConfig::default(),
            rate_limit: RateLimitConfig::default(),
            team_size: TeamSizeConfig::default(),
            phase_gates: PhaseGateConfig::default(),
            duplicate_detection: DuplicateDetectionConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }
}

impl TeamConfig {
    /// Defaults rooted at `data_dir`. Convenient for tests and embedding.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join(&self.audit.file_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock.timeout_secs == 0 {
            return Err(ConfigError::invalid("lock.timeout_secs", "must be greater than 0"));
        }
        if self.lock.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "lock.backoff_multiplier",
                format!("must be >= 1.0, got {}", self.lock.backoff_multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&self.lock.jitter_factor) {
            return Err(ConfigError::invalid(
                "lock.jitter_factor",
                format!("must be between 0.0 and 1.0, got {}", self.lock.jitter_factor),
            ));
        }
        if self.backup.enabled && self.backup.max_backups == 0 {
            return Err(ConfigError::invalid(
                "backup.max_backups",
                "must be at least 1 while backups are enabled",
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_window == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.requests_per_window",
                "must be positive while rate limiting is enabled",
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.window_secs == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.window_secs",
                "must be positive while rate limiting is enabled",
            ));
        }
        if self.team_size.min > self.team_size.max {
            return Err(ConfigError::invalid(
                "team_size.min",
                format!("{} exceeds team_size.max {}", self.team_size.min, self.team_size.max),
            ));
        }
        if self.audit.file_name.trim().is_empty() || self.audit.file_name.contains(['/', '\\']) {
            return Err(ConfigError::invalid(
                "audit.file_name",
                format!("must be a plain file name, got '{}'", self.audit.file_name),
            ));
        }
        Ok(())
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    overrides: Vec<(String, String)>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            overrides: Vec::new(),
        }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Highest-precedence value for `key` (dotted path, e.g. `lock.timeout_secs`).
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (TEAMCTL_ prefix)
    /// 4. Apply explicit overrides
    pub fn load(&self) -> Result<TeamConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&TeamConfig::default())?;
        builder = builder.add_source(File::from_str(&defaults_json, config::FileFormat::Json));

        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Example: TEAMCTL_LOCK__TIMEOUT_SECS=5
        builder = builder.add_source(
            Environment::with_prefix("TEAMCTL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in &self.overrides {
            builder = builder.set_override(key.as_str(), value.as_str())?;
        }

        let mut team_config: TeamConfig = builder.build()?.try_deserialize()?;

        if team_config.encryption.key.is_none() {
            team_config.encryption.key = std::env::var(KEY_ENV_VAR)
                .ok()
                .filter(|key| !key.trim().is_empty());
        }

        team_config.validate()?;
        Ok(team_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./teamctl.toml
    /// 2. XDG config: ~/.config/teamctl/config.toml
    /// 3. Home directory: ~/.teamctl.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./teamctl.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("teamctl").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".teamctl.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<TeamConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
