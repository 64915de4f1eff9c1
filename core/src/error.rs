//! Error taxonomy for team document operations.
//!
//! Every fallible operation in the crate returns [`Result`]. Callers branch on
//! [`TeamError::kind`] instead of matching message text; the CLI turns the kind
//! into a process exit code.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::TeamStatus;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TeamError>;

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("permission denied for {operation}: {reason}")]
    PermissionDenied { operation: String, reason: String },

    #[error("could not acquire lock {} within {waited:?}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("corrupt document {}: {reason}", .path.display())]
    CorruptDocument { path: PathBuf, reason: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("rate limit exceeded for '{user}', retry after {}s", .retry_after.as_secs().max(1))]
    RateLimitExceeded { user: String, retry_after: Duration },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("team {team_id} cannot {action} while {status}")]
    InvalidTransition {
        team_id: u32,
        status: TeamStatus,
        action: &'static str,
    },

    #[error("team {team_id} is held by phase gate '{gate}', waiting on teams {pending:?}")]
    PhaseGateBlocked {
        team_id: u32,
        gate: String,
        pending: Vec<u32>,
    },

    #[error("role '{role}' is held by {actual:?}, expected '{expected}'")]
    AssigneeMismatch {
        role: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("{0} requires confirmation (pass confirmed=true)")]
    ConfirmationRequired(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    LockTimeout,
    CorruptDocument,
    Validation,
    RateLimited,
    Io,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// True for failures raised before any lock was taken, which means the
    /// document was never touched.
    pub fn is_pre_lock(self) -> bool {
        matches!(
            self,
            ErrorKind::PermissionDenied | ErrorKind::Validation | ErrorKind::RateLimited
        )
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::PermissionDenied => 3,
            ErrorKind::RateLimited => 4,
            ErrorKind::LockTimeout => 5,
            ErrorKind::NotFound => 6,
            ErrorKind::CorruptDocument => 7,
            ErrorKind::Conflict => 8,
            ErrorKind::Io | ErrorKind::Internal => 10,
        }
    }
}

impl TeamError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        TeamError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        TeamError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        TeamError::CorruptDocument {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TeamError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            TeamError::LockTimeout { .. } => ErrorKind::LockTimeout,
            TeamError::CorruptDocument { .. } => ErrorKind::CorruptDocument,
            TeamError::Validation { .. }
            | TeamError::ConfirmationRequired(_)
            | TeamError::Config(_) => ErrorKind::Validation,
            TeamError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            TeamError::Io { .. } => ErrorKind::Io,
            TeamError::NotFound(_) => ErrorKind::NotFound,
            TeamError::AlreadyExists(_)
            | TeamError::InvalidTransition { .. }
            | TeamError::PhaseGateBlocked { .. }
            | TeamError::AssigneeMismatch { .. } => ErrorKind::Conflict,
            TeamError::Encryption(_) | TeamError::Serialize(_) => ErrorKind::Internal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Lock contention and rate limiting clear up on their own; nothing else does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TeamError::LockTimeout { .. } | TeamError::RateLimitExceeded { .. }
        )
    }

    /// Suggested wait before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TeamError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
