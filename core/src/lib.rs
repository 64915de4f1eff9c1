//! Concurrency-safe persistence and audit for project team assignments.
//!
//! [`TeamManager`] is the entry point: it owns a locked [`store::DocumentStore`],
//! a [`backup::BackupManager`], an [`audit::AuditLog`] and a
//! [`rate_limit::RateLimiter`], and gates every mutation through
//! [`access::AccessController`].

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the CLI.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod access;
pub mod audit;
pub mod backup;
pub mod config;
pub mod encryption;
mod error;
pub mod gates;
pub mod lock;
pub mod manager;
pub mod migrations;
pub mod model;
pub mod rate_limit;
pub mod store;
mod template;
pub mod validation;

pub use access::AccessRole;
pub use access::Operation;
pub use access::Principal;
pub use access::User;
pub use audit::AuditQuery;
pub use audit::AuditRecord;
pub use config::ConfigLoader;
pub use config::TeamConfig;
pub use error::ErrorKind;
pub use error::Result;
pub use error::TeamError;
pub use manager::TeamManager;
pub use model::Phase;
pub use model::Project;
pub use model::TeamFilter;
pub use model::TeamStatus;
pub use template::role_names;
