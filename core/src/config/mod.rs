//! Layered configuration for teamctl.
//!
//! Layers, lowest precedence first:
//! 1. Defaults (from code)
//! 2. Config file (`teamctl.toml`)
//! 3. Environment variables (`TEAMCTL_*`, `__` between section and key)
//!
//! The result is an immutable [`TeamConfig`]. Components receive it (or the
//! section they need) at construction; nothing reads configuration globally.
//!
//! ```no_run
//! use teamctl_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::load_default()?;
//! let config = ConfigLoader::new().with_file("./teamctl.toml").load()?;
//! # Ok::<(), teamctl_core::config::ConfigError>(())
//! ```

pub mod error;
pub mod loader;

pub use error::ConfigError;
pub use loader::AuditConfig;
pub use loader::BackupConfig;
pub use loader::ConfigLoader;
pub use loader::DuplicateDetectionConfig;
pub use loader::EncryptionConfig;
pub use loader::LockConfig;
pub use loader::PhaseGateConfig;
pub use loader::RateLimitConfig;
pub use loader::TeamConfig;
pub use loader::TeamSizeConfig;
