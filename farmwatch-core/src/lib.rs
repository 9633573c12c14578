//! Farmwatch core library: domain types, YAML configuration, errors.
//!
//! - [`types`]: sensor snapshots, sync attempts, service states, notices
//! - [`config`]: load / save / init of `~/.farmwatch/config.yaml`
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{FarmwatchConfig, SyncConfig, WatchdogConfig};
pub use error::ConfigError;
pub use types::{
    Ambiguity, Notice, NoticeLevel, SensorSnapshot, ServiceState, SharedKey, SyncAttempt,
    SyncOutcome, WatchdogPhase,
};
