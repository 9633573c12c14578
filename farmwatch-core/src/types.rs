//! Domain types shared by the sync scheduler, the service watchdog, and the daemon.
//!
//! Everything here is plain data: serializable with serde, cheap to clone, and
//! free of I/O.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Shared key sent as the `k` parameter of every pixel delivery.
///
/// `Debug` and `Display` never print the key itself.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedKey(pub String);

impl SharedKey {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(***)")
    }
}

impl fmt::Display for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for SharedKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SharedKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Sensor data
// ---------------------------------------------------------------------------

/// One reading of the farm sensors, produced fresh on every sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub captured_at: DateTime<Utc>,
}

impl SensorSnapshot {
    pub fn new(temperature: f64, humidity: f64, soil_moisture: f64) -> Self {
        Self {
            temperature,
            humidity,
            soil_moisture,
            captured_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync outcome
// ---------------------------------------------------------------------------

/// Why a delivery could not be confirmed either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ambiguity {
    /// The delivery channel reported an error. The endpoint may still have
    /// stored the reading; a rejection and a non-image reply look identical.
    LoadError,
    /// Neither a load nor an error signal arrived before the delivery timeout.
    Timeout,
}

impl fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ambiguity::LoadError => write!(f, "load-error"),
            Ambiguity::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Ambiguous(Ambiguity),
    /// Nothing was sent: the request could not be built or the sensor
    /// source failed.
    Failed,
}

impl SyncOutcome {
    /// Only `Failed` counts as a hard failure; ambiguity is absorbed.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "success"),
            SyncOutcome::Ambiguous(reason) => write!(f, "ambiguous ({reason})"),
            SyncOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Record of the most recent sync attempt. Overwritten on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttempt {
    pub attempted_at: DateTime<Utc>,
    pub outcome: SyncOutcome,
    pub message: String,
}

impl SyncAttempt {
    pub fn now(outcome: SyncOutcome, message: impl Into<String>) -> Self {
        Self {
            attempted_at: Utc::now(),
            outcome,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Companion service
// ---------------------------------------------------------------------------

/// Liveness of the companion detection service as seen by one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Unknown,
    Running,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Unknown => write!(f, "unknown"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Watchdog state machine position.
///
/// ```text
/// Unknown --probe--> Running | Stopped
/// Stopped --ensure_running--> Starting
/// Starting --start confirmed--> Running
/// Starting --start failed--> Stopped
/// Running --probe fails--> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogPhase {
    #[default]
    Unknown,
    Running,
    Stopped,
    Starting,
}

impl From<ServiceState> for WatchdogPhase {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Unknown => WatchdogPhase::Unknown,
            ServiceState::Running => WatchdogPhase::Running,
            ServiceState::Stopped => WatchdogPhase::Stopped,
        }
    }
}

impl fmt::Display for WatchdogPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogPhase::Unknown => write!(f, "unknown"),
            WatchdogPhase::Running => write!(f, "running"),
            WatchdogPhase::Stopped => write!(f, "stopped"),
            WatchdogPhase::Starting => write!(f, "starting"),
        }
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message for the operator, emitted by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_key_never_printed() {
        let key = SharedKey::from("farm-secret");
        assert_eq!(key.to_string(), "***");
        assert!(!format!("{key:?}").contains("farm-secret"));
        assert_eq!(key.expose(), "farm-secret");
    }

    #[test]
    fn outcome_display() {
        assert_eq!(SyncOutcome::Success.to_string(), "success");
        assert_eq!(
            SyncOutcome::Ambiguous(Ambiguity::Timeout).to_string(),
            "ambiguous (timeout)"
        );
        assert_eq!(SyncOutcome::Failed.to_string(), "failed");
    }

    #[test]
    fn only_failed_is_hard_failure() {
        assert!(!SyncOutcome::Success.is_hard_failure());
        assert!(!SyncOutcome::Ambiguous(Ambiguity::LoadError).is_hard_failure());
        assert!(!SyncOutcome::Ambiguous(Ambiguity::Timeout).is_hard_failure());
        assert!(SyncOutcome::Failed.is_hard_failure());
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_yaml::to_string(&SyncOutcome::Ambiguous(Ambiguity::LoadError))
            .expect("serialize");
        assert!(json.contains("kind: ambiguous"));
        assert!(json.contains("reason: load_error"));
    }

    #[test]
    fn phase_from_service_state() {
        assert_eq!(
            WatchdogPhase::from(ServiceState::Running),
            WatchdogPhase::Running
        );
        assert_eq!(
            WatchdogPhase::from(ServiceState::Stopped),
            WatchdogPhase::Stopped
        );
        assert_eq!(ServiceState::default(), ServiceState::Unknown);
    }
}
