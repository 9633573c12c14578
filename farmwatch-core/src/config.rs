//! YAML configuration for the sync scheduler and the service watchdog.
//!
//! # Storage layout
//!
//! ```text
//! ~/.farmwatch/
//!   config.yaml   (mode 0600, directory mode 0700)
//! ```
//!
//! # API pattern
//!
//! Every function that touches disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! The scheduler and watchdog never call these; they receive the typed
//! [`SyncConfig`] / [`WatchdogConfig`] sections at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::types::SharedKey;

/// Fixed time a delivery may take before it resolves as ambiguous.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// 1. Config model
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FarmwatchConfig {
    pub sync: SyncConfig,
    pub watchdog: WatchdogConfig,
}

/// Settings for the periodic sensor export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Delay before the first attempt after the loop starts.
    pub warmup_ms: u64,
    /// Pixel endpoint receiving `k`, `t`, `h`, `s` and `_` as query parameters.
    pub endpoint: String,
    pub shared_key: SharedKey,
    /// Local sensor bridge returning the latest readings as JSON.
    pub sensor_url: String,
    pub delivery_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            warmup_ms: 5_000,
            endpoint: "http://localhost/api/pixel_upload.php".to_string(),
            shared_key: SharedKey::default(),
            sensor_url: "http://localhost/arduino_sync.php?action=get_all".to_string(),
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Settings for the companion service watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Control endpoint accepting form-encoded `action=status` / `action=start`.
    pub control_url: String,
    pub max_retries: u32,
    /// Constant pause between failed start attempts.
    pub backoff_ms: u64,
    pub monitor_interval_ms: u64,
    /// How long a caller that lost the start race waits before re-probing.
    pub start_wait_ms: u64,
    /// Delay between daemon start and the first auto-start.
    pub page_load_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            control_url: "http://localhost/yolo_service_control.php".to_string(),
            max_retries: 3,
            backoff_ms: 2_000,
            monitor_interval_ms: 30_000,
            start_wait_ms: 5_000,
            page_load_delay_ms: 500,
            request_timeout_ms: 10_000,
        }
    }
}

impl WatchdogConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn start_wait(&self) -> Duration {
        Duration::from_millis(self.start_wait_ms)
    }

    pub fn page_load_delay(&self) -> Duration {
        Duration::from_millis(self.page_load_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl FarmwatchConfig {
    /// Reject values the runtime cannot work with.
    ///
    /// Disabled sections are still checked for well-formed URLs so that
    /// enabling them later does not surface a stale typo.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.interval_secs == 0 {
            return Err(invalid("sync.interval_secs", "must be greater than zero"));
        }
        if self.sync.delivery_timeout_ms == 0 {
            return Err(invalid(
                "sync.delivery_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.sync.enabled && self.sync.shared_key.is_empty() {
            return Err(invalid(
                "sync.shared_key",
                "required while sync is enabled",
            ));
        }
        check_url("sync.endpoint", &self.sync.endpoint)?;
        check_url("sync.sensor_url", &self.sync.sensor_url)?;

        if self.watchdog.monitor_interval_ms == 0 {
            return Err(invalid(
                "watchdog.monitor_interval_ms",
                "must be greater than zero",
            ));
        }
        check_url("watchdog.control_url", &self.watchdog.control_url)?;
        Ok(())
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(field, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(field, format!("unsupported scheme '{other}'"))),
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.farmwatch/`. Pure, no I/O.
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".farmwatch")
}

/// `<home>/.farmwatch/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.farmwatch/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent and
/// `ConfigError::Parse` (with path) if malformed. Does not validate.
pub fn load_at(home: &Path) -> Result<FarmwatchConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<FarmwatchConfig, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `config` to `<home>/.farmwatch/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &FarmwatchConfig) -> Result<(), ConfigError> {
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &FarmwatchConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 5. Init
// ---------------------------------------------------------------------------

/// Write `config` unless a config file already exists.
///
/// Idempotent: an existing file is loaded and returned unchanged unless
/// `overwrite` is set.
pub fn init_at(
    home: &Path,
    config: FarmwatchConfig,
    overwrite: bool,
) -> Result<FarmwatchConfig, ConfigError> {
    if config_path_at(home).exists() && !overwrite {
        return load_at(home);
    }
    config.validate()?;
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(config: FarmwatchConfig, overwrite: bool) -> Result<FarmwatchConfig, ConfigError> {
    init_at(&home()?, config, overwrite)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keyed() -> FarmwatchConfig {
        let mut cfg = FarmwatchConfig::default();
        cfg.sync.shared_key = SharedKey::from("farm-key");
        cfg
    }

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".farmwatch/config.yaml"));
    }

    #[test]
    fn defaults_match_documented_timings() {
        let cfg = FarmwatchConfig::default();
        assert_eq!(cfg.sync.warmup(), Duration::from_secs(5));
        assert_eq!(cfg.sync.delivery_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.watchdog.max_retries, 3);
        assert_eq!(cfg.watchdog.backoff(), Duration::from_secs(2));
        assert_eq!(cfg.watchdog.monitor_interval(), Duration::from_secs(30));
        assert_eq!(cfg.watchdog.start_wait(), Duration::from_secs(5));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let cfg = keyed();
        save_at(home.path(), &cfg).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        save_at(home.path(), &keyed()).expect("save");
        let tmp = config_path_at(home.path()).with_file_name("config.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn config_dir_created_with_perms() {
        let home = TempDir::new().expect("tempdir");
        save_at(home.path(), &keyed()).expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir_mode = std::fs::metadata(config_dir_at(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
            let file_mode = std::fs::metadata(config_path_at(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(file_mode, 0o600);
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = keyed();
        cfg.sync.interval_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "sync.interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn missing_key_only_rejected_when_enabled() {
        let mut cfg = FarmwatchConfig::default();
        assert!(cfg.validate().is_err());
        cfg.sync.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_http_url_is_rejected() {
        let mut cfg = keyed();
        cfg.watchdog.control_url = "ftp://farm.local/control".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("watchdog.control_url"));
    }
}
