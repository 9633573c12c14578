//! Config error-message, partial-file, and init integration tests.
//! Storage: ~/.farmwatch/config.yaml

use assert_fs::prelude::*;
use farmwatch_core::{config, ConfigError, FarmwatchConfig, SharedKey};
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;

fn keyed() -> FarmwatchConfig {
    let mut cfg = FarmwatchConfig::default();
    cfg.sync.shared_key = SharedKey::from("sagayeco-key");
    cfg
}

fn write_raw(home: &assert_fs::TempDir, yaml: &str) {
    let dir = home.path().join(".farmwatch");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), yaml).expect("write");
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
    assert!(err.to_string().contains("farmwatch init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_raw(&home, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

// ---------------------------------------------------------------------------
// 2. Partial files fall back to defaults
// ---------------------------------------------------------------------------

#[rstest]
#[case("sync:\n  interval_secs: 15\n", 15, 3)]
#[case("watchdog:\n  max_retries: 7\n", 60, 7)]
#[case("{}\n", 60, 3)]
fn partial_config_keeps_defaults(
    #[case] yaml: &str,
    #[case] interval_secs: u64,
    #[case] max_retries: u32,
) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_raw(&home, yaml);

    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg.sync.interval_secs, interval_secs);
    assert_eq!(cfg.watchdog.max_retries, max_retries);
    assert_eq!(cfg.watchdog.backoff_ms, 2_000);
    assert_eq!(cfg.sync.delivery_timeout_ms, 10_000);
}

#[test]
fn shared_key_is_stored_as_plain_string() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &keyed()).expect("save");

    home.child(".farmwatch/config.yaml")
        .assert(predicate::str::contains("shared_key: sagayeco-key"));
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), keyed(), false).expect("init");
    home.child(".farmwatch/config.yaml")
        .assert(predicate::path::exists());
}

#[test]
fn init_is_idempotent_without_overwrite() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), keyed(), false).expect("first init");

    let mut changed = keyed();
    changed.sync.interval_secs = 5;
    let returned = config::init_at(home.path(), changed, false).expect("second init");
    assert_eq!(returned.sync.interval_secs, 60, "existing file must win");
}

#[test]
fn init_overwrite_replaces_existing() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), keyed(), false).expect("first init");

    let mut changed = keyed();
    changed.sync.interval_secs = 5;
    config::init_at(home.path(), changed, true).expect("overwrite");
    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.sync.interval_secs, 5);
}

#[test]
fn init_rejects_invalid_config_without_writing() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::init_at(home.path(), FarmwatchConfig::default(), false).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "got: {err}");
    home.child(".farmwatch/config.yaml")
        .assert(predicate::path::missing());
}
