use std::path::{Path, PathBuf};

use farmwatch_core::config::config_dir_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Number of notices kept for the status report.
pub const RECENT_NOTICES: usize = 20;

pub fn run_dir(home: &Path) -> PathBuf {
    config_dir_at(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
