//! `farmwatch sync|restart|online|offline`: one-shot requests to a running daemon.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde_json::Value;

use farmwatch_daemon::{
    request_offline, request_online, request_restart, request_sync, DaemonError,
};

use super::home_dir;

pub fn sync() -> Result<()> {
    let home = home_dir()?;
    let data = not_running_hint(request_sync(&home)).context("sync request failed")?;

    if data["skipped"].as_bool().unwrap_or(false) {
        let reason = if data["online"].as_bool() == Some(false) {
            "offline"
        } else {
            "disabled or no sensor reading available"
        };
        println!("{} sync skipped ({reason})", "■".bright_black().bold());
        return Ok(());
    }

    let attempt = &data["attempt"];
    let kind = attempt["outcome"]["kind"].as_str().unwrap_or("unknown");
    let message = attempt["message"].as_str().unwrap_or_default();
    println!("{} {message}", outcome_indicator(kind));
    Ok(())
}

pub fn restart() -> Result<()> {
    let home = home_dir()?;
    let data = not_running_hint(request_restart(&home)).context("restart request failed")?;

    if data["running"].as_bool().unwrap_or(false) {
        println!("{} detection service running", "■".green().bold());
    } else if data["watchdog"]["manual_only"].as_bool().unwrap_or(false) {
        println!(
            "{} detection service must be started manually (see `farmwatch daemon status`)",
            "■".yellow().bold()
        );
    } else {
        println!("{} detection service could not be started", "■".red().bold());
    }
    Ok(())
}

pub fn set_online(online: bool) -> Result<()> {
    let home = home_dir()?;
    let result = if online {
        request_online(&home)
    } else {
        request_offline(&home)
    };
    let data = not_running_hint(result).context("connectivity update failed")?;

    let state = if online { "online" } else { "offline" };
    if data["changed"].as_bool().unwrap_or(false) {
        println!("marked {state}");
    } else {
        println!("already {state}");
    }
    Ok(())
}

pub(crate) fn outcome_indicator(kind: &str) -> String {
    match kind {
        "success" => "■".green().bold().to_string(),
        "ambiguous" => "■".yellow().bold().to_string(),
        _ => "■".red().bold().to_string(),
    }
}

fn not_running_hint(result: Result<Value, DaemonError>) -> Result<Value> {
    match result {
        Ok(value) => Ok(value),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            bail!("daemon is not running; start it with `farmwatch daemon start`")
        }
        Err(err) => Err(err.into()),
    }
}
