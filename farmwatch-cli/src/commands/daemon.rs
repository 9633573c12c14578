//! `farmwatch daemon`: run and control the background process.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use farmwatch_daemon::paths::socket_path;
use farmwatch_daemon::{request_status, request_stop, start_blocking, DaemonError, StatusReport};

use super::{home_dir, status};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (sync loop + watchdog + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Show sync and watchdog state.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status(args) => match request_status(&home) {
            Ok(payload) => {
                if args.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render daemon status JSON")?
                    );
                } else {
                    let report: StatusReport = serde_json::from_value(payload)
                        .context("daemon returned an unexpected status payload")?;
                    status::print_report(&report);
                }
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if args.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": socket_path(&home).display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render daemon status JSON")?
                    );
                } else {
                    println!("daemon is not running");
                }
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
