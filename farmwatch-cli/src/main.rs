//! Farmwatch: sensor sync and detection-service watchdog CLI.
//!
//! # Usage
//!
//! ```text
//! farmwatch init --key <KEY> [--endpoint <URL>] [--sensor-url <URL>] [--control-url <URL>] [--interval <SECS>] [--overwrite]
//! farmwatch config
//! farmwatch daemon start|stop|status [--json]
//! farmwatch sync
//! farmwatch restart
//! farmwatch online|offline
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, init::InitArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "farmwatch",
    version,
    about = "Export farm sensor readings and keep the detection service alive",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.farmwatch/config.yaml.
    Init(InitArgs),

    /// Print the effective configuration (shared key redacted).
    Config,

    /// Run and control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Push the latest sensor reading now instead of waiting for the next tick.
    Sync,

    /// Reset the watchdog retry budget and start the detection service.
    Restart,

    /// Mark the network as back online; sync resumes on the next tick.
    Online,

    /// Mark the network as offline; sync attempts are skipped.
    Offline,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Config => commands::config::run(),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Sync => commands::control::sync(),
        Commands::Restart => commands::control::restart(),
        Commands::Online => commands::control::set_online(true),
        Commands::Offline => commands::control::set_online(false),
    }
}
