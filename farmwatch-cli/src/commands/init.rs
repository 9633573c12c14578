//! `farmwatch init --key <KEY> [--endpoint ...] [--overwrite]`

use anyhow::{Context, Result};
use clap::Args;

use farmwatch_core::config::{self, config_path_at};
use farmwatch_core::{FarmwatchConfig, SharedKey};

use super::home_dir;

/// Write a new config file. An existing file is left alone unless
/// `--overwrite` is given.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Shared key sent with every delivery (`k` parameter).
    #[arg(long, short = 'k')]
    pub key: String,

    /// Pixel endpoint that receives sensor readings.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Local sensor bridge URL.
    #[arg(long)]
    pub sensor_url: Option<String>,

    /// Detection service control URL.
    #[arg(long)]
    pub control_url: Option<String>,

    /// Seconds between sync attempts.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Disable the detection service watchdog.
    #[arg(long)]
    pub no_watchdog: bool,

    /// Replace an existing config file.
    #[arg(long)]
    pub overwrite: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config_path_at(&home);
        let existed = path.exists();
        let overwrite = self.overwrite;

        let saved = config::init_at(&home, self.into_config(), overwrite)
            .with_context(|| format!("failed to write '{}'", path.display()))?;

        if existed && !overwrite {
            println!("Config already exists at {} (use --overwrite to replace)", path.display());
        } else {
            println!("✓ Wrote {}", path.display());
        }
        println!(
            "  sync every {}s → {}",
            saved.sync.interval_secs, saved.sync.endpoint
        );
        if saved.watchdog.enabled {
            println!("  watchdog → {}", saved.watchdog.control_url);
        } else {
            println!("  watchdog disabled");
        }
        Ok(())
    }

    fn into_config(self) -> FarmwatchConfig {
        let mut config = FarmwatchConfig::default();
        config.sync.shared_key = SharedKey::from(self.key);
        if let Some(endpoint) = self.endpoint {
            config.sync.endpoint = endpoint;
        }
        if let Some(sensor_url) = self.sensor_url {
            config.sync.sensor_url = sensor_url;
        }
        if let Some(interval) = self.interval {
            config.sync.interval_secs = interval;
        }
        if let Some(control_url) = self.control_url {
            config.watchdog.control_url = control_url;
        }
        config.watchdog.enabled = !self.no_watchdog;
        config
    }
}
