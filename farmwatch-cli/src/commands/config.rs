//! `farmwatch config`

use anyhow::{Context, Result};

use farmwatch_core::config::load_at;
use farmwatch_core::SharedKey;

use super::home_dir;

pub fn run() -> Result<()> {
    let home = home_dir()?;
    let mut config = load_at(&home).context("failed to load config")?;
    if !config.sync.shared_key.is_empty() {
        config.sync.shared_key = SharedKey::from("***");
    }

    let yaml = serde_yaml::to_string(&config).context("failed to render config")?;
    print!("{yaml}");
    if let Err(err) = config.validate() {
        eprintln!("warning: {err}");
    }
    Ok(())
}
