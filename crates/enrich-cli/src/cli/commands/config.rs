//! Config command handlers.

use anyhow::{Context, Result};
use enrich_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init_at(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn check() -> Result<()> {
    let config_path = config::paths::config_path();
    let config = config::Config::load().context("load config")?;
    println!(
        "Config OK: {} ({} session(s))",
        config_path.display(),
        config.sessions.len()
    );
    Ok(())
}
