//! Session command handlers.

use anyhow::{Context, Result};
use enrich_core::config::Config;
use enrich_core::state::StateFile;

pub fn list() -> Result<()> {
    let config = Config::load().context("load config")?;
    let state_path = config.state_path();
    let state = StateFile::load(&state_path)
        .with_context(|| format!("load session state from {}", state_path.display()))?;

    let pending: Vec<&str> = config
        .sessions
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| !state.sessions.iter().any(|s| s.config.name == *name))
        .collect();

    if state.sessions.is_empty() && pending.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    for data in &state.sessions {
        let status = match (data.active, data.live) {
            (true, true) => "live",
            (true, false) => "active",
            _ => "idle",
        };
        println!(
            "{}  {}  {}  {} open",
            data.id,
            data.config.name,
            status,
            data.index.messages.len()
        );
    }
    for name in pending {
        println!("-  {name}  not started");
    }
    Ok(())
}
