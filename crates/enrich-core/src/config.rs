//! Configuration management for Enrich.
//!
//! Loads configuration from ${ENRICH_HOME}/config.toml with sensible defaults.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::ids::ChatId;
use crate::keyboard::GridShape;
use crate::labels::OutputSpec;
use crate::source::SourceSpec;

pub mod paths {
    //! Path resolution for Enrich configuration and data directories.
    //!
    //! ENRICH_HOME resolution order:
    //! 1. ENRICH_HOME environment variable (if set)
    //! 2. ~/.config/enrich (default)

    use std::path::PathBuf;

    /// Returns the Enrich home directory.
    pub fn enrich_home() -> PathBuf {
        if let Ok(home) = std::env::var("ENRICH_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".enrich"),
            |h| h.join(".config").join("enrich"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        enrich_home().join("config.toml")
    }

    /// Returns the default path of the persisted session state.
    pub fn state_path() -> PathBuf {
        enrich_home().join("sessions.json")
    }

    /// Returns the directory holding per-session label files.
    pub fn labels_dir() -> PathBuf {
        enrich_home().join("labels")
    }

    /// Returns the directory for log files.
    pub fn logs_dir() -> PathBuf {
        enrich_home().join("logs")
    }
}

/// Order in which unposted items are picked for the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemOrder {
    /// Source order (default)
    #[default]
    Sequential,
    /// Random order; keyboards get a re-roll button
    Shuffled,
}

/// Per-session parameters. Fixed for the life of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// User-facing session name
    pub name: String,
    /// Chat the items are posted to
    pub chat_id: ChatId,
    /// How many items are open at once
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub order: ItemOrder,
    /// Whether replying to an item with text coins a new label
    #[serde(default)]
    pub allow_new_labels: bool,
    /// Whether labels are shown alphabetically instead of in insertion order
    #[serde(default)]
    pub auto_sort_labels: bool,
    /// Whether an item may carry several labels (closed with "Done")
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub grid: GridShape,
    pub source: SourceSpec,
    /// Label output; defaults to `${ENRICH_HOME}/labels/<name>.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
}

fn default_batch_size() -> usize {
    SessionConfig::DEFAULT_BATCH_SIZE
}

impl SessionConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 3;

    pub fn is_shuffled(&self) -> bool {
        self.order == ItemOrder::Shuffled
    }

    /// Effective label output, falling back to the labels directory.
    pub fn output_spec(&self) -> OutputSpec {
        self.output.clone().unwrap_or_else(|| OutputSpec {
            path: paths::labels_dir().join(format!("{}.json", file_stem(&self.name))),
        })
    }

    ///
    /// # Errors
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("session name must not be empty");
        }
        if self.batch_size == 0 {
            bail!("session '{}': batch_size must be at least 1", self.name);
        }
        if self.grid.rows == 0 || self.grid.columns == 0 {
            bail!("session '{}': grid rows and columns must be at least 1", self.name);
        }
        let mut seen = HashSet::new();
        for label in &self.labels {
            if label.trim().is_empty() {
                bail!("session '{}': labels must not be empty", self.name);
            }
            if !seen.insert(label.as_str()) {
                bail!("session '{}': duplicate label '{}'", self.name, label);
            }
        }
        Ok(())
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if stem.is_empty() {
        "session".to_string()
    } else {
        stem
    }
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token for Telegram API.
    pub bot_token: Option<String>,
    /// Allowlist of numeric Telegram user IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist_user_ids: Vec<i64>,
    /// Allowlist of numeric Telegram chat IDs (for groups/supergroups).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist_chat_ids: Vec<i64>,
}

/// Runtime knobs of the polling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Long-poll timeout for getUpdates
    pub poll_timeout_secs: u64,
    /// Interval between refills of live sessions
    pub live_tick_secs: u64,
    /// Override for the persisted session state file
    pub state_path: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            live_tick_secs: 60,
            state_path: None,
        }
    }
}

impl BotConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn live_tick(&self) -> Duration {
        Duration::from_secs(self.live_tick_secs.max(1))
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub bot: BotConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionConfig>,
}

impl Config {
    /// Template written by `enrich config init`.
    pub const TEMPLATE: &'static str = r#"# Enrich configuration

[telegram]
# bot_token = "123456:ABC..."   # or set ENRICH_TELEGRAM_BOT_TOKEN
allowlist_user_ids = []
allowlist_chat_ids = []

[bot]
poll_timeout_secs = 30
live_tick_secs = 60

# [[sessions]]
# name = "animals"
# chat_id = 123456789
# batch_size = 3
# order = "sequential"          # or "shuffled"
# allow_new_labels = true
# auto_sort_labels = false
# multi_select = false
# labels = ["cat", "dog"]
# source = { kind = "directory", path = "/data/animals" }
"#;

    /// Loads configuration from the default location.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, parsed or
    /// fails validation.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    ///
    /// # Errors
    /// Returns an error for invalid or duplicate sessions.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for session in &self.sessions {
            session.validate()?;
            if !names.insert(session.name.as_str()) {
                bail!("duplicate session name '{}'", session.name);
            }
        }
        Ok(())
    }

    /// Writes the default template, refusing to overwrite an existing file.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init_at(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists: {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, Self::TEMPLATE)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Effective state file path.
    pub fn state_path(&self) -> PathBuf {
        self.bot
            .state_path
            .clone()
            .unwrap_or_else(paths::state_path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const SAMPLE: &str = r#"
[telegram]
bot_token = "abc"
allowlist_user_ids = [42]

[bot]
live_tick_secs = 5

[[sessions]]
name = "Animals v2"
chat_id = -100
order = "shuffled"
multi_select = true
labels = ["cat", "dog"]
source = { kind = "directory", path = "/data/animals" }

[[sessions]]
name = "tweets"
chat_id = 7
batch_size = 10
source = { kind = "json_lines", path = "/data/tweets.jsonl", id_key = "id", text_pointer = "/text" }
output = { path = "/out/tweets.json" }
"#;

    #[test]
    fn parses_sessions_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.telegram.bot_token.as_deref(), Some("abc"));
        assert_eq!(config.bot.live_tick_secs, 5);
        assert_eq!(config.bot.poll_timeout_secs, 30);
        assert_eq!(config.sessions.len(), 2);

        let animals = &config.sessions[0];
        assert!(animals.is_shuffled());
        assert!(animals.multi_select);
        assert!(!animals.allow_new_labels);
        assert_eq!(animals.batch_size, SessionConfig::DEFAULT_BATCH_SIZE);
        assert_eq!(animals.grid, GridShape::default());
        assert!(
            animals
                .output_spec()
                .path
                .ends_with("labels/animals-v2.json")
        );

        let tweets = &config.sessions[1];
        assert_eq!(tweets.order, ItemOrder::Sequential);
        assert_eq!(tweets.output_spec().path, PathBuf::from("/out/tweets.json"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(config.sessions.is_empty());
        assert_eq!(config.bot.live_tick(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_zero_batch_and_duplicate_labels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[[sessions]]\nname = \"a\"\nchat_id = 1\nbatch_size = 0\nsource = { kind = \"directory\", path = \"/x\" }\n",
        )
        .unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        fs::write(
            &path,
            "[[sessions]]\nname = \"a\"\nchat_id = 1\nlabels = [\"x\", \"x\"]\nsource = { kind = \"directory\", path = \"/x\" }\n",
        )
        .unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate label"));
    }

    #[test]
    fn template_parses_and_init_refuses_overwrite() {
        let parsed: Config = toml::from_str(Config::TEMPLATE).unwrap();
        assert!(parsed.sessions.is_empty());

        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::init_at(&path).unwrap();
        assert!(Config::init_at(&path).is_err());
    }
}
