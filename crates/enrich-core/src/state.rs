//! Persisted registry state (`sessions.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::labels::write_json_atomic;
use crate::session::SessionData;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateFile {
    pub next_session_id: u32,
    pub sessions: Vec<SessionData>,
}

impl StateFile {
    /// Loads the state file, returning an empty state if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session state from {}", path.display()))?;
        let mut state: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session state from {}", path.display()))?;
        state.next_session_id = state.next_session_id.max(
            state
                .sessions
                .iter()
                .map(|s| s.id.get() + 1)
                .max()
                .unwrap_or(0),
        );
        Ok(state)
    }

    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn allocate_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        id
    }
}
