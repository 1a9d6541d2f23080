//! Owns every session and the persisted state file.
//!
//! Each session sits behind its own mutex. The registry also keeps the
//! latest snapshot of every session so it can answer routing questions
//! (which session owns this message?) and rewrite the state file without
//! locking sessions that are busy talking to Telegram.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use enrich_core::config::SessionConfig;
use enrich_core::ids::{ChatId, MessageHandle, SessionId};
use enrich_core::session::{Progress, Session, SessionData};
use enrich_core::state::StateFile;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::menus::SessionSummary;

pub(crate) type SharedSession = Arc<Mutex<Session>>;

pub(crate) struct SessionRegistry {
    state_path: PathBuf,
    sessions: RwLock<BTreeMap<SessionId, SharedSession>>,
    state: Mutex<StateFile>,
}

impl SessionRegistry {
    /// Restores persisted sessions and adds configured ones not seen before.
    ///
    /// # Errors
    /// Returns an error if the state file, a session snapshot, or a label
    /// store cannot be loaded, or if the merged state cannot be saved.
    pub(crate) fn open(configured: &[SessionConfig], state_path: &Path) -> Result<Self> {
        let mut state = StateFile::load(state_path)?;
        let mut sessions = BTreeMap::new();

        for data in &state.sessions {
            let session = restore_session(data.clone())?;
            sessions.insert(session.id(), session);
        }

        for config in configured {
            if state.sessions.iter().any(|data| data.config.name == config.name) {
                continue;
            }
            let id = state.allocate_id();
            let store = config
                .output_spec()
                .open()
                .with_context(|| format!("open labels for session '{}'", config.name))?;
            let session = Session::new(id, config.clone(), config.source.open(), store);
            info!(session = %id, name = %config.name, "Registered session");
            state.sessions.push(session.to_data());
            sessions.insert(id, session);
        }

        state
            .save(state_path)
            .with_context(|| format!("save session state to {}", state_path.display()))?;

        Ok(Self {
            state_path: state_path.to_path_buf(),
            sessions: RwLock::new(
                sessions
                    .into_iter()
                    .map(|(id, session)| (id, Arc::new(Mutex::new(session))))
                    .collect(),
            ),
            state: Mutex::new(state),
        })
    }

    pub(crate) async fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Looks up a session by the raw id carried in a menu payload.
    pub(crate) async fn resolve(&self, raw: &str) -> Option<(SessionId, SharedSession)> {
        let id = SessionId(raw.trim().parse().ok()?);
        self.get(id).await.map(|session| (id, session))
    }

    pub(crate) async fn all(&self) -> Vec<SharedSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Session whose open item post in `chat` is `message`, per the latest
    /// snapshots.
    pub(crate) async fn owner_of_message(
        &self,
        chat: ChatId,
        message: MessageHandle,
    ) -> Option<SessionId> {
        self.state
            .lock()
            .await
            .sessions
            .iter()
            .find(|data| {
                data.config.chat_id == chat
                    && data.index.messages.values().any(|bound| *bound == message)
            })
            .map(|data| data.id)
    }

    pub(crate) async fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for session in self.all().await {
            let session = session.lock().await;
            summaries.push(summary_of(&session));
        }
        summaries
    }

    pub(crate) async fn progress(&self) -> Vec<(SessionSummary, Option<Progress>)> {
        let mut rows = Vec::new();
        for session in self.all().await {
            let mut session = session.lock().await;
            let progress = match session.progress() {
                Ok(progress) => Some(progress),
                Err(err) => {
                    warn!(session = %session.id(), error = %err, "Failed to compute progress");
                    None
                }
            };
            rows.push((summary_of(&session), progress));
        }
        rows
    }

    /// Records the session's current snapshot and rewrites the state file.
    ///
    /// The snapshot is kept for routing even when the write fails.
    ///
    /// # Errors
    /// Returns an error if the state file cannot be written.
    pub(crate) async fn persist(&self, session: &Session) -> Result<()> {
        let data = session.to_data();
        let mut state = self.state.lock().await;
        match state.sessions.iter_mut().find(|stored| stored.id == data.id) {
            Some(stored) => *stored = data,
            None => state.sessions.push(data),
        }
        state
            .save(&self.state_path)
            .with_context(|| format!("save session state to {}", self.state_path.display()))
    }

    /// Drops a session from the registry and the state file.
    ///
    /// # Errors
    /// Returns an error if the state file cannot be written. The session is
    /// gone from memory either way.
    pub(crate) async fn remove(&self, id: SessionId) -> Result<Option<SharedSession>> {
        let Some(removed) = self.sessions.write().await.remove(&id) else {
            return Ok(None);
        };
        let mut state = self.state.lock().await;
        state.sessions.retain(|data| data.id != id);
        state
            .save(&self.state_path)
            .with_context(|| format!("save session state to {}", self.state_path.display()))?;
        info!(session = %id, "Deleted session");
        Ok(Some(removed))
    }
}

pub(crate) fn summary_of(session: &Session) -> SessionSummary {
    SessionSummary {
        id: session.id(),
        name: session.name().to_string(),
        active: session.is_active(),
        live: session.is_live(),
    }
}

fn restore_session(data: SessionData) -> Result<Session> {
    let name = data.config.name.clone();
    let store = data
        .config
        .output_spec()
        .open()
        .with_context(|| format!("open labels for session '{name}'"))?;
    let source = data.config.source.open();
    let session = Session::restore(data, source, store)
        .with_context(|| format!("restore session '{name}'"))?;
    info!(
        session = %session.id(),
        name = %name,
        active = session.is_active(),
        open = session.index().open_count(),
        "Restored session"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use enrich_core::keyboard::GridShape;
    use enrich_core::labels::OutputSpec;
    use enrich_core::source::SourceSpec;
    use tempfile::{TempDir, tempdir};

    use super::*;

    fn config(dir: &TempDir, name: &str) -> SessionConfig {
        SessionConfig {
            name: name.to_string(),
            chat_id: 42,
            batch_size: 2,
            order: enrich_core::config::ItemOrder::Sequential,
            allow_new_labels: false,
            auto_sort_labels: false,
            multi_select: false,
            labels: vec!["yes".to_string(), "no".to_string()],
            grid: GridShape::default(),
            source: SourceSpec::Directory {
                path: dir.path().join("items"),
            },
            output: Some(OutputSpec {
                path: dir.path().join(format!("{name}.json")),
            }),
        }
    }

    #[tokio::test]
    async fn registers_configured_sessions_once() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("sessions.json");
        let configured = vec![config(&dir, "animals"), config(&dir, "plants")];

        let registry = SessionRegistry::open(&configured, &state_path).unwrap();
        let names: Vec<String> = registry
            .summaries()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["animals", "plants"]);

        let reopened = SessionRegistry::open(&configured, &state_path).unwrap();
        let ids: Vec<SessionId> = reopened.summaries().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId(0), SessionId(1)]);
    }

    #[tokio::test]
    async fn persisted_flags_survive_restart() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("sessions.json");
        let configured = vec![config(&dir, "animals")];

        let registry = SessionRegistry::open(&configured, &state_path).unwrap();
        let (_, session) = registry.resolve("0").await.unwrap();
        {
            let mut session = session.lock().await;
            session.mark_live();
            registry.persist(&session).await.unwrap();
        }

        let reopened = SessionRegistry::open(&configured, &state_path).unwrap();
        let summary = &reopened.summaries().await[0];
        assert!(summary.active && summary.live);
    }

    #[tokio::test]
    async fn removed_sessions_leave_the_state_file() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("sessions.json");
        let configured = vec![config(&dir, "animals"), config(&dir, "plants")];

        let registry = SessionRegistry::open(&configured, &state_path).unwrap();
        assert!(registry.remove(SessionId(0)).await.unwrap().is_some());
        assert!(registry.remove(SessionId(0)).await.unwrap().is_none());
        assert!(registry.resolve("0").await.is_none());
        assert!(registry.resolve("not-a-number").await.is_none());

        let state = StateFile::load(&state_path).unwrap();
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].config.name, "plants");
    }

    #[tokio::test]
    async fn failed_state_write_is_reported() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("sessions.json");
        let configured = vec![config(&dir, "animals")];
        let registry = SessionRegistry::open(&configured, &state_path).unwrap();

        // A directory in the temp file's place makes the write fail.
        std::fs::create_dir(state_path.with_extension("json.tmp")).unwrap();
        let (_, session) = registry.resolve("0").await.unwrap();
        let mut session = session.lock().await;
        session.mark_live();
        let err = registry.persist(&session).await.unwrap_err();
        assert!(err.to_string().contains("save session state"));
        assert!(registry.remove(SessionId(0)).await.is_err());

        let on_disk = StateFile::load(&state_path).unwrap();
        assert!(!on_disk.sessions[0].live);
    }

    #[tokio::test]
    async fn unknown_messages_have_no_owner() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("sessions.json");
        let registry = SessionRegistry::open(&[config(&dir, "animals")], &state_path).unwrap();
        assert!(
            registry
                .owner_of_message(42, MessageHandle(7))
                .await
                .is_none()
        );
    }
}
