//! Menu screens: message text plus an optional inline keyboard.

use std::fmt::Write as _;

use enrich_core::ids::SessionId;
use enrich_core::keyboard::{Button, Keyboard, STOP_SESSION_PREFIX};
use enrich_core::session::Progress;

use crate::telegram::InlineKeyboardMarkup;

pub(crate) const MENU: &str = "menu";
pub(crate) const START: &str = "session_start";
pub(crate) const LIVE: &str = "session_live";
pub(crate) const DELETE: &str = "session_delete";
pub(crate) const DELETE_CONFIRMED: &str = "session_delete_conf";

/// A decoded non-engine callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MenuAction {
    Root,
    StartPicker,
    Start(String),
    LivePicker,
    Live(String),
    StopPicker,
    Stop(String),
    DeletePicker,
    Delete(String),
    DeleteConfirmed(String),
}

impl MenuAction {
    pub(crate) fn parse(data: &str) -> Option<Self> {
        let (name, arg) = match data.split_once(':') {
            Some((name, arg)) => (name, Some(arg.to_string())),
            None => (data, None),
        };
        let action = match (name, arg) {
            (MENU, None) => Self::Root,
            (START, None) => Self::StartPicker,
            (START, Some(id)) => Self::Start(id),
            (LIVE, None) => Self::LivePicker,
            (LIVE, Some(id)) => Self::Live(id),
            (STOP_SESSION_PREFIX, None) => Self::StopPicker,
            (STOP_SESSION_PREFIX, Some(id)) => Self::Stop(id),
            (DELETE, None) => Self::DeletePicker,
            (DELETE, Some(id)) => Self::Delete(id),
            (DELETE_CONFIRMED, Some(id)) => Self::DeleteConfirmed(id),
            _ => return None,
        };
        Some(action)
    }

    /// Session id named by the payload, if any.
    pub(crate) fn session_arg(&self) -> Option<&str> {
        match self {
            Self::Start(id)
            | Self::Live(id)
            | Self::Stop(id)
            | Self::Delete(id)
            | Self::DeleteConfirmed(id) => Some(id),
            _ => None,
        }
    }
}

/// What the menus need to know about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub active: bool,
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Menu {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Menu {
    fn new(text: impl Into<String>, rows: Vec<Vec<Button>>) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(Keyboard { rows }),
        }
    }

    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub(crate) fn markup(&self) -> Option<InlineKeyboardMarkup> {
        self.keyboard.as_ref().map(InlineKeyboardMarkup::from)
    }
}

fn back_row() -> Vec<Button> {
    vec![Button::new("🔙 to menu", MENU)]
}

fn picker(text: &str, prefix: &str, sessions: impl Iterator<Item = SessionSummary>) -> Menu {
    let mut rows: Vec<Vec<Button>> = sessions
        .map(|session| vec![Button::new(session.name, format!("{prefix}:{}", session.id))])
        .collect();
    rows.push(vec![Button::new("🔙", MENU)]);
    Menu::new(text, rows)
}

pub(crate) fn root(sessions: &[SessionSummary]) -> Menu {
    let active = sessions.iter().filter(|s| s.active).count();
    let text = format!(
        "Welcome to the enrichment system menu.\nThere are {} configured sessions, and {active} are active.",
        sessions.len()
    );
    Menu::new(
        text,
        vec![
            vec![Button::new("Start session", START)],
            vec![Button::new("Go live", LIVE)],
            vec![Button::new("End session", STOP_SESSION_PREFIX)],
            vec![Button::new("Delete session", DELETE)],
        ],
    )
}

pub(crate) fn start_picker(sessions: &[SessionSummary]) -> Menu {
    picker(
        "Which enrichment session would you like to start?",
        START,
        sessions.iter().filter(|s| !s.active).cloned(),
    )
}

pub(crate) fn live_picker(sessions: &[SessionSummary]) -> Menu {
    picker(
        "Which enrichment session should run live?",
        LIVE,
        sessions.iter().filter(|s| !s.live).cloned(),
    )
}

pub(crate) fn stop_picker(sessions: &[SessionSummary]) -> Menu {
    picker(
        "Which enrichment session would you like to stop?",
        STOP_SESSION_PREFIX,
        sessions.iter().filter(|s| s.active).cloned(),
    )
}

pub(crate) fn delete_picker(sessions: &[SessionSummary]) -> Menu {
    let mut rows: Vec<Vec<Button>> = sessions
        .iter()
        .map(|s| vec![Button::new(s.name.clone(), format!("{DELETE}:{}", s.id))])
        .collect();
    rows.push(back_row());
    Menu::new("Which session did you want to delete?", rows)
}

pub(crate) fn delete_confirm(session: &SessionSummary) -> Menu {
    Menu::new(
        format!(
            "Are you sure you want to delete the session: {}?",
            session.name
        ),
        vec![
            vec![Button::new(
                "Yes, delete the session.",
                format!("{DELETE_CONFIRMED}:{}", session.id),
            )],
            vec![Button::new("No, go back to menu 🔙", MENU)],
        ],
    )
}

pub(crate) fn deleted() -> Menu {
    Menu::new("Deleted session.", vec![back_row()])
}

pub(crate) fn started(name: &str) -> Menu {
    Menu::plain(format!("Session started: {name}"))
}

pub(crate) fn gone_live(name: &str) -> Menu {
    Menu::plain(format!(
        "Session is live: {name}\nNew items are posted as they appear."
    ))
}

pub(crate) fn stopped() -> Menu {
    Menu::new("Session ended.", vec![back_row()])
}

pub(crate) fn failed(action: &str, name: &str) -> Menu {
    Menu::new(
        format!("Could not {action} session {name}. Check the logs and try again."),
        vec![back_row()],
    )
}

pub(crate) fn no_matching_session(raw_id: &str) -> Menu {
    Menu::new(
        format!("No session matching the id: {raw_id}"),
        vec![back_row()],
    )
}

pub(crate) fn unknown(data: &str) -> Menu {
    Menu::new(
        format!("I do not understand this callback data yet: {data}"),
        vec![vec![Button::new("🔙", MENU)]],
    )
}

pub(crate) fn session_complete(name: &str) -> Menu {
    Menu::new(
        format!("Session complete: {name}\nEvery item has been labeled."),
        vec![back_row()],
    )
}

pub(crate) fn added_option(name: &str, label: &str) -> Menu {
    Menu::plain(format!("Added new option to {name}: {label}"))
}

pub(crate) fn status(rows: &[(SessionSummary, Option<Progress>)]) -> Menu {
    if rows.is_empty() {
        return Menu::plain("No sessions configured.");
    }
    let mut text = String::from("Labeling progress:");
    for (session, progress) in rows {
        let state = match (session.active, session.live) {
            (_, true) => "live",
            (true, false) => "active",
            (false, false) => "stopped",
        };
        let _ = match progress {
            Some(p) => write!(
                text,
                "\n{}: {}/{} labeled ({state})",
                session.name, p.completed, p.total
            ),
            None => write!(text, "\n{}: progress unavailable ({state})", session.name),
        };
    }
    Menu::plain(text)
}
