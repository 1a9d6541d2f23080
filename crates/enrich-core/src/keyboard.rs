//! Inline keyboard layout and callback payload codec.
//!
//! The builder is pure: given the label list, the item's page cursor and its
//! current selection it lays out a grid of label buttons followed by a
//! control row and a final "End session" row.
//!
//! Payloads carry compact handles only, so they stay within Telegram's
//! 64-byte `callback_data` limit:
//! - `enrich:<session>:<item>:<label>` for label buttons
//! - `enrich:<session>:<item>:<prev|next|reroll|done>` for controls
//! - `stop_session:<session>` for the end-session button

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::ids::{ItemHandle, LabelHandle, SessionId};
use crate::index::page_count;

/// Prefix of every payload routed to a session engine.
pub const CALLBACK_PREFIX: &str = "enrich";
/// Prefix of the end-session payload, handled by the session registry.
pub const STOP_SESSION_PREFIX: &str = "stop_session";
/// Telegram rejects `callback_data` longer than this many bytes.
pub const MAX_PAYLOAD_BYTES: usize = 64;

const SELECTED_MARKER: &str = "✔ ";

/// Label grid dimensions per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridShape {
    pub rows: usize,
    pub columns: usize,
}

impl Default for GridShape {
    fn default() -> Self {
        Self {
            rows: 5,
            columns: 3,
        }
    }
}

impl GridShape {
    pub fn capacity(self) -> usize {
        self.rows * self.columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub payload: String,
}

impl Button {
    pub fn new(text: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    pub fn find(&self, text: &str) -> Option<&Button> {
        self.buttons().find(|button| button.text == text)
    }
}

/// Reserved navigation/flow controls, sent in the label slot of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Prev,
    Next,
    Reroll,
    Done,
}

impl Control {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prev => "prev",
            Self::Next => "next",
            Self::Reroll => "reroll",
            Self::Done => "done",
        }
    }

    const fn button_text(self) -> &'static str {
        match self {
            Self::Prev => "⬅️ Prev page",
            Self::Next => "➡️ Next page",
            Self::Reroll => "🎲 Re-roll",
            Self::Done => "🖊️ Done",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "prev" => Some(Self::Prev),
            "next" => Some(Self::Next),
            "reroll" => Some(Self::Reroll),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Decoded `enrich:` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Label {
        session: SessionId,
        item: ItemHandle,
        label: LabelHandle,
    },
    Control {
        session: SessionId,
        item: ItemHandle,
        control: Control,
    },
}

impl Callback {
    pub fn session(&self) -> SessionId {
        match self {
            Self::Label { session, .. } | Self::Control { session, .. } => *session,
        }
    }

    pub fn item(&self) -> ItemHandle {
        match self {
            Self::Label { item, .. } | Self::Control { item, .. } => *item,
        }
    }

    /// Parses a payload produced by [`Callback`]'s `Display`.
    ///
    /// # Errors
    /// Returns `SessionError::MalformedPayload` for anything else.
    pub fn parse(data: &str) -> Result<Self, SessionError> {
        let malformed = || SessionError::MalformedPayload(data.to_string());
        let mut parts = data.split(':');
        if parts.next() != Some(CALLBACK_PREFIX) {
            return Err(malformed());
        }
        let session = parts
            .next()
            .and_then(|part| part.parse().ok())
            .map(SessionId)
            .ok_or_else(malformed)?;
        let item = parts
            .next()
            .and_then(|part| part.parse().ok())
            .map(ItemHandle)
            .ok_or_else(malformed)?;
        let slot = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        if let Some(control) = Control::parse(slot) {
            return Ok(Self::Control {
                session,
                item,
                control,
            });
        }
        let label = slot.parse().map(LabelHandle).map_err(|_| malformed())?;
        Ok(Self::Label {
            session,
            item,
            label,
        })
    }
}

impl FromStr for Callback {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label {
                session,
                item,
                label,
            } => write!(f, "{CALLBACK_PREFIX}:{session}:{item}:{label}"),
            Self::Control {
                session,
                item,
                control,
            } => write!(f, "{CALLBACK_PREFIX}:{session}:{item}:{}", control.as_str()),
        }
    }
}

pub fn stop_session_payload(session: SessionId) -> String {
    format!("{STOP_SESSION_PREFIX}:{session}")
}

/// Everything the builder needs to render one item's keyboard.
#[derive(Debug, Clone)]
pub struct KeyboardSpec<'a> {
    pub session: SessionId,
    pub item: ItemHandle,
    /// Labels in allocation order.
    pub labels: Vec<(LabelHandle, &'a str)>,
    pub page: usize,
    pub selected: &'a BTreeSet<String>,
    pub shape: GridShape,
    pub auto_sort: bool,
    pub multi_select: bool,
    pub shuffled: bool,
}

pub fn build_keyboard(spec: &KeyboardSpec<'_>) -> Keyboard {
    let mut labels = spec.labels.clone();
    if spec.auto_sort {
        labels.sort_by(|a, b| a.1.cmp(b.1));
    }

    let capacity = spec.shape.capacity().max(1);
    let pages = page_count(labels.len(), capacity);
    let page = spec.page.min(pages.saturating_sub(1));
    let on_page: Vec<_> = labels.into_iter().skip(page * capacity).take(capacity).collect();
    let columns = on_page.len().div_ceil(spec.shape.rows.max(1)).max(1);

    let mut rows: Vec<Vec<Button>> = on_page
        .chunks(columns)
        .map(|chunk| {
            chunk
                .iter()
                .map(|(handle, label)| {
                    let marker = if spec.selected.contains(*label) {
                        SELECTED_MARKER
                    } else {
                        ""
                    };
                    let payload = Callback::Label {
                        session: spec.session,
                        item: spec.item,
                        label: *handle,
                    };
                    Button::new(format!("{marker}{label}"), payload.to_string())
                })
                .collect()
        })
        .collect();

    let control = |control: Control| {
        let payload = Callback::Control {
            session: spec.session,
            item: spec.item,
            control,
        };
        Button::new(control.button_text(), payload.to_string())
    };

    let mut controls = Vec::new();
    if pages > 1 && page > 0 {
        controls.push(control(Control::Prev));
    }
    if spec.multi_select {
        controls.push(control(Control::Done));
    }
    if spec.shuffled {
        controls.push(control(Control::Reroll));
    }
    if pages > 1 && page + 1 < pages {
        controls.push(control(Control::Next));
    }
    if !controls.is_empty() {
        rows.push(controls);
    }

    rows.push(vec![Button::new(
        "End session",
        stop_session_payload(spec.session),
    )]);

    debug_assert!(
        rows.iter()
            .flatten()
            .all(|button| button.payload.len() <= MAX_PAYLOAD_BYTES)
    );
    Keyboard { rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&'static str]) -> Vec<(LabelHandle, &'static str)> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (LabelHandle(i as u32), *name))
            .collect()
    }

    fn spec<'a>(
        labels: Vec<(LabelHandle, &'a str)>,
        selected: &'a BTreeSet<String>,
    ) -> KeyboardSpec<'a> {
        KeyboardSpec {
            session: SessionId(4),
            item: ItemHandle(12),
            labels,
            page: 0,
            selected,
            shape: GridShape::default(),
            auto_sort: false,
            multi_select: false,
            shuffled: false,
        }
    }

    fn texts(row: &[Button]) -> Vec<&str> {
        row.iter().map(|b| b.text.as_str()).collect()
    }

    #[test]
    fn small_label_set_is_one_column() {
        let selected = BTreeSet::new();
        let keyboard = build_keyboard(&spec(labels(&["a", "b", "c"]), &selected));
        assert_eq!(keyboard.rows.len(), 4);
        assert_eq!(texts(&keyboard.rows[0]), vec!["a"]);
        assert_eq!(texts(&keyboard.rows[2]), vec!["c"]);
        assert_eq!(texts(&keyboard.rows[3]), vec!["End session"]);
        assert_eq!(keyboard.rows[3][0].payload, "stop_session:4");
    }

    #[test]
    fn label_payload_carries_handles() {
        let selected = BTreeSet::new();
        let keyboard = build_keyboard(&spec(labels(&["a", "b"]), &selected));
        assert_eq!(keyboard.rows[1][0].payload, "enrich:4:12:1");
    }

    #[test]
    fn full_page_fills_row_major() {
        let names: Vec<String> = (0..15).map(|i| format!("l{i:02}")).collect();
        let owned: Vec<(LabelHandle, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (LabelHandle(i as u32), n.as_str()))
            .collect();
        let selected = BTreeSet::new();
        let keyboard = build_keyboard(&spec(owned, &selected));
        assert_eq!(keyboard.rows.len(), 6);
        assert_eq!(texts(&keyboard.rows[0]), vec!["l00", "l01", "l02"]);
        assert_eq!(texts(&keyboard.rows[4]), vec!["l12", "l13", "l14"]);
    }

    #[test]
    fn paging_controls_appear_at_the_right_pages() {
        let names: Vec<String> = (0..32).map(|i| format!("l{i:02}")).collect();
        let owned: Vec<(LabelHandle, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (LabelHandle(i as u32), n.as_str()))
            .collect();
        let selected = BTreeSet::new();

        let mut first = spec(owned.clone(), &selected);
        first.page = 0;
        let keyboard = build_keyboard(&first);
        assert!(keyboard.find("➡️ Next page").is_some());
        assert!(keyboard.find("⬅️ Prev page").is_none());

        let mut middle = spec(owned.clone(), &selected);
        middle.page = 1;
        let keyboard = build_keyboard(&middle);
        assert!(keyboard.find("➡️ Next page").is_some());
        assert!(keyboard.find("⬅️ Prev page").is_some());
        assert_eq!(keyboard.rows[0][0].text, "l15");

        let mut last = spec(owned, &selected);
        last.page = 2;
        let keyboard = build_keyboard(&last);
        assert!(keyboard.find("➡️ Next page").is_none());
        assert_eq!(texts(&keyboard.rows[0]), vec!["l30"]);
        assert_eq!(texts(&keyboard.rows[1]), vec!["l31"]);
        assert_eq!(
            keyboard.find("⬅️ Prev page").unwrap().payload,
            "enrich:4:12:prev"
        );
    }

    #[test]
    fn control_row_order_matches_mode_flags() {
        let names: Vec<String> = (0..40).map(|i| format!("l{i:02}")).collect();
        let owned: Vec<(LabelHandle, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (LabelHandle(i as u32), n.as_str()))
            .collect();
        let selected = BTreeSet::new();
        let mut full = spec(owned, &selected);
        full.page = 1;
        full.multi_select = true;
        full.shuffled = true;
        let keyboard = build_keyboard(&full);
        let controls = &keyboard.rows[keyboard.rows.len() - 2];
        assert_eq!(
            texts(controls),
            vec!["⬅️ Prev page", "🖊️ Done", "🎲 Re-roll", "➡️ Next page"]
        );
    }

    #[test]
    fn selected_labels_are_marked() {
        let selected: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let keyboard = build_keyboard(&spec(labels(&["a", "b"]), &selected));
        assert_eq!(keyboard.rows[1][0].text, "✔ b");
        assert_eq!(keyboard.rows[1][0].payload, "enrich:4:12:1");
    }

    #[test]
    fn auto_sort_reorders_display_but_keeps_handles() {
        let selected = BTreeSet::new();
        let mut sorted = spec(labels(&["zebra", "apple"]), &selected);
        sorted.auto_sort = true;
        let keyboard = build_keyboard(&sorted);
        assert_eq!(keyboard.rows[0][0].text, "apple");
        assert_eq!(keyboard.rows[0][0].payload, "enrich:4:12:1");
    }

    #[test]
    fn empty_label_set_still_offers_end_session() {
        let selected = BTreeSet::new();
        let keyboard = build_keyboard(&spec(Vec::new(), &selected));
        assert_eq!(keyboard.rows.len(), 1);
        assert_eq!(keyboard.rows[0][0].text, "End session");
    }

    #[test]
    fn callback_parse_accepts_labels_and_controls() {
        assert_eq!(
            Callback::parse("enrich:1:2:3").unwrap(),
            Callback::Label {
                session: SessionId(1),
                item: ItemHandle(2),
                label: LabelHandle(3),
            }
        );
        assert_eq!(
            "enrich:1:2:reroll".parse::<Callback>().unwrap(),
            Callback::Control {
                session: SessionId(1),
                item: ItemHandle(2),
                control: Control::Reroll,
            }
        );
    }

    #[test]
    fn callback_parse_rejects_garbage() {
        for data in [
            "",
            "enrich",
            "enrich:1:2",
            "enrich:x:2:3",
            "enrich:1:-2:3",
            "enrich:1:2:maybe",
            "enrich:1:2:3:4",
            "menu:1:2:3",
        ] {
            assert!(
                matches!(Callback::parse(data), Err(SessionError::MalformedPayload(_))),
                "{data} should be rejected"
            );
        }
    }

    #[test]
    fn largest_payload_fits_telegram_limit() {
        let payload = Callback::Label {
            session: SessionId(u32::MAX),
            item: ItemHandle(u32::MAX),
            label: LabelHandle(u32::MAX),
        }
        .to_string();
        assert!(payload.len() <= MAX_PAYLOAD_BYTES);
        assert!(stop_session_payload(SessionId(u32::MAX)).len() <= MAX_PAYLOAD_BYTES);
    }
}
