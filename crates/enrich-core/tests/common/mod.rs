#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use enrich_core::config::{ItemOrder, SessionConfig};
use enrich_core::ids::{ChatId, ItemId, MessageHandle, SessionId};
use enrich_core::keyboard::{Button, GridShape, Keyboard};
use enrich_core::labels::LabelStore;
use enrich_core::session::Session;
use enrich_core::source::{Item, ItemContent, ItemSource, SourceSpec};
use enrich_core::transport::{ChatTransport, TransportFuture};
use enrich_core::DeliveryError;

pub const CHAT: ChatId = 555;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Post,
    Edit,
    Delete,
}

#[derive(Debug, Clone)]
pub struct Posted {
    pub content: ItemContent,
    pub keyboard: Keyboard,
}

#[derive(Default)]
struct TransportState {
    next_message: i64,
    live: BTreeMap<MessageHandle, Posted>,
    calls: Vec<(Op, MessageHandle)>,
    fail_next: Option<Op>,
}

/// In-memory chat that remembers every live message and its keyboard.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState {
                next_message: 1000,
                ..TransportState::default()
            }),
        }
    }

    pub fn fail_next(&self, op: Op) {
        self.state.lock().unwrap().fail_next = Some(op);
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(kind, _)| *kind == op)
            .count()
    }

    /// Texts of the live text messages, in posting order.
    pub fn live_texts(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .live
            .values()
            .filter_map(|posted| match &posted.content {
                ItemContent::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn message_with_text(&self, text: &str) -> MessageHandle {
        let state = self.state.lock().unwrap();
        state
            .live
            .iter()
            .find(|(_, posted)| matches!(&posted.content, ItemContent::Text(t) if t == text))
            .map(|(message, _)| *message)
            .unwrap_or_else(|| panic!("no live message with text {text}"))
    }

    pub fn keyboard(&self, message: MessageHandle) -> Keyboard {
        self.state.lock().unwrap().live[&message].keyboard.clone()
    }

    pub fn button(&self, message: MessageHandle, text: &str) -> Button {
        self.keyboard(message)
            .find(text)
            .cloned()
            .unwrap_or_else(|| panic!("no button {text} on message {message}"))
    }

    fn take_failure(state: &mut TransportState, op: Op) -> Result<(), DeliveryError> {
        if state.fail_next == Some(op) {
            state.fail_next = None;
            return Err(DeliveryError::new(format!("{op:?} refused")));
        }
        Ok(())
    }
}

impl ChatTransport for FakeTransport {
    fn post<'a>(
        &'a self,
        chat: ChatId,
        content: &'a ItemContent,
        keyboard: &'a Keyboard,
    ) -> TransportFuture<'a, MessageHandle> {
        Box::pin(async move {
            assert_eq!(chat, CHAT);
            let mut state = self.state.lock().unwrap();
            Self::take_failure(&mut state, Op::Post)?;
            state.next_message += 1;
            let message = MessageHandle(state.next_message);
            state.live.insert(
                message,
                Posted {
                    content: content.clone(),
                    keyboard: keyboard.clone(),
                },
            );
            state.calls.push((Op::Post, message));
            Ok(message)
        })
    }

    fn edit_keyboard<'a>(
        &'a self,
        _chat: ChatId,
        message: MessageHandle,
        keyboard: &'a Keyboard,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_failure(&mut state, Op::Edit)?;
            let Some(posted) = state.live.get_mut(&message) else {
                return Err(DeliveryError::new("message to edit not found"));
            };
            posted.keyboard = keyboard.clone();
            state.calls.push((Op::Edit, message));
            Ok(())
        })
    }

    fn delete(&self, _chat: ChatId, message: MessageHandle) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_failure(&mut state, Op::Delete)?;
            if state.live.remove(&message).is_none() {
                return Err(DeliveryError::new("message to delete not found"));
            }
            state.calls.push((Op::Delete, message));
            Ok(())
        })
    }
}

/// Items whose id doubles as their text.
pub struct VecSource(pub Vec<Item>);

impl VecSource {
    pub fn texts(ids: &[&str]) -> Self {
        Self(
            ids.iter()
                .map(|id| Item {
                    id: ItemId::from(*id),
                    content: ItemContent::Text((*id).to_string()),
                })
                .collect(),
        )
    }
}

impl ItemSource for VecSource {
    fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default, Clone)]
struct Record {
    labels: BTreeSet<String>,
    complete: bool,
}

/// Label store whose contents stay inspectable after the session owns it.
#[derive(Clone, Default)]
pub struct SharedStore {
    records: Arc<Mutex<BTreeMap<ItemId, Record>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl SharedStore {
    pub fn labels(&self, id: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .get(&ItemId::from(id))
            .map(|r| r.labels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn complete(&self, id: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .get(&ItemId::from(id))
            .is_some_and(|r| r.complete)
    }

    pub fn mark_complete(&self, id: &str) {
        self.records
            .lock()
            .unwrap()
            .entry(ItemId::from(id))
            .or_default()
            .complete = true;
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    fn check_writable(&self) -> Result<()> {
        if *self.fail_writes.lock().unwrap() {
            bail!("label store is read-only");
        }
        Ok(())
    }
}

impl LabelStore for SharedStore {
    fn is_complete(&self, item: &ItemId) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(item)
            .is_some_and(|r| r.complete))
    }

    fn list_completed(&self) -> Result<Vec<ItemId>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.complete)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn record_label(&mut self, item: &ItemId, label: &str) -> Result<()> {
        self.check_writable()?;
        self.records
            .lock()
            .unwrap()
            .entry(item.clone())
            .or_default()
            .labels
            .insert(label.to_string());
        Ok(())
    }

    fn record_complete(&mut self, item: &ItemId) -> Result<()> {
        self.check_writable()?;
        self.records
            .lock()
            .unwrap()
            .entry(item.clone())
            .or_default()
            .complete = true;
        Ok(())
    }

    fn labels_for(&self, item: &ItemId) -> Result<BTreeSet<String>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(item)
            .map(|r| r.labels.clone())
            .unwrap_or_default())
    }
}

pub fn session_config(labels: &[&str]) -> SessionConfig {
    SessionConfig {
        name: "test".to_string(),
        chat_id: CHAT,
        batch_size: 2,
        order: ItemOrder::Sequential,
        allow_new_labels: false,
        auto_sort_labels: false,
        multi_select: false,
        labels: labels.iter().map(|l| (*l).to_string()).collect(),
        grid: GridShape::default(),
        source: SourceSpec::Directory {
            path: "/unused".into(),
        },
        output: None,
    }
}

pub fn session(config: SessionConfig, items: &[&str], store: &SharedStore) -> Session {
    Session::new(
        SessionId(1),
        config,
        Box::new(VecSource::texts(items)),
        Box::new(store.clone()),
    )
}
