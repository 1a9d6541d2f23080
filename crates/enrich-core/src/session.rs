//! Session engine: batch refill, event dispatch and completion detection.
//!
//! A session owns its identifier index and its collaborators. Every method
//! that touches the chat takes the transport explicitly; callers serialize
//! access to one session (the bot keeps each behind a mutex).
//!
//! Each event is applied so that a delivery failure leaves the label store
//! untouched: chat calls that can fail happen before the store is written,
//! and the item stays eligible for the next refill.

use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::ids::{ChatId, ItemHandle, ItemId, MessageHandle, SessionId};
use crate::index::{IdIndex, IdIndexData};
use crate::keyboard::{Callback, Control, Keyboard, KeyboardSpec, build_keyboard};
use crate::labels::LabelStore;
use crate::source::{Item, ItemSource};
use crate::transport::ChatTransport;

/// An incoming user action addressed to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An inline button press with a decoded `enrich:` payload.
    Button(Callback),
    /// A text reply to one of the session's item messages.
    Reply {
        reply_to: MessageHandle,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// Messages posted by this refill.
    pub posted: usize,
    /// The source is exhausted and the session went inactive.
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub posted: usize,
    pub completed: bool,
    /// Label coined by a text reply.
    pub new_label: Option<String>,
    /// The event was valid but had nothing to do (e.g. replies while ad-hoc
    /// labels are disabled).
    pub ignored: bool,
    /// The event took effect but the follow-up refill failed. The next
    /// refill or tick retries it.
    pub refill_error: Option<String>,
}

impl DispatchReport {
    fn ignored() -> Self {
        Self {
            ignored: true,
            ..Self::default()
        }
    }
}

impl From<RefillReport> for DispatchReport {
    fn from(report: RefillReport) -> Self {
        Self {
            posted: report.posted,
            completed: report.completed,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Persisted snapshot of a session. The label store is saved on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub id: SessionId,
    pub config: SessionConfig,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub index: IdIndexData,
}

pub struct Session {
    id: SessionId,
    config: SessionConfig,
    active: bool,
    live: bool,
    index: IdIndex,
    source: Box<dyn ItemSource>,
    store: Box<dyn LabelStore>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        source: Box<dyn ItemSource>,
        store: Box<dyn LabelStore>,
    ) -> Self {
        let index = IdIndex::new(&config.labels, config.grid.capacity());
        Self {
            id,
            config,
            active: false,
            live: false,
            index,
            source,
            store,
        }
    }

    /// Rebuilds a session from its snapshot. Does not touch the label store.
    ///
    /// # Errors
    /// Returns `SessionError::CorruptState` if the index tables are invalid.
    pub fn restore(
        data: SessionData,
        source: Box<dyn ItemSource>,
        store: Box<dyn LabelStore>,
    ) -> Result<Self, SessionError> {
        let mut index = IdIndex::from_data(data.index, data.config.grid.capacity())?;
        // Labels added to the config after the snapshot was taken.
        for label in &data.config.labels {
            index.label_handle_for(label);
        }
        Ok(Self {
            id: data.id,
            config: data.config,
            active: data.active,
            live: data.live,
            index,
            source,
            store,
        })
    }

    pub fn to_data(&self) -> SessionData {
        SessionData {
            id: self.id,
            config: self.config.clone(),
            active: self.active,
            live: self.live,
            index: self.index.to_data(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn chat_id(&self) -> ChatId {
        self.config.chat_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn index(&self) -> &IdIndex {
        &self.index
    }

    /// Whether `message` is one of this session's open item posts.
    pub fn owns_message(&self, message: MessageHandle) -> bool {
        self.index.handle_for_message(message).is_some()
    }

    /// Completed vs. total items, counting completed items the source no
    /// longer lists.
    ///
    /// # Errors
    /// Returns source or store failures.
    pub fn progress(&mut self) -> Result<Progress, SessionError> {
        let items = self.source.list_items().map_err(SessionError::Source)?;
        let completed = self.store.list_completed().map_err(SessionError::Store)?;
        let mut all: HashSet<ItemId> = HashSet::with_capacity(items.len());
        for id in items.into_iter().map(|item| item.id).chain(completed.iter().cloned()) {
            self.index.handle_for(&id);
            all.insert(id);
        }
        Ok(Progress {
            completed: completed.len(),
            total: all.len(),
        })
    }

    /// Activates the session and fills the batch.
    ///
    /// # Errors
    /// Propagates source, store and delivery failures from the refill.
    pub async fn start(
        &mut self,
        transport: &dyn ChatTransport,
    ) -> Result<RefillReport, SessionError> {
        self.active = true;
        info!(session = %self.id, name = %self.config.name, "Session started");
        self.refill(transport).await
    }

    /// Switches to continuous mode; refills are then also driven by ticks.
    pub fn mark_live(&mut self) {
        self.active = true;
        self.live = true;
        info!(session = %self.id, name = %self.config.name, "Session is live");
    }

    /// Periodic refill for live sessions. A no-op otherwise.
    ///
    /// # Errors
    /// Same as [`Session::refill`].
    pub async fn tick(
        &mut self,
        transport: &dyn ChatTransport,
    ) -> Result<RefillReport, SessionError> {
        if !(self.active && self.live) {
            return Ok(RefillReport::default());
        }
        self.refill(transport).await
    }

    /// Tops the batch up to `batch_size` open items.
    ///
    /// When no incomplete items remain and the session is not live, the
    /// session goes inactive and the report says `completed`.
    ///
    /// # Errors
    /// Returns source/store failures, or the delivery error of the first post
    /// that fails. Posts made before the failure stay bound.
    pub async fn refill(
        &mut self,
        transport: &dyn ChatTransport,
    ) -> Result<RefillReport, SessionError> {
        if !self.active {
            return Ok(RefillReport::default());
        }

        let items = self.source.list_items().map_err(SessionError::Source)?;
        for item in &items {
            self.index.handle_for(&item.id);
        }
        let incomplete = self
            .store
            .remove_completed(items)
            .map_err(SessionError::Store)?;
        self.close_stale(transport, &incomplete).await;

        if incomplete.is_empty() && !self.live {
            self.active = false;
            self.live = false;
            info!(session = %self.id, name = %self.config.name, "All items labeled, session complete");
            return Ok(RefillReport {
                posted: 0,
                completed: true,
            });
        }

        let open = self.index.open_count();
        if open >= self.config.batch_size {
            return Ok(RefillReport::default());
        }

        let mut unposted: Vec<Item> = incomplete
            .into_iter()
            .filter(|item| {
                self.index
                    .existing_handle(&item.id)
                    .is_none_or(|handle| !self.index.has_open_message(handle))
            })
            .collect();
        if self.config.is_shuffled() {
            unposted.shuffle(&mut rand::rng());
        }
        unposted.truncate(self.config.batch_size - open);

        let mut posted = 0;
        for item in unposted {
            let handle = self.index.handle_for(&item.id);
            let keyboard = self.keyboard_for(handle)?;
            let message = transport
                .post(self.config.chat_id, &item.content, &keyboard)
                .await?;
            self.index.bind_message(handle, message);
            posted += 1;
            debug!(
                session = %self.id,
                item = %item.id,
                handle = %handle,
                message = %message,
                kind = item.content.kind(),
                "Posted item"
            );
        }

        Ok(RefillReport {
            posted,
            completed: false,
        })
    }

    /// Routes one user event.
    ///
    /// # Errors
    /// Unrecognized events (see [`SessionError::is_unrecognized`]) change
    /// nothing. Delivery failures abort before the label store is written.
    /// Once the event has taken effect, a failing refill no longer fails the
    /// dispatch; it is reported in [`DispatchReport::refill_error`].
    pub async fn dispatch(
        &mut self,
        transport: &dyn ChatTransport,
        event: SessionEvent,
    ) -> Result<DispatchReport, SessionError> {
        match event {
            SessionEvent::Button(callback) => self.handle_button(transport, callback).await,
            SessionEvent::Reply { reply_to, text } => {
                self.handle_reply(transport, reply_to, &text).await
            }
        }
    }

    /// Deletes every open message and deactivates the session.
    ///
    /// Always leaves no open items; delete failures are logged. Returns the
    /// number of messages unbound.
    pub async fn stop(&mut self, transport: &dyn ChatTransport) -> usize {
        let handles = self.index.open_handles();
        for handle in &handles {
            let Some(message) = self.index.unbind(*handle) else {
                continue;
            };
            if let Err(err) = transport.delete(self.config.chat_id, message).await {
                warn!(session = %self.id, message = %message, error = %err, "Failed to delete item message");
            }
        }
        if self.active {
            info!(session = %self.id, name = %self.config.name, "Session stopped");
        }
        self.active = false;
        self.live = false;
        handles.len()
    }

    async fn handle_button(
        &mut self,
        transport: &dyn ChatTransport,
        callback: Callback,
    ) -> Result<DispatchReport, SessionError> {
        if callback.session() != self.id {
            return Err(SessionError::MismatchedSession {
                expected: self.id,
                found: callback.session(),
            });
        }

        let handle = callback.item();
        let item = self.index.item_for(handle)?.clone();
        let message = self.index.message_for(handle)?;

        match callback {
            Callback::Control {
                control: control @ (Control::Prev | Control::Next),
                ..
            } => {
                let current = self.index.page_of(handle);
                let page = if control == Control::Prev {
                    self.index.prev_page_of(handle)
                } else {
                    self.index.next_page_of(handle)
                };
                if page == current {
                    return Ok(DispatchReport::ignored());
                }
                let selected = self.selected_labels(&item)?;
                let keyboard = self.render(handle, page, &selected);
                transport
                    .edit_keyboard(self.config.chat_id, message, &keyboard)
                    .await?;
                self.index.set_page(handle, page);
                Ok(DispatchReport::default())
            }
            Callback::Control {
                control: Control::Reroll,
                ..
            } => {
                self.close(transport, handle).await?;
                debug!(session = %self.id, item = %item, "Re-rolled item");
                Ok(self.refill_after(transport).await)
            }
            Callback::Control {
                control: Control::Done,
                ..
            } => {
                self.close(transport, handle).await?;
                self.store
                    .record_complete(&item)
                    .map_err(SessionError::Store)?;
                info!(session = %self.id, item = %item, "Item done");
                Ok(self.refill_after(transport).await)
            }
            Callback::Label { label, .. } => {
                let label = self.index.label_for(label)?.to_string();
                self.apply_label(transport, handle, &item, &label).await
            }
        }
    }

    async fn handle_reply(
        &mut self,
        transport: &dyn ChatTransport,
        reply_to: MessageHandle,
        text: &str,
    ) -> Result<DispatchReport, SessionError> {
        if !self.config.allow_new_labels {
            return Ok(DispatchReport::ignored());
        }
        let label = text.trim();
        if label.is_empty() {
            return Ok(DispatchReport::ignored());
        }

        let handle = self
            .index
            .handle_for_message(reply_to)
            .ok_or(SessionError::UnknownMessage(reply_to))?;
        let item = self.index.item_for(handle)?.clone();

        let is_new = self.index.existing_label_handle(label).is_none();
        let label_handle = self.index.label_handle_for(label);
        if is_new {
            info!(session = %self.id, label = %label, handle = %label_handle, "New label");
        }

        let mut report = self.apply_label(transport, handle, &item, label).await?;

        if is_new {
            for open in self.index.open_handles() {
                if open == handle {
                    continue;
                }
                if let Err(err) = self.rerender(transport, open).await {
                    warn!(session = %self.id, item = %open, error = %err, "Failed to refresh keyboard");
                }
            }
            report.new_label = Some(label.to_string());
        }
        Ok(report)
    }

    async fn apply_label(
        &mut self,
        transport: &dyn ChatTransport,
        handle: ItemHandle,
        item: &ItemId,
        label: &str,
    ) -> Result<DispatchReport, SessionError> {
        if self.config.multi_select {
            let mut selected = self.selected_labels(item)?;
            selected.insert(label.to_string());
            let keyboard = self.render(handle, self.index.page_of(handle), &selected);
            let message = self.index.message_for(handle)?;
            transport
                .edit_keyboard(self.config.chat_id, message, &keyboard)
                .await?;
            self.store
                .record_label(item, label)
                .map_err(SessionError::Store)?;
        } else {
            self.close(transport, handle).await?;
            self.store
                .record_label(item, label)
                .map_err(SessionError::Store)?;
            self.store
                .record_complete(item)
                .map_err(SessionError::Store)?;
        }
        info!(session = %self.id, item = %item, label = %label, "Labeled item");
        Ok(self.refill_after(transport).await)
    }

    async fn refill_after(&mut self, transport: &dyn ChatTransport) -> DispatchReport {
        match self.refill(transport).await {
            Ok(report) => report.into(),
            Err(err) => {
                warn!(session = %self.id, error = %err, "Refill after event failed");
                DispatchReport {
                    refill_error: Some(err.to_string()),
                    ..DispatchReport::default()
                }
            }
        }
    }

    /// Deletes the item's message and unbinds it.
    async fn close(
        &mut self,
        transport: &dyn ChatTransport,
        handle: ItemHandle,
    ) -> Result<(), SessionError> {
        let message = self.index.message_for(handle)?;
        transport.delete(self.config.chat_id, message).await?;
        self.index.unbind(handle);
        Ok(())
    }

    async fn rerender(
        &mut self,
        transport: &dyn ChatTransport,
        handle: ItemHandle,
    ) -> Result<(), SessionError> {
        let message = self.index.message_for(handle)?;
        let keyboard = self.keyboard_for(handle)?;
        transport
            .edit_keyboard(self.config.chat_id, message, &keyboard)
            .await?;
        Ok(())
    }

    /// Unbinds open items that are complete or no longer in the source.
    ///
    /// Left behind by a restore or by labels recorded elsewhere.
    async fn close_stale(&mut self, transport: &dyn ChatTransport, incomplete: &[Item]) {
        let wanted: HashSet<&ItemId> = incomplete.iter().map(|item| &item.id).collect();
        let stale: Vec<ItemHandle> = self
            .index
            .open_handles()
            .into_iter()
            .filter(|handle| {
                self.index
                    .item_for(*handle)
                    .is_ok_and(|item| !wanted.contains(item))
            })
            .collect();

        for handle in stale {
            let Some(message) = self.index.unbind(handle) else {
                continue;
            };
            debug!(session = %self.id, item = %handle, message = %message, "Closing stale item message");
            if let Err(err) = transport.delete(self.config.chat_id, message).await {
                warn!(session = %self.id, message = %message, error = %err, "Failed to delete stale message");
            }
        }
    }

    /// Keyboard for `handle` at its current page and recorded selection.
    ///
    /// # Errors
    /// Fails for unknown handles or when the label store cannot be read.
    pub fn keyboard_for(&self, handle: ItemHandle) -> Result<Keyboard, SessionError> {
        let item = self.index.item_for(handle)?;
        let selected = self.selected_labels(item)?;
        Ok(self.render(handle, self.index.page_of(handle), &selected))
    }

    fn selected_labels(&self, item: &ItemId) -> Result<BTreeSet<String>, SessionError> {
        self.store.labels_for(item).map_err(SessionError::Store)
    }

    fn render(&self, handle: ItemHandle, page: usize, selected: &BTreeSet<String>) -> Keyboard {
        build_keyboard(&KeyboardSpec {
            session: self.id,
            item: handle,
            labels: self.index.labels().collect(),
            page,
            selected,
            shape: self.config.grid,
            auto_sort: self.config.auto_sort_labels,
            multi_select: self.config.multi_select,
            shuffled: self.config.is_shuffled(),
        })
    }
}
