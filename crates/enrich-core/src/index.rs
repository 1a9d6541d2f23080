//! Per-session identifier index.
//!
//! Keeps the bidirectional tables that map external, unstable identifiers
//! (item ids, chat messages, label strings) to the compact handles that fit
//! inside a button payload, plus the page cursor of every item's keyboard.
//!
//! Handles are allocated monotonically and never reclaimed. A restored index
//! resumes every counter above the highest handle it has ever issued.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SessionError;
use crate::ids::{ItemHandle, ItemId, LabelHandle, MessageHandle};

/// Number of pages needed to show `label_count` labels, `capacity` per page.
pub fn page_count(label_count: usize, capacity: usize) -> usize {
    if capacity == 0 {
        return 0;
    }
    label_count.div_ceil(capacity)
}

#[derive(Debug, Clone)]
pub struct IdIndex {
    items: BTreeMap<ItemHandle, ItemId>,
    item_handles: HashMap<ItemId, ItemHandle>,
    next_item: u32,
    messages: BTreeMap<ItemHandle, MessageHandle>,
    message_items: HashMap<MessageHandle, ItemHandle>,
    labels: BTreeMap<LabelHandle, String>,
    label_handles: HashMap<String, LabelHandle>,
    next_label: u32,
    pages: HashMap<ItemHandle, usize>,
    page_capacity: usize,
}

impl IdIndex {
    /// Creates an empty index seeded with the session's initial labels.
    pub fn new<I, S>(labels: I, page_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self {
            items: BTreeMap::new(),
            item_handles: HashMap::new(),
            next_item: 0,
            messages: BTreeMap::new(),
            message_items: HashMap::new(),
            labels: BTreeMap::new(),
            label_handles: HashMap::new(),
            next_label: 0,
            pages: HashMap::new(),
            page_capacity,
        };
        for label in labels {
            index.label_handle_for(label.as_ref());
        }
        index
    }

    /// Returns the handle for `item`, allocating the next one on first sight.
    pub fn handle_for(&mut self, item: &ItemId) -> ItemHandle {
        if let Some(handle) = self.item_handles.get(item) {
            return *handle;
        }
        let handle = ItemHandle(self.next_item);
        self.next_item += 1;
        self.items.insert(handle, item.clone());
        self.item_handles.insert(item.clone(), handle);
        handle
    }

    /// Looks up a handle without allocating.
    pub fn existing_handle(&self, item: &ItemId) -> Option<ItemHandle> {
        self.item_handles.get(item).copied()
    }

    pub fn item_for(&self, handle: ItemHandle) -> Result<&ItemId, SessionError> {
        self.items
            .get(&handle)
            .ok_or(SessionError::UnknownHandle(handle))
    }

    /// Records that `handle` now has a live post.
    pub fn bind_message(&mut self, handle: ItemHandle, message: MessageHandle) {
        if let Some(previous) = self.messages.insert(handle, message) {
            warn!(
                item = %handle,
                previous = %previous,
                message = %message,
                "Overwriting a live message binding"
            );
            self.message_items.remove(&previous);
        }
        self.message_items.insert(message, handle);
    }

    /// Clears the message binding; the item handle itself is kept.
    pub fn unbind(&mut self, handle: ItemHandle) -> Option<MessageHandle> {
        let message = self.messages.remove(&handle)?;
        self.message_items.remove(&message);
        Some(message)
    }

    pub fn message_for(&self, handle: ItemHandle) -> Result<MessageHandle, SessionError> {
        self.messages
            .get(&handle)
            .copied()
            .ok_or(SessionError::NoOpenMessage(handle))
    }

    pub fn handle_for_message(&self, message: MessageHandle) -> Option<ItemHandle> {
        self.message_items.get(&message).copied()
    }

    pub fn has_open_message(&self, handle: ItemHandle) -> bool {
        self.messages.contains_key(&handle)
    }

    /// All handles with a live message, in handle order.
    pub fn open_handles(&self) -> Vec<ItemHandle> {
        self.messages.keys().copied().collect()
    }

    pub fn open_count(&self) -> usize {
        self.messages.len()
    }

    pub fn label_handle_for(&mut self, label: &str) -> LabelHandle {
        if let Some(handle) = self.label_handles.get(label) {
            return *handle;
        }
        let handle = LabelHandle(self.next_label);
        self.next_label += 1;
        self.labels.insert(handle, label.to_string());
        self.label_handles.insert(label.to_string(), handle);
        handle
    }

    pub fn existing_label_handle(&self, label: &str) -> Option<LabelHandle> {
        self.label_handles.get(label).copied()
    }

    pub fn label_for(&self, handle: LabelHandle) -> Result<&str, SessionError> {
        self.labels
            .get(&handle)
            .map(String::as_str)
            .ok_or(SessionError::UnknownLabel(handle))
    }

    /// Labels in allocation order, which is also their unsorted display order.
    pub fn labels(&self) -> impl Iterator<Item = (LabelHandle, &str)> {
        self.labels
            .iter()
            .map(|(handle, label)| (*handle, label.as_str()))
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    pub fn page_count(&self) -> usize {
        page_count(self.labels.len(), self.page_capacity)
    }

    fn last_page(&self) -> usize {
        self.page_count().saturating_sub(1)
    }

    pub fn page_of(&self, handle: ItemHandle) -> usize {
        self.pages
            .get(&handle)
            .copied()
            .unwrap_or(0)
            .min(self.last_page())
    }

    /// Moves the cursor, clamping out-of-range pages. Returns the stored page.
    pub fn set_page(&mut self, handle: ItemHandle, page: usize) -> usize {
        let page = page.min(self.last_page());
        if page == 0 {
            self.pages.remove(&handle);
        } else {
            self.pages.insert(handle, page);
        }
        page
    }

    /// The page `next` would move to, clamped at the last page.
    pub fn next_page_of(&self, handle: ItemHandle) -> usize {
        (self.page_of(handle) + 1).min(self.last_page())
    }

    /// The page `prev` would move to, clamped at the first page.
    pub fn prev_page_of(&self, handle: ItemHandle) -> usize {
        self.page_of(handle).saturating_sub(1)
    }

    pub fn to_data(&self) -> IdIndexData {
        IdIndexData {
            items: self.items.clone(),
            next_item: self.next_item,
            messages: self.messages.clone(),
            labels: self.labels.clone(),
            next_label: self.next_label,
            pages: self
                .pages
                .iter()
                .map(|(handle, page)| (*handle, *page))
                .collect(),
        }
    }

    /// Restores an index, rejecting tables that are not one-to-one.
    ///
    /// # Errors
    /// Returns `SessionError::CorruptState` when two handles share an item,
    /// label or message, or when a binding or cursor names an unknown item.
    pub fn from_data(data: IdIndexData, page_capacity: usize) -> Result<Self, SessionError> {
        let mut item_handles = HashMap::with_capacity(data.items.len());
        for (handle, item) in &data.items {
            if item_handles.insert(item.clone(), *handle).is_some() {
                return Err(SessionError::CorruptState(format!(
                    "item {item} has more than one handle"
                )));
            }
        }

        let mut label_handles = HashMap::with_capacity(data.labels.len());
        for (handle, label) in &data.labels {
            if label_handles.insert(label.clone(), *handle).is_some() {
                return Err(SessionError::CorruptState(format!(
                    "label {label:?} has more than one handle"
                )));
            }
        }

        let mut message_items = HashMap::with_capacity(data.messages.len());
        for (handle, message) in &data.messages {
            if !data.items.contains_key(handle) {
                return Err(SessionError::CorruptState(format!(
                    "message {message} is bound to unknown item {handle}"
                )));
            }
            if message_items.insert(*message, *handle).is_some() {
                return Err(SessionError::CorruptState(format!(
                    "message {message} is bound to more than one item"
                )));
            }
        }

        if let Some(handle) = data.pages.keys().find(|h| !data.items.contains_key(h)) {
            return Err(SessionError::CorruptState(format!(
                "page cursor for unknown item {handle}"
            )));
        }

        let next_item = data
            .items
            .keys()
            .next_back()
            .map_or(0, |h| h.get() + 1)
            .max(data.next_item);
        let next_label = data
            .labels
            .keys()
            .next_back()
            .map_or(0, |h| h.get() + 1)
            .max(data.next_label);

        let mut index = Self {
            items: data.items,
            item_handles,
            next_item,
            messages: data.messages,
            message_items,
            labels: data.labels,
            label_handles,
            next_label,
            pages: HashMap::new(),
            page_capacity,
        };
        for (handle, page) in data.pages {
            index.set_page(handle, page);
        }
        Ok(index)
    }
}

/// Serialized form of [`IdIndex`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdIndexData {
    pub items: BTreeMap<ItemHandle, ItemId>,
    pub next_item: u32,
    pub messages: BTreeMap<ItemHandle, MessageHandle>,
    pub labels: BTreeMap<LabelHandle, String>,
    pub next_label: u32,
    pub pages: BTreeMap<ItemHandle, usize>,
}
