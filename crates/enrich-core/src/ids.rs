//! Identifier newtypes shared by the index, keyboards and the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram chat identifier.
pub type ChatId = i64;

/// External identifier of a data item, supplied by the item source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

macro_rules! compact_handle {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

compact_handle!(
    /// Per-session compact handle for an observed item. Never reused.
    ItemHandle,
    u32
);

compact_handle!(
    /// Per-session compact handle for a label string. Never reused.
    LabelHandle,
    u32
);

compact_handle!(
    /// Handle of a posted chat message (Telegram `message_id`).
    MessageHandle,
    i64
);

compact_handle!(
    /// Registry-assigned session identifier.
    SessionId,
    u32
);
