//! Core enrichment library (identifier index, keyboards, session engine, config).

pub mod config;
pub mod error;
pub mod ids;
pub mod index;
pub mod keyboard;
pub mod labels;
pub mod session;
pub mod source;
pub mod state;
pub mod transport;

pub use error::{DeliveryError, SessionError};
pub use ids::{ChatId, ItemHandle, ItemId, LabelHandle, MessageHandle, SessionId};
