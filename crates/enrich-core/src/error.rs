use thiserror::Error;

use crate::ids::{ItemHandle, LabelHandle, MessageHandle, SessionId};

/// Failure reported by the chat transport when posting, editing or deleting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised by the index and the session engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("unknown item handle {0}")]
    UnknownHandle(ItemHandle),

    #[error("unknown label handle {0}")]
    UnknownLabel(LabelHandle),

    #[error("item {0} has no open message")]
    NoOpenMessage(ItemHandle),

    #[error("message {0} does not belong to an open item")]
    UnknownMessage(MessageHandle),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("no session with id {0}")]
    UnknownSession(String),

    #[error("payload names session {found}, expected {expected}")]
    MismatchedSession { expected: SessionId, found: SessionId },

    #[error("malformed callback payload: {0}")]
    MalformedPayload(String),

    #[error("item source failed: {0:#}")]
    Source(#[source] anyhow::Error),

    #[error("label store failed: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("corrupt session state: {0}")]
    CorruptState(String),
}

impl SessionError {
    /// Errors that mean "this event was not understood" rather than a fault.
    ///
    /// These are reported back to the user and never abort the session.
    pub fn is_unrecognized(&self) -> bool {
        matches!(
            self,
            Self::UnknownHandle(_)
                | Self::UnknownLabel(_)
                | Self::NoOpenMessage(_)
                | Self::UnknownMessage(_)
                | Self::UnknownSession(_)
                | Self::MismatchedSession { .. }
                | Self::MalformedPayload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logic_errors_are_unrecognized() {
        assert!(SessionError::UnknownHandle(ItemHandle(3)).is_unrecognized());
        assert!(SessionError::NoOpenMessage(ItemHandle(1)).is_unrecognized());
        assert!(SessionError::MalformedPayload("x".into()).is_unrecognized());
        assert!(
            SessionError::MismatchedSession {
                expected: SessionId(1),
                found: SessionId(2),
            }
            .is_unrecognized()
        );
    }

    #[test]
    fn faults_are_not_unrecognized() {
        assert!(!SessionError::Delivery(DeliveryError::new("chat not found")).is_unrecognized());
        assert!(!SessionError::Store(anyhow::anyhow!("disk full")).is_unrecognized());
    }

    #[test]
    fn delivery_error_message_is_preserved() {
        let err = SessionError::from(DeliveryError::new("Bad Request: chat not found"));
        assert_eq!(
            err.to_string(),
            "delivery failed: Bad Request: chat not found"
        );
    }
}
