//! Callbacks through which the transport reports to its owner.

use std::fmt;

use crate::message::Message;

/// Human-readable description of a connection problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    message: String,
    reason: String,
}

impl ErrorInfo {
    /// Creates a description from a summary and a detailed reason.
    #[must_use]
    pub fn new(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: reason.into(),
        }
    }

    /// Short summary, such as `"Lost connection"`.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying cause.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.message, self.reason)
    }
}

/// Receives inbound traffic and connection lifecycle events.
///
/// Message callbacks run on the worker pool, never on the read loop, so a
/// slow listener cannot stall reply delivery. Lifecycle callbacks run on
/// whichever thread observed the event.
pub trait CommListener: Send + Sync {
    /// Answers a request initiated by the server.
    ///
    /// The returned message is sent back stamped as a `response` unless it
    /// is already an `error`, with sender and receiver swapped and the
    /// request's sequence copied.
    fn receive_request(&self, request: &Message) -> Message;

    /// Handles a notification, prompt, display text, one-way message or
    /// unsolicited error.
    fn receive_message(&self, message: Message);

    /// Called once when an established connection fails.
    fn connection_lost(&self, error: &ErrorInfo);

    /// Called when [`connect`](crate::ConnectionManager::connect) fails.
    fn connection_failed(&self, error: &ErrorInfo);

    /// Called after a deliberate [`disconnect`](crate::ConnectionManager::disconnect).
    fn connection_closed(&self);
}
