//! Correlation keys pairing replies with outstanding requests.

use std::fmt;

use crate::message::Message;

/// Identifies one in-flight request on a connection.
///
/// The key is `"<a>-<b>:<sequence>"`. A request is keyed by
/// receiver then sender, while the reply travelling the other way is keyed by
/// sender then receiver, so both sides produce the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Key under which a caller waits for the reply to `request`.
    #[must_use]
    pub fn for_request(request: &Message) -> Self {
        Self::compose(request.receiver(), request.sender(), request.sequence())
    }

    /// Key addressed by an incoming `reply`.
    #[must_use]
    pub fn for_reply(reply: &Message) -> Self {
        Self::compose(reply.sender(), reply.receiver(), reply.sequence())
    }

    /// Key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn compose(first: Option<&str>, second: Option<&str>, sequence: Option<&str>) -> Self {
        Self(format!(
            "{}-{}:{}",
            first.unwrap_or_default(),
            second.unwrap_or_default(),
            sequence.unwrap_or_default()
        ))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}
