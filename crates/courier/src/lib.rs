//! Client transport for a framed, key-value TCP protocol.
//!
//! The crate connects to an execution server, performs a two-byte session
//! key handshake, and then exchanges length-prefixed binary frames. Each
//! frame carries one [`Message`]: an ordered list of named fields. Requests
//! are correlated with their replies by sender, receiver and sequence, so
//! any number of threads can wait on [`ConnectionManager::send_request`] at
//! the same time while a single reader thread demultiplexes replies.
//!
//! Inbound notifications and server-initiated requests are delivered to a
//! [`CommListener`] on a bounded worker pool.

mod codec;
mod connection;
mod correlation;
mod dispatch;
mod link;
mod listener;
mod mailbox;
mod message;
mod output;
mod reader;
mod session;
pub mod telemetry;
mod tunnel;
mod workers;

pub use codec::{CodecError, FRAME_MARKER, LENGTH_PREFIX_LEN, decode, decode_body, encode};
pub use connection::{ConnectionError, ConnectionManager, ConnectionState, HandshakeError};
pub use correlation::CorrelationKey;
pub use courier_config::{Config, ServerEndpoint};
pub use listener::{CommListener, ErrorInfo};
pub use mailbox::CorrelationRegistry;
pub use message::{
    FIELD_ID, FIELD_KEY, FIELD_RECEIVER, FIELD_SEQUENCE, FIELD_SENDER, Field, Message, MessageKind,
};
pub use session::SessionKey;
pub use tunnel::{TunnelError, TunnelProvider};
