//! Errors raised while establishing a connection.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::ConnectionState;
use crate::tunnel::TunnelError;

/// Failures of the two-byte key exchange.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The server sent nothing within the handshake window.
    #[error("server did not send a session key within {}ms", waited.as_millis())]
    Unresponsive {
        /// Time spent waiting.
        waited: Duration,
    },
    /// The server closed the socket mid-handshake.
    #[error("server closed the connection during the handshake")]
    Closed,
    /// Socket I/O failed.
    #[error("handshake I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Reasons [`connect`](super::ConnectionManager::connect) can fail.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No [`CommListener`](crate::CommListener) was registered.
    #[error("a communication listener must be registered before connecting")]
    NoListener,
    /// The manager is not idle.
    #[error("cannot connect while {state}")]
    InvalidState {
        /// State at the time of the call.
        state: ConnectionState,
    },
    /// The server host did not resolve.
    #[error("failed to resolve server address {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// TCP connection failed.
    #[error("failed to connect to server at {endpoint}: {source}")]
    Connect {
        /// Endpoint being dialled.
        endpoint: String,
        /// Socket error.
        #[source]
        source: io::Error,
    },
    /// The tunnel provider failed.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    /// The session key exchange failed.
    #[error("handshake with {endpoint} failed: {source}")]
    Handshake {
        /// Endpoint being dialled.
        endpoint: String,
        /// Handshake failure.
        #[source]
        source: HandshakeError,
    },
    /// A socket handle could not be duplicated or configured.
    #[error("failed to prepare the socket: {0}")]
    Socket(#[source] io::Error),
    /// A transport thread could not be started.
    #[error("failed to start {thread} thread: {source}")]
    Spawn {
        /// Thread role.
        thread: &'static str,
        /// Spawn error.
        #[source]
        source: io::Error,
    },
}
