//! Optional pluggable tunnel placed in front of the server socket.

use std::io;
use std::net::SocketAddr;

use courier_config::ServerEndpoint;
use thiserror::Error;

/// Errors raised while opening a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The tunnel could not be established.
    #[error("failed to open tunnel to {endpoint}: {message}")]
    Open {
        /// Server the tunnel was meant to reach.
        endpoint: ServerEndpoint,
        /// Provider-specific description.
        message: String,
    },
    /// I/O failure inside the provider.
    #[error("tunnel I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Opens a local forwarding endpoint that reaches the configured server.
///
/// When a provider is installed the manager connects to the address returned
/// by [`open`](Self::open) instead of the server itself, and calls
/// [`close`](Self::close) whenever the connection is torn down or fails to
/// establish.
pub trait TunnelProvider: Send + Sync {
    /// Establishes the tunnel and returns the local address to dial.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when the tunnel cannot be opened.
    fn open(&self, server: &ServerEndpoint) -> Result<SocketAddr, TunnelError>;

    /// Releases the tunnel. Must tolerate being called when nothing is open.
    fn close(&self);
}
