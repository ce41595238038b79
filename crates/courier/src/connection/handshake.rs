//! Session key exchange performed right after the TCP connect.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::debug;

use super::CONNECTION_TARGET;
use super::errors::HandshakeError;
use crate::session::SessionKey;

/// Two zero bytes asking the server for a session key.
pub(crate) const KEY_REQUEST: [u8; 2] = [0, 0];

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Requests a session key and waits up to `timeout` for the two-byte reply.
///
/// The socket is left in blocking mode with no read timeout on success.
pub(crate) fn exchange_key(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<SessionKey, HandshakeError> {
    stream.write_all(&KEY_REQUEST)?;
    stream.flush()?;

    let deadline = Instant::now() + timeout;
    let mut reply = [0_u8; 2];
    let mut filled = 0;
    while filled < reply.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(HandshakeError::Unresponsive { waited: timeout });
        }
        stream.set_read_timeout(Some(remaining.min(POLL_INTERVAL)))?;
        match stream.read(&mut reply[filled..]) {
            Ok(0) => return Err(HandshakeError::Closed),
            Ok(read) => filled += read,
            Err(error) if is_retryable(&error) => {}
            Err(error) => return Err(HandshakeError::Io(error)),
        }
    }
    stream.set_read_timeout(None)?;

    let key = SessionKey::from_be_bytes(reply);
    debug!(target: CONNECTION_TARGET, key = %key, "session key received");
    Ok(key)
}

fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
