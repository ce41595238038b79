//! Session key issued by the server during the handshake.

use std::fmt;

/// 16-bit key identifying this client for the lifetime of a connection.
///
/// The server sends the key as two big-endian bytes; it is rendered in
/// decimal wherever it is stamped on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(u16);

impl SessionKey {
    /// Wraps a raw key.
    #[must_use]
    pub const fn new(key: u16) -> Self {
        Self(key)
    }

    /// Decodes the two handshake bytes.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    /// Raw key value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}
