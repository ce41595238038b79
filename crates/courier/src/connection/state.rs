//! Connection lifecycle states.

use strum::Display;

/// Where the manager is in its lifecycle.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
///                     |             |
///                     v             v
///               Disconnected      Failed -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// No socket is open.
    #[default]
    Disconnected,
    /// `connect` is dialling and exchanging keys.
    Connecting,
    /// The session is established.
    Connected,
    /// A deliberate disconnect is tearing the session down.
    Disconnecting,
    /// A communication failure is tearing the session down.
    Failed,
}
