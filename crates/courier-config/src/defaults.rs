use crate::endpoint::ServerEndpoint;
use crate::logging::LogFormat;

/// Host the client connects to when nothing else is configured.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Port the execution server listens on by default.
pub const DEFAULT_SERVER_PORT: u16 = 9988;

/// Default `sendRequest` timeout in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;

/// Bounded wait for the session key during the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1_000;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Number of dispatch workers serving listener callbacks.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Largest frame body accepted before the reader switches to discard mode.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Borrowed form of [`DEFAULT_LOG_FILTER`] for call sites expecting a function.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default execution server endpoint.
pub fn default_server_endpoint() -> ServerEndpoint {
    ServerEndpoint::new(DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT)
}
