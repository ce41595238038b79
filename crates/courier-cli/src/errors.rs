//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use courier::ConnectionError;
use courier::telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no response within {timeout_ms}ms")]
    NoResponse { timeout_ms: u128 },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("failed to serialise message: {0}")]
    Serialise(serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(io::Error),
}
