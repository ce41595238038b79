//! Argument definitions for the `courier` command.

use clap::{Parser, Subcommand};

/// Talks to an execution server over the framed courier protocol.
#[derive(Parser, Debug)]
#[command(name = "courier", disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Sends one message without waiting for a reply.
    ///
    /// The message kind defaults to `oneway` unless an `id=` field is given.
    Send {
        /// Message fields as NAME=VALUE pairs, in wire order.
        #[arg(value_name = "FIELD=VALUE", required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Sends a request and prints the correlated reply as JSON.
    Request {
        /// Overrides the configured response timeout.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Request fields as NAME=VALUE pairs, in wire order.
        #[arg(value_name = "FIELD=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Prints inbound messages as JSON lines until the time is up.
    Watch {
        /// How long to listen.
        #[arg(long, value_name = "SECONDS", default_value_t = 30)]
        seconds: u64,
    },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, _)) if name.is_empty() => Err(format!("field '{raw}' has an empty name")),
        Some((name, value)) => Ok((name.to_owned(), value.to_owned())),
        None => Err(format!("field '{raw}' must be written as NAME=VALUE")),
    }
}
