//! Runtime for the `courier` command-line client.
//!
//! The runner splits leading configuration flags from the subcommand, loads
//! layered configuration, installs telemetry, connects to the execution
//! server, and then sends a message, performs a request, or watches inbound
//! traffic. Configuration loading and the output streams are injectable so
//! tests can drive the runner against a fake server.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use clap::Parser;
use courier::{ConnectionManager, MessageKind, telemetry};
use courier_config::Config;

mod cli;
mod config;
mod errors;
mod fields;
mod listener;

use cli::{Cli, CliCommand};
use config::{ConfigArgumentSplit, split_config_arguments};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use fields::{build_message, write_json_line};
use listener::{ForwardingListener, Inbound};

/// Flags consumed by the configuration loader.
///
/// Keep in sync with the fields of [`courier_config::Config`].
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--server",
    "--response-timeout-ms",
    "--handshake-timeout-ms",
    "--connect-timeout-ms",
    "--worker-threads",
    "--max-frame-bytes",
    "--log-filter",
    "--log-format",
];

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    stdout: &'a mut W,
    stderr: &'a mut E,
    loader: &'a L,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(stdout: &'a mut W, stderr: &'a mut E, loader: &'a L) -> Self {
        Self {
            stdout,
            stderr,
            loader,
        }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);
        let cli_arguments = prepare_cli_arguments(&args, &split);

        let result = Cli::try_parse_from(cli_arguments)
            .map_err(AppError::CliUsage)
            .and_then(|cli| {
                self.loader
                    .load(&split.config_arguments)
                    .map(|config| (cli, config))
            })
            .and_then(|(cli, config)| {
                telemetry::initialise(&config)?;
                self.execute(cli.command, &config)
            });

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(AppError::CliUsage(error)) if !error.use_stderr() => {
                let _ = write!(self.stdout, "{error}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                let _ = writeln!(self.stderr, "courier: {error}");
                ExitCode::FAILURE
            }
        }
    }

    fn execute(&mut self, command: CliCommand, config: &Config) -> Result<(), AppError> {
        let manager = ConnectionManager::new(config)?;
        let (listener, inbound) = ForwardingListener::new();
        manager.set_comm_listener(Arc::new(listener));
        manager.connect()?;

        let outcome = match command {
            CliCommand::Send { fields } => {
                manager.send_message(build_message(&fields, MessageKind::OneWay));
                Ok(())
            }
            CliCommand::Request { timeout_ms, fields } => {
                let timeout =
                    timeout_ms.map_or_else(|| config.response_timeout(), Duration::from_millis);
                self.request(&manager, &fields, timeout)
            }
            CliCommand::Watch { seconds } => self.watch(&inbound, Duration::from_secs(seconds)),
        };
        manager.disconnect();
        outcome
    }

    fn request(
        &mut self,
        manager: &ConnectionManager,
        fields: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), AppError> {
        let request = build_message(fields, MessageKind::Request);
        let reply = manager
            .send_request_with_timeout(request, timeout)
            .ok_or(AppError::NoResponse {
                timeout_ms: timeout.as_millis(),
            })?;
        write_json_line(&mut *self.stdout, &reply)
    }

    fn watch(&mut self, inbound: &Receiver<Inbound>, duration: Duration) -> Result<(), AppError> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            let next = match deadline {
                Some(deadline) => {
                    inbound.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                }
                None => inbound.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(Inbound::Message(message)) => write_json_line(&mut *self.stdout, &message)?,
                Ok(Inbound::Lost(error)) => return Err(AppError::ConnectionLost(error.to_string())),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    let mut cli_arguments: Vec<OsString> = args.first().cloned().into_iter().collect();
    cli_arguments.extend(args.iter().skip(split.command_start).cloned());
    cli_arguments
}

/// Runs the CLI with the given arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
#[must_use]
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(stdout, stderr, loader).run(args)
}
