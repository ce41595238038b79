//! Fake execution server and harness for CLI tests.

use std::cell::RefCell;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use courier::{Message, MessageKind, ServerEndpoint, decode, encode};
use courier_config::Config;
use rstest::fixture;

use crate::{AppError, ConfigLoader, OrthoConfigLoader, run_with_loader};

/// How the fake server behaves once the handshake completes.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Answers each request with a response echoing its `op` field.
    Echo,
    /// Records traffic but never answers.
    Silent,
    /// Pushes the given messages, then records traffic.
    Push(Vec<Message>),
}

/// Single-connection server recording every frame the CLI sends.
pub(crate) struct FakeServer {
    port: u16,
    handle: Option<JoinHandle<Result<Vec<Message>>>>,
}

impl FakeServer {
    pub(crate) fn spawn(key: u16, script: Script) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake server")?;
        let port = listener.local_addr().context("local addr")?.port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().context("accept client")?;
            serve(stream, key, &script)
        });
        Ok(Self {
            port,
            handle: Some(handle),
        })
    }

    pub(crate) fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint::new("127.0.0.1", self.port)
    }

    /// Waits for the client to hang up and returns what it sent.
    pub(crate) fn received(&mut self) -> Result<Vec<Message>> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("server already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("fake server thread panicked"))?
    }
}

fn serve(mut stream: TcpStream, key: u16, script: &Script) -> Result<Vec<Message>> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut request = [0_u8; 2];
    stream.read_exact(&mut request).context("key request")?;
    stream.write_all(&key.to_be_bytes()).context("session key")?;

    if let Script::Push(messages) = script {
        for message in messages {
            stream.write_all(&encode(message)?)?;
        }
    }

    let mut received = Vec::new();
    while let Some(message) = read_frame(&mut stream)? {
        let kind = message.kind();
        if kind == Some(MessageKind::Request) && matches!(script, Script::Echo) {
            let mut reply = Message::new(MessageKind::Response);
            reply.set_sender(message.receiver().unwrap_or_default());
            reply.set_receiver(message.sender().unwrap_or_default());
            reply.set("sequence", message.sequence().unwrap_or_default());
            reply.set("echo", message.get("op").unwrap_or_default());
            stream.write_all(&encode(&reply)?)?;
        }
        received.push(message);
        if kind == Some(MessageKind::EndOfCommunication) {
            break;
        }
    }
    Ok(received)
}

fn read_frame(stream: &mut TcpStream) -> Result<Option<Message>> {
    let mut prefix = [0_u8; 4];
    match stream.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error).context("read prefix"),
    }
    let mut frame = prefix.to_vec();
    frame.resize(4 + u32::from_be_bytes(prefix) as usize, 0);
    stream.read_exact(&mut frame[4..]).context("read body")?;
    Ok(Some(decode(&frame)?))
}

pub(crate) struct StaticConfigLoader {
    config: Config,
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Test world holding the fake server and captured CLI output.
#[derive(Default)]
pub(crate) struct TestWorld {
    pub(crate) config: Config,
    pub(crate) server: Option<FakeServer>,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
    pub(crate) exit_code: Option<ExitCode>,
    pub(crate) received: Vec<Message>,
}

impl TestWorld {
    pub(crate) fn start_server(&mut self, key: u16, script: Script) -> Result<()> {
        let server = FakeServer::spawn(key, script)?;
        self.config = Config {
            server: server.endpoint(),
            log_filter: String::from("off"),
            handshake_timeout_ms: 500,
            ..Config::default()
        };
        self.server = Some(server);
        Ok(())
    }

    pub(crate) fn run(&mut self, command: &str) -> Result<()> {
        let loader = StaticConfigLoader {
            config: self.config.clone(),
        };
        self.run_args(command_arguments(&[], command), &loader)
    }

    /// Runs through the layered loader, pointing it at the fake server with
    /// configuration flags and leaving every other setting at its default.
    pub(crate) fn run_with_flags(&mut self, command: &str) -> Result<()> {
        let endpoint = self
            .server
            .as_ref()
            .map(FakeServer::endpoint)
            .ok_or_else(|| anyhow!("server not started"))?
            .to_string();
        let flags = ["--server", endpoint.as_str(), "--log-filter", "off"];
        self.run_args(command_arguments(&flags, command), &OrthoConfigLoader)
    }

    fn run_args(&mut self, args: Vec<OsString>, loader: &impl ConfigLoader) -> Result<()> {
        self.stdout.clear();
        self.stderr.clear();
        self.exit_code = Some(run_with_loader(args, &mut self.stdout, &mut self.stderr, loader));
        if let Some(server) = self.server.as_mut() {
            self.received = server.received()?;
        }
        Ok(())
    }

    pub(crate) fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub(crate) fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

fn command_arguments(flags: &[&str], command: &str) -> Vec<OsString> {
    let mut args = vec![OsString::from("courier")];
    args.extend(flags.iter().map(OsString::from));
    args.extend(command.split_whitespace().map(OsString::from));
    args
}

#[fixture]
pub(crate) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}
