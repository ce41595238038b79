//! Fake server and recording listener shared by the integration tests.
//!
//! The fake server accepts one connection on an ephemeral port, answers the
//! two-byte key request, and then hands the raw socket to the test so it can
//! read requests and write replies in whatever order a scenario needs.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use courier::{
    CommListener, Config, ErrorInfo, Message, MessageKind, ServerEndpoint, decode, encode,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// How the fake server treats the key request.
#[derive(Debug, Clone, Copy)]
pub enum Handshake {
    /// Reply with the given key.
    Issue(u16),
    /// Read the request and never answer.
    Silent,
}

/// Single-connection server standing in for the execution server.
pub struct FakeServer {
    address: SocketAddr,
    accepted: Receiver<Result<TcpStream>>,
}

impl FakeServer {
    pub fn spawn(handshake: Handshake) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake server")?;
        let address = listener.local_addr().context("local addr")?;
        let (sender, accepted) = mpsc::channel();
        thread::spawn(move || {
            let outcome = accept_client(&listener, handshake);
            let _ = sender.send(outcome);
        });
        Ok(Self { address, accepted })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint::new(self.address.ip().to_string(), self.address.port())
    }

    /// Config pointing at this server with short timeouts.
    pub fn config(&self) -> Config {
        Config {
            server: self.endpoint(),
            response_timeout_ms: 2_000,
            handshake_timeout_ms: 200,
            connect_timeout_ms: 1_000,
            worker_threads: 2,
            ..Config::default()
        }
    }

    /// Waits for the client to finish connecting.
    pub fn connection(&self) -> Result<ServerConnection> {
        let stream = self
            .accepted
            .recv_timeout(WAIT)
            .context("client never connected")??;
        Ok(ServerConnection { stream })
    }
}

fn accept_client(listener: &TcpListener, handshake: Handshake) -> Result<TcpStream> {
    let (mut stream, _) = listener.accept().context("accept client")?;
    let mut request = [0_u8; 2];
    stream
        .read_exact(&mut request)
        .context("read key request")?;
    ensure!(request == [0, 0], "unexpected key request {request:?}");
    if let Handshake::Issue(key) = handshake {
        stream
            .write_all(&key.to_be_bytes())
            .context("write session key")?;
    }
    Ok(stream)
}

/// Server side of an accepted connection.
pub struct ServerConnection {
    stream: TcpStream,
}

impl ServerConnection {
    pub fn read_message(&mut self) -> Result<Message> {
        self.stream
            .set_read_timeout(Some(WAIT))
            .context("set read timeout")?;
        let mut prefix = [0_u8; 4];
        self.stream
            .read_exact(&mut prefix)
            .context("read length prefix")?;
        let length = u32::from_be_bytes(prefix) as usize;
        let mut frame = prefix.to_vec();
        frame.resize(4 + length, 0);
        self.stream
            .read_exact(&mut frame[4..])
            .context("read frame body")?;
        decode(&frame).map_err(|error| anyhow!("decode frame: {error}"))
    }

    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        let frame = encode(message).map_err(|error| anyhow!("encode frame: {error}"))?;
        self.write_raw(&frame)
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).context("write to client")?;
        self.stream.flush().context("flush to client")
    }

    /// Answers `request` with a response echoing its `tag` field.
    pub fn reply_to(&mut self, request: &Message) -> Result<()> {
        let mut reply = Message::new(MessageKind::Response);
        reply.set_sender(request.receiver().unwrap_or_default());
        reply.set_receiver(request.sender().unwrap_or_default());
        reply.set("sequence", request.sequence().unwrap_or_default());
        reply.set("echo", request.get("tag").unwrap_or_default());
        self.write_message(&reply)
    }

    /// Reads until the client closes its side.
    pub fn expect_closed(&mut self) -> Result<()> {
        self.stream
            .set_read_timeout(Some(WAIT))
            .context("set read timeout")?;
        let mut sink = Vec::new();
        match self.stream.read_to_end(&mut sink) {
            Ok(_) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::ConnectionReset => Ok(()),
            Err(error) => Err(error).context("waiting for client close"),
        }
    }

    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Builds a request addressed to the server carrying a `tag` field.
pub fn tagged_request(tag: &str) -> Message {
    let mut request = Message::new(MessageKind::Request);
    request.set_sender("client");
    request.set_receiver("server");
    request.set("tag", tag);
    request
}

/// Lifecycle and message events observed by a [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(Message),
    Lost(ErrorInfo),
    Failed(ErrorInfo),
    Closed,
}

/// Listener recording every callback and answering requests with a canned
/// field.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until `predicate` holds for the recorded events.
    pub fn wait_until(&self, predicate: impl Fn(&[Event]) -> bool) -> Vec<Event> {
        let guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, WAIT, |events| !predicate(events))
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|event| matches(event)).count()
    }

    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.changed.notify_all();
    }
}

impl CommListener for RecordingListener {
    fn receive_request(&self, request: &Message) -> Message {
        Message::default().with_field("handled", request.get("command").unwrap_or_default())
    }

    fn receive_message(&self, message: Message) {
        self.record(Event::Message(message));
    }

    fn connection_lost(&self, error: &ErrorInfo) {
        self.record(Event::Lost(error.clone()));
    }

    fn connection_failed(&self, error: &ErrorInfo) {
        self.record(Event::Failed(error.clone()));
    }

    fn connection_closed(&self) {
        self.record(Event::Closed);
    }
}

pub fn is_lost(event: &Event) -> bool {
    matches!(event, Event::Lost(_))
}

pub fn is_failed(event: &Event) -> bool {
    matches!(event, Event::Failed(_))
}

pub fn is_closed(event: &Event) -> bool {
    matches!(event, Event::Closed)
}
