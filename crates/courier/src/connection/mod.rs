//! Connection lifecycle and the public request API.
//!
//! [`ConnectionManager`] owns the socket, the handshake, the read loop, the
//! output channel and the correlation registry. It is a cheap handle around
//! shared state, so clones can issue requests from several threads at once.

mod errors;
mod handshake;
mod session;
mod state;

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use courier_config::{Config, ServerEndpoint};
use tracing::{debug, error, info, warn};

use crate::correlation::CorrelationKey;
use crate::dispatch::Dispatcher;
use crate::link::LinkMonitor;
use crate::listener::{CommListener, ErrorInfo};
use crate::mailbox::CorrelationRegistry;
use crate::message::{Message, MessageKind};
use crate::output::OutputChannel;
use crate::reader::ReadLoop;
use crate::session::SessionKey;
use crate::tunnel::TunnelProvider;
use crate::workers::WorkerPool;

pub use errors::{ConnectionError, HandshakeError};
pub use state::ConnectionState;

use session::ActiveSession;

pub(crate) const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Tunable timeouts and limits applied to each connection.
#[derive(Debug, Clone)]
struct Settings {
    server: ServerEndpoint,
    response_timeout: Duration,
    handshake_timeout: Duration,
    connect_timeout: Duration,
    max_frame_bytes: usize,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server().clone(),
            response_timeout: config.response_timeout(),
            handshake_timeout: config.handshake_timeout(),
            connect_timeout: config.connect_timeout(),
            max_frame_bytes: usize::try_from(config.max_frame_bytes()).unwrap_or(usize::MAX),
        }
    }
}

struct Inner {
    settings: RwLock<Settings>,
    listener: RwLock<Option<Arc<dyn CommListener>>>,
    tunnel: RwLock<Option<Arc<dyn TunnelProvider>>>,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<ActiveSession>>,
    registry: Arc<CorrelationRegistry>,
    workers: Arc<WorkerPool>,
    // Never reset, so keys left waiting by an earlier session stay unique.
    sequence: AtomicU64,
}

/// Client side of the framed TCP protocol.
///
/// Register a [`CommListener`], call [`connect`](Self::connect), then use
/// [`send_message`](Self::send_message) for fire-and-forget traffic and
/// [`send_request`](Self::send_request) for correlated round trips.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionManager")
            .field("server", &self.inner.settings().server)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates an idle manager using `config` for the endpoint, timeouts and
    /// worker pool size.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Spawn`] when the worker threads cannot be
    /// started.
    pub fn new(config: &Config) -> Result<Self, ConnectionError> {
        let workers =
            WorkerPool::new(config.worker_threads()).map_err(|source| ConnectionError::Spawn {
                thread: "worker",
                source,
            })?;
        Ok(Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(Settings::from(config)),
                listener: RwLock::new(None),
                tunnel: RwLock::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                registry: Arc::new(CorrelationRegistry::new()),
                workers: Arc::new(workers),
                sequence: AtomicU64::new(0),
            }),
        })
    }

    /// Sets the server used by the next [`connect`](Self::connect).
    pub fn configure(&self, server: ServerEndpoint) {
        self.inner.settings_mut().server = server;
    }

    /// Registers the listener receiving inbound traffic and lifecycle events.
    pub fn set_comm_listener(&self, listener: Arc<dyn CommListener>) {
        *self
            .inner
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Routes future connections through `tunnel`.
    pub fn set_tunnel_provider(&self, tunnel: Arc<dyn TunnelProvider>) {
        *self
            .inner
            .tunnel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tunnel);
    }

    /// Changes the timeout used by [`send_request`](Self::send_request).
    pub fn set_response_timeout(&self, timeout: Duration) {
        self.inner.settings_mut().response_timeout = timeout;
    }

    /// Timeout used by [`send_request`](Self::send_request).
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        self.inner.settings().response_timeout
    }

    /// Opens the socket, exchanges the session key and starts the read loop.
    ///
    /// The registered listener's
    /// [`connection_failed`](CommListener::connection_failed) is invoked for
    /// every failure after the preconditions have been checked.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoListener`] without a listener,
    /// [`ConnectionError::InvalidState`] unless disconnected, and a
    /// transport error when the connection cannot be established.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let listener = self.inner.listener().ok_or(ConnectionError::NoListener)?;
        {
            let mut state = self.inner.state();
            if *state != ConnectionState::Disconnected {
                return Err(ConnectionError::InvalidState { state: *state });
            }
            *state = ConnectionState::Connecting;
        }

        match self.inner.establish(&listener) {
            Ok(key) => {
                let server = self.inner.settings().server;
                info!(target: CONNECTION_TARGET, server = %server, key = %key, "connected");
                Ok(())
            }
            Err(error) => {
                *self.inner.state() = ConnectionState::Disconnected;
                warn!(target: CONNECTION_TARGET, %error, "connection attempt failed");
                listener.connection_failed(&ErrorInfo::new("Connection failed", error.to_string()));
                Err(error)
            }
        }
    }

    /// Sends an EOC message, closes the connection and notifies the listener.
    ///
    /// Does nothing unless connected.
    pub fn disconnect(&self) {
        let Some(session) = self.inner.begin_teardown(ConnectionState::Disconnecting) else {
            debug!(target: CONNECTION_TARGET, "disconnect ignored; not connected");
            return;
        };
        session.begin_stop();
        session
            .output
            .send(Message::new(MessageKind::EndOfCommunication));
        session.teardown();
        *self.inner.state() = ConnectionState::Disconnected;
        info!(target: CONNECTION_TARGET, "disconnected");
        if let Some(listener) = self.inner.listener() {
            listener.connection_closed();
        }
    }

    /// Closes the connection without sending EOC or notifying the listener.
    pub fn force_disconnect(&self) {
        let Some(session) = self.inner.begin_teardown(ConnectionState::Disconnecting) else {
            return;
        };
        session.teardown();
        *self.inner.state() = ConnectionState::Disconnected;
        info!(target: CONNECTION_TARGET, "connection dropped");
    }

    /// Tears down a failed connection and reports it to the listener once.
    pub fn comm_failure(&self, message: &str, reason: &str) {
        self.inner.comm_failure(message, reason);
    }

    /// Stamps `message` with the session key and writes it.
    ///
    /// Silently does nothing when not connected. Write failures are logged
    /// and reported through [`CommListener::connection_lost`].
    pub fn send_message(&self, message: Message) {
        let Some(output) = self.inner.output() else {
            debug!(target: CONNECTION_TARGET, message = %message, "not connected; message dropped");
            return;
        };
        output.send(message);
    }

    /// Sends `request` and waits up to the configured response timeout.
    #[must_use]
    pub fn send_request(&self, request: Message) -> Option<Message> {
        self.send_request_with_timeout(request, self.response_timeout())
    }

    /// Sends `request` and waits up to `timeout` for the correlated reply.
    ///
    /// The request is stamped as a `request` with the next sequence number.
    /// Returns `None` on timeout, including when not connected.
    #[must_use]
    pub fn send_request_with_timeout(
        &self,
        mut request: Message,
        timeout: Duration,
    ) -> Option<Message> {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        request.set_kind(MessageKind::Request);
        request.set_sequence(sequence);
        let key = CorrelationKey::for_request(&request);

        self.inner.registry.prepare(&key);
        self.send_message(request);
        self.inner.registry.retrieve(&key, timeout)
    }

    /// Returns `true` while a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.inner.state() == ConnectionState::Connected
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state()
    }

    /// Session key of the live connection.
    #[must_use]
    pub fn key(&self) -> Option<SessionKey> {
        self.inner.session().as_ref().map(|session| session.key)
    }

    /// Requests still waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.pending()
    }
}

impl Inner {
    fn establish(
        self: &Arc<Self>,
        listener: &Arc<dyn CommListener>,
    ) -> Result<SessionKey, ConnectionError> {
        let settings = self.settings();
        let tunnel = self
            .tunnel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let opened = open_socket(&settings, tunnel.as_deref())
            .and_then(|stream| self.start_session(stream, &settings, listener, tunnel.clone()));
        if opened.is_err() {
            if let Some(tunnel) = tunnel {
                tunnel.close();
            }
        }
        opened
    }

    fn start_session(
        self: &Arc<Self>,
        mut stream: TcpStream,
        settings: &Settings,
        listener: &Arc<dyn CommListener>,
        tunnel: Option<Arc<dyn TunnelProvider>>,
    ) -> Result<SessionKey, ConnectionError> {
        if let Err(error) = stream.set_nodelay(true) {
            debug!(target: CONNECTION_TARGET, %error, "TCP_NODELAY unavailable");
        }
        let key = handshake::exchange_key(&mut stream, settings.handshake_timeout)
            .map_err(|source| ConnectionError::Handshake {
                endpoint: settings.server.to_string(),
                source,
            })?;

        let writer = stream.try_clone().map_err(ConnectionError::Socket)?;
        let source = stream.try_clone().map_err(ConnectionError::Socket)?;
        let monitor: Arc<dyn LinkMonitor> = Arc::new(FailureRelay(Arc::downgrade(self)));
        let stopping = Arc::new(AtomicBool::new(false));
        let output = Arc::new(OutputChannel::new(
            Box::new(writer),
            key,
            Arc::clone(&monitor),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(listener),
            Arc::clone(&self.workers),
            Arc::clone(&output),
            Arc::clone(&monitor),
            Arc::clone(&stopping),
        );
        let read_loop = ReadLoop::new(
            source,
            settings.max_frame_bytes,
            Arc::new(dispatcher),
            monitor,
            Arc::clone(&stopping),
        );

        // Publish the session before the reader runs so an immediate EOF is
        // reported through the normal failure path.
        *self.session() = Some(ActiveSession {
            stream,
            key,
            output,
            stopping,
            reader: None,
            tunnel,
        });
        *self.state() = ConnectionState::Connected;

        match read_loop.spawn() {
            Ok(handle) => {
                if let Some(session) = self.session().as_mut() {
                    session.reader = Some(handle);
                }
                Ok(key)
            }
            Err(source) => {
                if let Some(session) = self.begin_teardown(ConnectionState::Failed) {
                    // The caller closes the tunnel on error.
                    let mut session = session;
                    session.tunnel = None;
                    session.teardown();
                }
                Err(ConnectionError::Spawn {
                    thread: "reader",
                    source,
                })
            }
        }
    }

    fn comm_failure(&self, message: &str, reason: &str) {
        let Some(session) = self.begin_teardown(ConnectionState::Failed) else {
            debug!(target: CONNECTION_TARGET, message, reason, "failure ignored; not connected");
            return;
        };
        session.teardown();
        *self.state() = ConnectionState::Disconnected;
        error!(target: CONNECTION_TARGET, message, reason, "connection lost");
        if let Some(listener) = self.listener() {
            listener.connection_lost(&ErrorInfo::new(message, reason));
        }
    }

    /// Moves a connected manager into `next` and hands back the session.
    ///
    /// Only the first caller wins; everyone else gets `None`.
    fn begin_teardown(&self, next: ConnectionState) -> Option<ActiveSession> {
        {
            let mut state = self.state();
            if *state != ConnectionState::Connected {
                return None;
            }
            *state = next;
        }
        self.session().take()
    }

    fn output(&self) -> Option<Arc<OutputChannel>> {
        self.session()
            .as_ref()
            .map(|session| Arc::clone(&session.output))
    }

    fn listener(&self) -> Option<Arc<dyn CommListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn settings_mut(&self) -> std::sync::RwLockWriteGuard<'_, Settings> {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            debug!(target: CONNECTION_TARGET, "manager dropped while connected");
            session.teardown();
        }
    }
}

/// Forwards failures from the I/O threads without keeping the manager alive.
struct FailureRelay(Weak<Inner>);

impl LinkMonitor for FailureRelay {
    fn comm_failure(&self, message: &str, reason: &str) {
        if let Some(inner) = self.0.upgrade() {
            inner.comm_failure(message, reason);
        }
    }
}

fn open_socket(
    settings: &Settings,
    tunnel: Option<&dyn TunnelProvider>,
) -> Result<TcpStream, ConnectionError> {
    let endpoint = settings.server.to_string();
    let address = match tunnel {
        Some(tunnel) => {
            let local = tunnel.open(&settings.server)?;
            debug!(target: CONNECTION_TARGET, server = %endpoint, local = %local, "tunnel opened");
            local
        }
        None => resolve(&settings.server).map_err(|source| ConnectionError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?,
    };
    TcpStream::connect_timeout(&address, settings.connect_timeout)
        .map_err(|source| ConnectionError::Connect { endpoint, source })
}

fn resolve(server: &ServerEndpoint) -> std::io::Result<SocketAddr> {
    (server.host(), server.port())
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses resolved for {}", server.host()),
            )
        })
}
