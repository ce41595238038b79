//! Resources owned by one established connection.

use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::CONNECTION_TARGET;
use crate::output::OutputChannel;
use crate::session::SessionKey;
use crate::tunnel::TunnelProvider;

/// Socket, writer, reader thread and tunnel of a live connection.
pub(crate) struct ActiveSession {
    pub(crate) stream: TcpStream,
    pub(crate) key: SessionKey,
    pub(crate) output: Arc<OutputChannel>,
    pub(crate) stopping: Arc<AtomicBool>,
    pub(crate) reader: Option<JoinHandle<()>>,
    pub(crate) tunnel: Option<Arc<dyn TunnelProvider>>,
}

impl ActiveSession {
    /// Marks the shutdown as intentional so the read loop exits quietly.
    pub(crate) fn begin_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Shuts the socket, stops the reader, closes the writer and the tunnel.
    pub(crate) fn teardown(mut self) {
        self.begin_stop();
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            debug!(target: CONNECTION_TARGET, %error, "socket shutdown failed");
        }
        if let Some(reader) = self.reader.take() {
            // The reader itself may be running this teardown after EOF.
            if reader.thread().id() != thread::current().id() && reader.join().is_err() {
                warn!(target: CONNECTION_TARGET, "reader thread terminated abnormally");
            }
        }
        self.output.close();
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close();
        }
        debug!(target: CONNECTION_TARGET, key = %self.key, "session torn down");
    }
}
