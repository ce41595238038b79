//! Serialised writer for outgoing frames.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, trace};

use crate::codec;
use crate::link::LinkMonitor;
use crate::message::Message;
use crate::session::SessionKey;

pub(crate) const OUTPUT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::output");

type Sink = Box<dyn Write + Send>;

/// Writes one frame at a time to the connection.
///
/// Every outgoing message is stamped with the session key. Encoding problems
/// are logged and the message is dropped; write failures are logged and
/// escalated to the [`LinkMonitor`], so callers never see an error.
pub(crate) struct OutputChannel {
    sink: Mutex<Option<Sink>>,
    key: SessionKey,
    monitor: Arc<dyn LinkMonitor>,
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OutputChannel")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl OutputChannel {
    pub(crate) fn new(sink: Sink, key: SessionKey, monitor: Arc<dyn LinkMonitor>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            key,
            monitor,
        }
    }

    /// Stamps, encodes and writes `message`.
    ///
    /// Does nothing once the channel has been closed.
    pub(crate) fn send(&self, mut message: Message) {
        message.set_key(self.key.to_string());
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(error) => {
                error!(target: OUTPUT_TARGET, %error, message = %message, "dropping unencodable message");
                return;
            }
        };

        let outcome = {
            let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(writer) = sink.as_mut() else {
                debug!(target: OUTPUT_TARGET, message = %message, "output closed; message not sent");
                return;
            };
            writer.write_all(&frame).and_then(|()| writer.flush())
        };

        match outcome {
            Ok(()) => trace!(target: OUTPUT_TARGET, message = %message, "frame written"),
            Err(error) => {
                error!(target: OUTPUT_TARGET, %error, message = %message, "failed to write frame");
                self.monitor
                    .comm_failure("Lost connection", &format!("write failed: {error}"));
            }
        }
    }

    /// Drops the underlying writer; later sends become no-ops.
    pub(crate) fn close(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = sink.take() {
            if let Err(error) = writer.flush() {
                debug!(target: OUTPUT_TARGET, %error, "flush on close failed");
            }
        }
    }
}
