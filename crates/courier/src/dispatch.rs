//! Routing of decoded messages by kind.
//!
//! Replies are matched against the correlation registry on the reader
//! thread. Everything that reaches the listener is handed to the worker pool
//! so the read loop never blocks on application code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::correlation::CorrelationKey;
use crate::link::LinkMonitor;
use crate::listener::CommListener;
use crate::mailbox::CorrelationRegistry;
use crate::message::{FIELD_ID, FIELD_SEQUENCE, Message, MessageKind};
use crate::output::OutputChannel;
use crate::reader::MessageSink;
use crate::workers::WorkerPool;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Routes inbound messages for one connection.
pub(crate) struct Dispatcher {
    registry: Arc<CorrelationRegistry>,
    listener: Arc<dyn CommListener>,
    workers: Arc<WorkerPool>,
    output: Arc<OutputChannel>,
    monitor: Arc<dyn LinkMonitor>,
    stopping: Arc<AtomicBool>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<CorrelationRegistry>,
        listener: Arc<dyn CommListener>,
        workers: Arc<WorkerPool>,
        output: Arc<OutputChannel>,
        monitor: Arc<dyn LinkMonitor>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            listener,
            workers,
            output,
            monitor,
            stopping,
        }
    }

    fn route_reply(&self, kind: MessageKind, reply: Message) {
        let key = CorrelationKey::for_reply(&reply);
        if self.registry.is_waiting_for(&key) {
            self.registry.place(&key, reply);
        } else if kind == MessageKind::Error {
            debug!(target: DISPATCH_TARGET, key = %key, "unsolicited error forwarded to listener");
            self.deliver(reply);
        } else {
            // Logs the discard.
            self.registry.place(&key, reply);
        }
    }

    fn deliver(&self, message: Message) {
        let listener = Arc::clone(&self.listener);
        self.workers
            .submit(move || listener.receive_message(message));
    }

    fn serve_request(&self, request: Message) {
        let listener = Arc::clone(&self.listener);
        let output = Arc::clone(&self.output);
        self.workers.submit(move || {
            let answer = listener.receive_request(&request);
            output.send(stamp_reply(&request, answer));
        });
    }

    fn end_of_communication(&self) {
        info!(target: DISPATCH_TARGET, "server ended the communication");
        self.stopping.store(true, Ordering::SeqCst);
        self.monitor
            .comm_failure("Lost connection", "server ended the communication");
    }
}

impl MessageSink for Dispatcher {
    fn dispatch(&self, message: Message) {
        match message.kind() {
            Some(kind @ (MessageKind::Response | MessageKind::Error)) => {
                self.route_reply(kind, message);
            }
            Some(kind) if kind.is_fire_and_forget() => self.deliver(message),
            Some(MessageKind::Request) => self.serve_request(message),
            Some(MessageKind::EndOfCommunication) => self.end_of_communication(),
            Some(_) | None => {
                error!(
                    target: DISPATCH_TARGET,
                    id = message.get(FIELD_ID).unwrap_or("<missing>"),
                    "unrecognised message kind; dropped"
                );
            }
        }
    }
}

/// Turns a listener's answer into a reply addressed back to the requester.
fn stamp_reply(request: &Message, mut answer: Message) -> Message {
    if answer.kind() != Some(MessageKind::Error) {
        answer.set_kind(MessageKind::Response);
    }
    answer.set_sender(request.receiver().unwrap_or_default());
    answer.set_receiver(request.sender().unwrap_or_default());
    if let Some(sequence) = request.sequence() {
        answer.set(FIELD_SEQUENCE, sequence);
    }
    answer
}
