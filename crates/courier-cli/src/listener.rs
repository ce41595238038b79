//! Listener used by the CLI to surface inbound traffic.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use courier::{CommListener, ErrorInfo, Message, MessageKind};

/// Something the connection reported to the CLI.
#[derive(Debug)]
pub(crate) enum Inbound {
    Message(Message),
    Lost(ErrorInfo),
}

/// Forwards messages and losses to the command loop over a channel.
///
/// Server-initiated requests are refused with an `error` reply.
pub(crate) struct ForwardingListener {
    sender: Mutex<Sender<Inbound>>,
}

impl ForwardingListener {
    pub(crate) fn new() -> (Self, Receiver<Inbound>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }

    fn forward(&self, inbound: Inbound) {
        // The command loop may already have finished; late events are moot.
        let _ = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(inbound);
    }
}

impl CommListener for ForwardingListener {
    fn receive_request(&self, _request: &Message) -> Message {
        Message::new(MessageKind::Error)
            .with_field("reason", "the courier CLI does not serve requests")
    }

    fn receive_message(&self, message: Message) {
        self.forward(Inbound::Message(message));
    }

    fn connection_lost(&self, error: &ErrorInfo) {
        self.forward(Inbound::Lost(error.clone()));
    }

    fn connection_failed(&self, _error: &ErrorInfo) {}

    fn connection_closed(&self) {}
}
