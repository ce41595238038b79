//! Structured messages carried by the transport.
//!
//! A message is a flat, ordered list of named fields. The wire format has no
//! schema, so insertion order is preserved exactly and reproduced on encode.
//! A handful of field names are reserved for the envelope: the message kind
//! (`id`), the routing pair (`sender`, `receiver`), the correlation
//! `sequence`, and the session `key`.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};

/// Field holding the message kind.
pub const FIELD_ID: &str = "id";
/// Field naming the originator of the message.
pub const FIELD_SENDER: &str = "sender";
/// Field naming the addressee of the message.
pub const FIELD_RECEIVER: &str = "receiver";
/// Field holding the per-connection request sequence number.
pub const FIELD_SEQUENCE: &str = "sequence";
/// Field holding the session key issued during the handshake.
pub const FIELD_KEY: &str = "key";

/// Envelope kinds understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum MessageKind {
    /// Synchronous request expecting a correlated reply.
    #[strum(serialize = "request")]
    Request,
    /// Successful reply to a request.
    #[strum(serialize = "response")]
    Response,
    /// Failed reply to a request, or an unsolicited error notification.
    #[strum(serialize = "error")]
    Error,
    /// Fire-and-forget notification.
    #[strum(serialize = "notify")]
    Notify,
    /// Notification emitted asynchronously by the server.
    #[strum(serialize = "notify_async")]
    NotifyAsync,
    /// Prompt addressed to the operator.
    #[strum(serialize = "prompt")]
    Prompt,
    /// Text destined for a display.
    #[strum(serialize = "display")]
    Display,
    /// One-way message that never receives a reply.
    #[strum(serialize = "oneway")]
    OneWay,
    /// Graceful end of communication sent by either peer.
    #[strum(serialize = "eoc")]
    EndOfCommunication,
}

impl MessageKind {
    /// Returns `true` for kinds delivered to the listener without a reply.
    #[must_use]
    pub const fn is_fire_and_forget(self) -> bool {
        matches!(
            self,
            Self::Notify | Self::NotifyAsync | Self::Prompt | Self::Display | Self::OneWay
        )
    }
}

/// A single named field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    value: Vec<u8>,
}

impl Field {
    /// Creates a field from a name and raw value bytes.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value bytes.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Value as text, when it is valid UTF-8.
    #[must_use]
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// An ordered collection of fields forming one protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: Vec<Field>,
}

impl Message {
    /// Creates a message of the given kind.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        let mut message = Self::default();
        message.set_kind(kind);
        message
    }

    /// Builds a message from pre-ordered fields.
    #[must_use]
    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Builder variant of [`Message::set`].
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a field, replacing the first field with the same name in place or
    /// appending a new one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { name, value }),
        }
    }

    /// Removes every field with the given name, returning the first value.
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        let position = self.fields.iter().position(|field| field.name == name)?;
        let removed = self.fields.remove(position);
        self.fields.retain(|field| field.name != name);
        Some(removed.value)
    }

    /// Returns the first value for `name` as text.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Field::value_str)
    }

    /// Returns the first value for `name` as raw bytes.
    #[must_use]
    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.field(name).map(Field::value)
    }

    /// Returns `true` when a field with `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterates over the fields in wire order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Number of fields, reserved ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` when the message carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decoded message kind, if the `id` field holds a known kind.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        self.get(FIELD_ID)
            .and_then(|id| MessageKind::from_str(id).ok())
    }

    /// Sets the `id` field.
    pub fn set_kind(&mut self, kind: MessageKind) {
        self.set(FIELD_ID, kind.to_string());
    }

    /// Sender identity.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.get(FIELD_SENDER)
    }

    /// Sets the sender identity.
    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.set(FIELD_SENDER, sender.into());
    }

    /// Receiver identity.
    #[must_use]
    pub fn receiver(&self) -> Option<&str> {
        self.get(FIELD_RECEIVER)
    }

    /// Sets the receiver identity.
    pub fn set_receiver(&mut self, receiver: impl Into<String>) {
        self.set(FIELD_RECEIVER, receiver.into());
    }

    /// Raw sequence field as carried on the wire.
    #[must_use]
    pub fn sequence(&self) -> Option<&str> {
        self.get(FIELD_SEQUENCE)
    }

    /// Sets the sequence number.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.set(FIELD_SEQUENCE, sequence.to_string());
    }

    /// Session key stamped on the message.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.get(FIELD_KEY)
    }

    /// Stamps the session key.
    pub fn set_key(&mut self, key: impl Into<String>) {
        self.set(FIELD_KEY, key.into());
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.get(FIELD_ID).unwrap_or("?");
        write!(
            formatter,
            "{kind} {}->{} seq={} ({} fields)",
            self.sender().unwrap_or("-"),
            self.receiver().unwrap_or("-"),
            self.sequence().unwrap_or("-"),
            self.fields.len()
        )
    }
}
