//! Conversion between command-line fields and JSON output.

use std::borrow::Cow;
use std::io::Write;

use courier::{FIELD_ID, Message, MessageKind};
use serde::Serialize;

use crate::AppError;

/// Builds a message from `NAME=VALUE` pairs, stamping `kind` when the pairs
/// carry no `id`.
pub(crate) fn build_message(fields: &[(String, String)], kind: MessageKind) -> Message {
    let mut message = Message::default();
    if !fields.iter().any(|(name, _)| name == FIELD_ID) {
        message.set_kind(kind);
    }
    for (name, value) in fields {
        message.set(name.as_str(), value.as_str());
    }
    message
}

#[derive(Serialize)]
struct FieldView<'a> {
    name: &'a str,
    value: Cow<'a, str>,
}

/// Writes `message` as one JSON line listing its fields in wire order.
pub(crate) fn write_json_line(out: &mut impl Write, message: &Message) -> Result<(), AppError> {
    let fields: Vec<FieldView<'_>> = message
        .fields()
        .map(|field| FieldView {
            name: field.name(),
            value: String::from_utf8_lossy(field.value()),
        })
        .collect();
    serde_json::to_writer(&mut *out, &fields).map_err(AppError::Serialise)?;
    writeln!(out).map_err(AppError::Output)?;
    out.flush().map_err(AppError::Output)
}
