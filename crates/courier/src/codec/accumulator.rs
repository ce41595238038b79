//! Incremental frame extraction from a byte stream.

use tracing::warn;

use super::{CODEC_TARGET, LENGTH_PREFIX_LEN, body_length};

/// What the accumulator yielded after new bytes arrived.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameEvent {
    /// A complete frame, length prefix included.
    Frame(Vec<u8>),
    /// A frame announced a body above the limit and is being skipped.
    Oversized { declared: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    AwaitingPrefix,
    AwaitingBody { body_len: usize },
    Discarding { remaining: usize },
}

/// Reassembles frames from arbitrarily chunked reads.
///
/// Reads may split a frame anywhere, including inside the length prefix, or
/// deliver several frames at once. Frames announcing a body larger than
/// `max_body` are skipped without being buffered.
#[derive(Debug)]
pub(crate) struct FrameAccumulator {
    buffer: Vec<u8>,
    state: ReadState,
    max_body: usize,
}

impl FrameAccumulator {
    pub(crate) const fn new(max_body: usize) -> Self {
        Self {
            buffer: Vec::new(),
            state: ReadState::AwaitingPrefix,
            max_body,
        }
    }

    /// Appends freshly read bytes.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Yields the next event the buffered bytes allow, if any.
    pub(crate) fn next_event(&mut self) -> Option<FrameEvent> {
        loop {
            match self.state {
                ReadState::AwaitingPrefix => {
                    let prefix: [u8; LENGTH_PREFIX_LEN] =
                        *self.buffer.first_chunk::<LENGTH_PREFIX_LEN>()?;
                    let body_len = body_length(prefix);
                    if body_len > self.max_body {
                        warn!(
                            target: CODEC_TARGET,
                            declared = body_len,
                            limit = self.max_body,
                            "skipping oversized frame"
                        );
                        self.buffer.drain(..LENGTH_PREFIX_LEN);
                        self.state = ReadState::Discarding {
                            remaining: body_len,
                        };
                        return Some(FrameEvent::Oversized { declared: body_len });
                    }
                    self.state = ReadState::AwaitingBody { body_len };
                }
                ReadState::AwaitingBody { body_len } => {
                    let frame_len = LENGTH_PREFIX_LEN + body_len;
                    if self.buffer.len() < frame_len {
                        return None;
                    }
                    let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
                    self.state = ReadState::AwaitingPrefix;
                    return Some(FrameEvent::Frame(frame));
                }
                ReadState::Discarding { remaining } => {
                    let skipped = remaining.min(self.buffer.len());
                    self.buffer.drain(..skipped);
                    let left = remaining - skipped;
                    if left > 0 {
                        self.state = ReadState::Discarding { remaining: left };
                        return None;
                    }
                    self.state = ReadState::AwaitingPrefix;
                }
            }
        }
    }

    /// Bytes held that do not yet form a frame.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
