//! Dedicated thread turning socket bytes into dispatched messages.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use crate::codec::{self, FrameAccumulator, FrameEvent};
use crate::link::LinkMonitor;
use crate::message::Message;

pub(crate) const READER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reader");

const READ_CHUNK: usize = 8 * 1024;

/// Name given to the reader thread.
pub(crate) const READER_THREAD_NAME: &str = "courier-reader";

/// Destination for decoded messages.
pub(crate) trait MessageSink: Send + Sync {
    /// Routes one decoded message.
    fn dispatch(&self, message: Message);
}

/// Reads frames until the peer closes, the link fails, or a graceful stop is
/// requested through the shared flag.
pub(crate) struct ReadLoop<R> {
    source: R,
    frames: FrameAccumulator,
    sink: Arc<dyn MessageSink>,
    monitor: Arc<dyn LinkMonitor>,
    stopping: Arc<AtomicBool>,
}

impl<R> ReadLoop<R>
where
    R: Read + Send + 'static,
{
    pub(crate) fn new(
        source: R,
        max_frame_bytes: usize,
        sink: Arc<dyn MessageSink>,
        monitor: Arc<dyn LinkMonitor>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            frames: FrameAccumulator::new(max_frame_bytes),
            sink,
            monitor,
            stopping,
        }
    }

    /// Starts the loop on its own named thread.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(READER_THREAD_NAME.to_owned())
            .spawn(move || self.run())
    }

    pub(crate) fn run(mut self) {
        debug!(target: READER_TARGET, "read loop started");
        let mut chunk = vec![0_u8; READ_CHUNK];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.on_end_of_stream();
                    return;
                }
                Ok(read) => {
                    self.frames.push(&chunk[..read]);
                    self.drain_frames();
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    self.on_read_error(&error);
                    return;
                }
            }
        }
    }

    fn drain_frames(&mut self) {
        while let Some(event) = self.frames.next_event() {
            match event {
                FrameEvent::Frame(frame) => match codec::decode(&frame) {
                    Ok(message) => {
                        trace!(target: READER_TARGET, message = %message, "frame received");
                        self.sink.dispatch(message);
                    }
                    Err(error) => {
                        warn!(target: READER_TARGET, %error, bytes = frame.len(), "dropping malformed frame");
                    }
                },
                FrameEvent::Oversized { declared } => {
                    warn!(target: READER_TARGET, declared, "oversized frame discarded");
                }
            }
        }
    }

    fn on_end_of_stream(&self) {
        if self.stopping() {
            debug!(target: READER_TARGET, "read loop finished after shutdown");
            return;
        }
        info!(target: READER_TARGET, "peer closed the connection");
        self.monitor
            .comm_failure("Lost connection", "connection closed by peer");
    }

    fn on_read_error(&self, error: &io::Error) {
        if self.stopping() {
            debug!(target: READER_TARGET, %error, "read loop interrupted by socket close");
            return;
        }
        warn!(target: READER_TARGET, %error, "read failed");
        self.monitor
            .comm_failure("Lost connection", &format!("read failed: {error}"));
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Mutex;
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::codec::encode;
    use crate::link::testing::RecordingMonitor;
    use crate::message::MessageKind;

    /// Replays scripted read results, then reports end of stream.
    struct ScriptedSource(VecDeque<io::Result<Vec<u8>>>);

    impl Read for ScriptedSource {
        fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(error)) => Err(error),
                Some(Ok(bytes)) => {
                    buffer[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Message>>);

    impl MessageSink for CollectingSink {
        fn dispatch(&self, message: Message) {
            self.0.lock().expect("sink lock").push(message);
        }
    }

    struct Harness {
        sink: Arc<CollectingSink>,
        monitor: Arc<RecordingMonitor>,
        stopping: Arc<AtomicBool>,
    }

    impl Harness {
        fn run(&self, script: Vec<io::Result<Vec<u8>>>) {
            ReadLoop::new(
                ScriptedSource(script.into()),
                1024,
                self.sink.clone(),
                self.monitor.clone(),
                Arc::clone(&self.stopping),
            )
            .run();
        }

        fn sequences(&self) -> Vec<String> {
            self.sink
                .0
                .lock()
                .expect("sink lock")
                .iter()
                .filter_map(|message| message.sequence().map(str::to_owned))
                .collect()
        }
    }

    #[fixture]
    fn harness() -> Harness {
        Harness {
            sink: Arc::new(CollectingSink::default()),
            monitor: Arc::new(RecordingMonitor::default()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    fn frame(sequence: u64) -> Vec<u8> {
        let mut message = Message::new(MessageKind::Response);
        message.set_sequence(sequence);
        encode(&message).expect("encode")
    }

    #[rstest]
    fn dispatches_pipelined_and_split_frames(harness: Harness) {
        let mut stream = [frame(0), frame(1), frame(2)].concat();
        let tail = stream.split_off(7);
        let (middle, rest) = tail.split_at(tail.len() - 3);
        harness.run(vec![
            Ok(stream),
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(middle.to_vec()),
            Ok(rest.to_vec()),
        ]);

        assert_eq!(harness.sequences(), vec!["0", "1", "2"]);
        assert_eq!(harness.monitor.failures().len(), 1);
    }

    #[rstest]
    fn malformed_frame_is_skipped(harness: Harness) {
        let bad = vec![0, 0, 0, 2, 0x07, 0x00];
        harness.run(vec![Ok([frame(0), bad, frame(1)].concat())]);
        assert_eq!(harness.sequences(), vec!["0", "1"]);
    }

    #[rstest]
    fn peer_close_is_reported_once(harness: Harness) {
        harness.run(vec![]);
        let failures = harness.monitor.failures();
        assert_eq!(
            failures,
            vec![(
                "Lost connection".to_owned(),
                "connection closed by peer".to_owned()
            )]
        );
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionReset)]
    #[case(io::ErrorKind::ConnectionAborted)]
    #[case(io::ErrorKind::NotConnected)]
    fn graceful_stop_is_silent(harness: Harness, #[case] kind: io::ErrorKind) {
        harness.stopping.store(true, Ordering::SeqCst);
        harness.run(vec![Err(io::Error::from(kind))]);
        harness.run(vec![]);
        assert!(harness.monitor.failures().is_empty());
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionReset)]
    #[case(io::ErrorKind::ConnectionAborted)]
    #[case(io::ErrorKind::NotConnected)]
    fn socket_errors_are_reported(harness: Harness, #[case] kind: io::ErrorKind) {
        harness.run(vec![Err(io::Error::from(kind))]);
        let failures = harness.monitor.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "Lost connection");
    }

    #[rstest]
    fn spawned_reader_reports_a_dropped_peer(harness: Harness) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        let reader = ReadLoop::new(
            client,
            1024,
            harness.sink.clone(),
            harness.monitor.clone(),
            Arc::clone(&harness.stopping),
        )
        .spawn()
        .expect("spawn reader");

        drop(server);
        let failures = harness.monitor.wait_for_failure(Duration::from_secs(5));
        reader.join().expect("reader thread");
        assert_eq!(failures.len(), 1);
    }
}
