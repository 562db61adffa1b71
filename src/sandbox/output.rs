//! Bounded output capture.
//!
//! Pathological snippets can emit output forever; capture is capped per
//! stream and truncation is recorded as an explicit integrity state,
//! never silently dropped. Collector threads drain the pipes while the
//! watchdog waits on the child, so a full pipe can never deadlock the
//! cell.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::thread::JoinHandle;

/// Integrity of one captured stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamIntegrity {
    /// Stream drained to EOF within the byte cap.
    Complete,
    /// Byte cap reached; the tail was discarded.
    TruncatedByLimit,
    /// The child closed or broke the pipe before EOF.
    ClosedEarly,
    /// Read failed for a reason other than a broken pipe.
    ReadError,
}

impl fmt::Display for StreamIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamIntegrity::Complete => "complete",
            StreamIntegrity::TruncatedByLimit => "truncated_by_limit",
            StreamIntegrity::ClosedEarly => "closed_early",
            StreamIntegrity::ReadError => "read_error",
        };
        f.write_str(s)
    }
}

/// One captured stream with its integrity state.
#[derive(Clone, Debug)]
pub struct CapturedStream {
    pub data: Vec<u8>,
    pub integrity: StreamIntegrity,
}

impl CapturedStream {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            integrity: StreamIntegrity::Complete,
        }
    }

    pub fn into_lossy_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Handle to an in-flight stream collector thread.
pub struct StreamCollector {
    handle: Option<JoinHandle<CapturedStream>>,
}

impl StreamCollector {
    /// Start draining `stream` on a dedicated thread, keeping at most
    /// `limit` bytes.
    pub fn spawn<R: Read + Send + 'static>(stream: Option<R>, limit: usize) -> Self {
        let handle = stream.map(|s| std::thread::spawn(move || drain_stream(s, limit)));
        Self { handle }
    }

    /// Wait for the collector to reach EOF (or its cap) and take the
    /// captured bytes. Called after the child has been reaped, so the
    /// pipe is already closed and this cannot block indefinitely.
    pub fn finish(self) -> CapturedStream {
        match self.handle {
            Some(handle) => handle.join().unwrap_or(CapturedStream {
                data: Vec::new(),
                integrity: StreamIntegrity::ReadError,
            }),
            None => CapturedStream::empty(),
        }
    }
}

fn drain_stream<R: Read>(mut stream: R, limit: usize) -> CapturedStream {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut integrity = StreamIntegrity::Complete;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if data.len() + n > limit {
                    let keep = limit - data.len();
                    data.extend_from_slice(&chunk[..keep]);
                    integrity = StreamIntegrity::TruncatedByLimit;
                    // Keep draining so the child never blocks on a full
                    // pipe; the excess bytes are discarded.
                    let mut sink = [0u8; 4096];
                    while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
                    break;
                }
                data.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                integrity = if e.kind() == std::io::ErrorKind::BrokenPipe {
                    StreamIntegrity::ClosedEarly
                } else {
                    StreamIntegrity::ReadError
                };
                break;
            }
        }
    }

    CapturedStream { data, integrity }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_stream_is_complete() {
        let collector = StreamCollector::spawn(Some(Cursor::new(b"hello".to_vec())), 1024);
        let captured = collector.finish();
        assert_eq!(captured.data, b"hello");
        assert_eq!(captured.integrity, StreamIntegrity::Complete);
    }

    #[test]
    fn over_limit_stream_is_truncated_at_cap() {
        let payload = vec![b'x'; 10_000];
        let collector = StreamCollector::spawn(Some(Cursor::new(payload)), 100);
        let captured = collector.finish();
        assert_eq!(captured.data.len(), 100);
        assert_eq!(captured.integrity, StreamIntegrity::TruncatedByLimit);
    }

    #[test]
    fn exact_limit_is_not_truncation() {
        let payload = vec![b'y'; 64];
        let collector = StreamCollector::spawn(Some(Cursor::new(payload)), 64);
        let captured = collector.finish();
        assert_eq!(captured.data.len(), 64);
        assert_eq!(captured.integrity, StreamIntegrity::Complete);
    }

    #[test]
    fn absent_stream_yields_empty_complete() {
        let collector = StreamCollector::spawn(None::<Cursor<Vec<u8>>>, 64);
        let captured = collector.finish();
        assert!(captured.data.is_empty());
        assert_eq!(captured.integrity, StreamIntegrity::Complete);
    }
}
