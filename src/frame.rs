//! Stream framing: turns a chunked byte stream into a lazy sequence of
//! [`MboRecord`](crate::record::MboRecord) events.
//!
//! [`ChunkQueue`] is the shared buffer between exactly one producer (the
//! network thread, pushing chunks as they arrive) and exactly one consumer
//! (the ingest thread, pulling fixed-size records out). The producer
//! ignores pushes after [`ChunkQueue::finish`] is called; the consumer
//! never blocks once `finish` has been observed and the queue is drained.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex};

use tracing::trace;

use crate::record::{MboRecord, RecordError, RECORD_LEN};

struct State {
    buf: VecDeque<u8>,
    finished: bool,
}

/// Shared byte buffer between a network producer thread and the ingest
/// consumer thread.
pub struct ChunkQueue {
    state: Mutex<State>,
    cvar: Condvar,
}

impl ChunkQueue {
    pub fn new() -> Self {
        ChunkQueue {
            state: Mutex::new(State {
                buf: VecDeque::new(),
                finished: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Build a queue already populated (and finished) from a complete
    /// in-memory buffer. Convenient for tests and for in-process uploads.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let q = ChunkQueue::new();
        q.push(bytes);
        q.finish();
        q
    }

    /// Append a chunk. Ignored once [`finish`](Self::finish) has been
    /// called; the producer must stop calling this after that point.
    pub fn push(&self, chunk: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if state.finished {
            trace!("ChunkQueue::push: ignoring append after finish");
            return;
        }
        state.buf.extend(chunk.iter().copied());
        self.cvar.notify_all();
    }

    /// Signal that no more chunks will arrive. Idempotent.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        self.cvar.notify_all();
    }

    /// Block until at least one byte is available or the queue is
    /// finished and drained, then return up to `max` bytes. Returns an
    /// empty vector only when finished and drained.
    pub fn read_some(&self, max: usize) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.buf.is_empty() {
                let n = max.min(state.buf.len());
                return state.buf.drain(..n).collect();
            }
            if state.finished {
                return Vec::new();
            }
            state = self.cvar.wait(state).unwrap();
        }
    }

    /// Block until exactly `n` bytes are available, or the stream ends
    /// first.
    ///
    /// # Errors
    /// Returns [`FrameError::Eof`] if zero bytes were available before
    /// the stream ended (a clean end). Returns
    /// [`FrameError::UnexpectedEnd`] if the stream ended after some but
    /// not all of the `n` bytes had arrived (a truncated record).
    pub fn read_exact(&self, n: usize) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let chunk = self.read_some(n - out.len());
            if chunk.is_empty() {
                if out.is_empty() {
                    return Err(FrameError::Eof);
                }
                return Err(FrameError::UnexpectedEnd {
                    needed: n,
                    got: out.len(),
                });
            }
            out.extend(chunk);
        }
        Ok(out)
    }
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy, finite, non-restartable sequence of MBO events pulled off a
/// [`ChunkQueue`]. Non-MBO records are not modeled here; callers that need
/// to skip other record types do so upstream of this iterator.
pub struct MboStream<'a> {
    queue: &'a ChunkQueue,
    done: bool,
}

impl<'a> MboStream<'a> {
    pub fn new(queue: &'a ChunkQueue) -> Self {
        MboStream { queue, done: false }
    }
}

impl<'a> Iterator for MboStream<'a> {
    type Item = Result<MboRecord, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.queue.read_exact(RECORD_LEN) {
            Ok(bytes) => match MboRecord::decode(&bytes) {
                Ok(rec) => Some(Ok(rec)),
                Err(e) => {
                    self.done = true;
                    Some(Err(FrameError::InvalidRecord(e)))
                }
            },
            Err(FrameError::Eof) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Errors raised by the frame reader. All are `InputMalformed` in the
/// taxonomy of §7, except [`FrameError::Eof`], which is the normal,
/// clean end of stream and never surfaced as a failure.
#[derive(Debug)]
#[non_exhaustive]
pub enum FrameError {
    /// Clean end of stream: zero bytes were available when more were
    /// requested. Not an error condition by itself.
    Eof,
    /// The stream ended partway through a record.
    UnexpectedEnd { needed: usize, got: usize },
    /// A record's bytes decoded to an invalid action/side or were
    /// otherwise malformed.
    InvalidRecord(RecordError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Eof => write!(f, "end of stream"),
            FrameError::UnexpectedEnd { needed, got } => {
                write!(f, "unexpected end of stream: needed {needed} bytes, got {got}")
            }
            FrameError::InvalidRecord(e) => write!(f, "invalid record: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<RecordError> for FrameError {
    fn from(e: RecordError) -> Self {
        FrameError::InvalidRecord(e)
    }
}
