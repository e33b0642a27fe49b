//! Fixed-capacity output buffer with tail retention
//!
//! Background jobs can produce unbounded output. Each stream is captured into
//! a [`BoundedBuffer`] that keeps only the most recent `capacity` bytes and
//! remembers how much it has thrown away.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;

#[derive(Debug, Default)]
struct BufferState {
    data: VecDeque<u8>,
    total_written: u64,
    truncated: bool,
}

/// A byte sink that discards its oldest content when full
///
/// Invariants: the retained content never exceeds `capacity` bytes, and once
/// truncated the buffer reports truncation forever.
#[derive(Debug)]
pub struct BoundedBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
}

impl BoundedBuffer {
    /// Create a buffer retaining at most `capacity` bytes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Append bytes, evicting the oldest retained bytes if needed
    ///
    /// Never blocks on consumers and never fails.
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.total_written += bytes.len() as u64;

        if state.data.len() + bytes.len() <= self.capacity {
            state.data.extend(bytes);
            return;
        }

        state.truncated = true;
        if bytes.len() >= self.capacity {
            state.data.clear();
            state.data.extend(&bytes[bytes.len() - self.capacity..]);
        } else {
            let overflow = state.data.len() + bytes.len() - self.capacity;
            state.data.drain(..overflow);
            state.data.extend(bytes);
        }
    }

    /// Retained content, prefixed with a truncation notice if bytes were dropped
    #[must_use]
    pub fn read(&self) -> String {
        let state = self.state.lock();
        let (head, tail) = state.data.as_slices();
        let mut bytes = Vec::with_capacity(state.data.len());
        bytes.extend_from_slice(head);
        bytes.extend_from_slice(tail);
        let content = String::from_utf8_lossy(&bytes);

        if state.truncated {
            let omitted = state.total_written - state.data.len() as u64;
            format!("... [output truncated: {omitted} bytes omitted] ...\n\n{content}")
        } else {
            content.into_owned()
        }
    }

    /// Retained bytes without any notice
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.state.lock().data.iter().copied().collect()
    }

    /// Number of retained bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Whether nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum retained bytes
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written over the buffer's whole lifetime
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.state.lock().total_written
    }

    /// Whether any bytes were ever discarded
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.state.lock().truncated
    }
}

impl io::Write for &BoundedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BoundedBuffer::write(*self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
