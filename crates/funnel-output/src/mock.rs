//! Mock implementations for testing

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

use crate::OutputWriter;

#[derive(Debug, Default)]
struct MockState {
    data: Vec<u8>,
    flushes: usize,
    closed: bool,
    fail_writes: bool,
}

/// A mock sink that records everything written to it.
///
/// Clones share the same state, so a test can keep one handle while the
/// consumer owns another.
#[derive(Debug, Clone, Default)]
pub struct MockOutput {
    state: Arc<Mutex<MockState>>,
}

impl MockOutput {
    /// Create a new mock output
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Bytes written so far
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Number of flush calls
    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Write for MockOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "mock write failure"));
        }
        state.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }
}

impl OutputWriter for MockOutput {
    fn close(&mut self) -> io::Result<()> {
        self.flush()?;
        self.state.lock().closed = true;
        Ok(())
    }
}
