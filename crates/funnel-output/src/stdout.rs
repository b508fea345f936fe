//! Sink that writes processed lines to a byte stream

use std::io::{self, BufWriter, Stdout, Write};

use crate::OutputWriter;

/// Buffered writer over any stream; registered as `stdout`
pub struct StreamOutput<W: Write + Send> {
    inner: BufWriter<W>,
}

impl StreamOutput<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> StreamOutput<W> {
    pub fn new(stream: W) -> Self {
        Self {
            inner: BufWriter::new(stream),
        }
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

impl<W: Write + Send> Write for StreamOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Send> OutputWriter for StreamOutput<W> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
