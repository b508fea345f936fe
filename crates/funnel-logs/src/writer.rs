//! Handle on the active log file

use funnel_core::Result;
use funnel_output::OutputWriter;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The file currently receiving lines.
///
/// Opened in append mode, so an `out.log` left behind by a previous run keeps
/// its contents and rolls over with the next rotation.
pub struct ActiveFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ActiveFile {
    /// Open (or create) the active file. The parent directory must exist.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened active file {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for ActiveFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl OutputWriter for ActiveFile {
    /// Flush buffered data and sync it to disk
    fn close(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}
