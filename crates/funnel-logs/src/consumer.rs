//! The consumer pipeline
//!
//! Two actors share the work:
//! - the ingestion loop (the task calling [`Consumer::start`]) reads the input,
//!   counts lines and bytes, and decides when to rotate;
//! - a single writer task owns the destination. It renders lines, flushes on
//!   a timer, rotates, reloads and finally cleans up.
//!
//! They talk over a capacity-1 channel, so a slow destination throttles
//! ingestion instead of buffering the input in memory.

use chrono::{DateTime, Local};
use funnel_core::{Config, Error, Result};
use funnel_output::{OutputRegistry, OutputWriter};
use std::fs;
use std::io::{self, Write};
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::processor::{processor_for, LineProcessor};
use crate::rotation;
use crate::writer::ActiveFile;

/// Events handed from the ingestion loop to the writer task, in read order
#[derive(Debug)]
enum Feed {
    Line(Vec<u8>),
    Rotate,
}

/// Line and byte counts since the last rotation
#[derive(Debug, Default)]
pub(crate) struct Progress {
    lines: AtomicUsize,
    bytes: AtomicU64,
}

impl Progress {
    /// Count one line of `len` bytes; returns the updated totals
    fn record(&self, len: usize) -> (usize, u64) {
        let lines = self.lines.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = self.bytes.fetch_add(len as u64, Ordering::SeqCst) + len as u64;
        (lines, bytes)
    }

    fn reset(&self) {
        self.lines.store(0, Ordering::SeqCst);
        self.bytes.store(0, Ordering::SeqCst);
    }
}

/// Requests an orderly shutdown of a running [`Consumer`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Ask the writer task to flush and clean up, and wait until it has.
    ///
    /// Returns immediately when the writer task has already finished.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

/// Reads newline-delimited input and ships it to the configured destination
pub struct Consumer {
    config: Config,
    processor: Box<dyn LineProcessor>,
    registry: Arc<OutputRegistry>,
    reload_rx: Option<mpsc::Receiver<Config>>,
    shutdown_tx: mpsc::Sender<oneshot::Sender<()>>,
    shutdown_rx: mpsc::Receiver<oneshot::Sender<()>>,
}

impl Consumer {
    pub fn new(
        config: Config,
        processor: Box<dyn LineProcessor>,
        registry: Arc<OutputRegistry>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(4);
        Self {
            config,
            processor,
            registry,
            reload_rx: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Apply every config received on `rx` while running
    pub fn with_reload(mut self, rx: mpsc::Receiver<Config>) -> Self {
        self.reload_rx = Some(rx);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Consume `input` until end of stream or a shutdown request.
    ///
    /// Fails before reading anything if the destination cannot be set up. A
    /// read error on the input is returned once the writer task has cleaned up.
    pub async fn start<R>(self, input: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let Consumer {
            config,
            processor,
            registry,
            reload_rx,
            shutdown_rx,
            ..
        } = self;

        let destination = Destination::open(&config, &registry)?;
        info!("Consuming input into {}", destination.describe(&config));

        let progress = Arc::new(Progress::default());
        let (feed_tx, feed_rx) = mpsc::channel(1);
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();

        let writer = Writer {
            config: config.clone(),
            processor,
            registry,
            destination,
            progress: Arc::clone(&progress),
            errors: error_tx,
            rotated: 0,
            clock: Local::now,
        };
        let writer_task = tokio::spawn(writer.run(feed_rx, reload_rx, shutdown_rx));

        let result = ingest(input, &config, &progress, &feed_tx, &mut error_rx).await;

        // Closing the feed is the end-of-input signal
        drop(feed_tx);
        if let Err(e) = writer_task.await {
            error!("Writer task failed: {}", e);
            return Err(Error::WriterGone);
        }
        while let Ok(e) = error_rx.try_recv() {
            error!("{}", e);
        }

        if result.is_ok() {
            info!("Input consumed, shutting down");
        }
        result
    }
}

async fn ingest<R>(
    input: R,
    config: &Config,
    progress: &Progress,
    feed: &mpsc::Sender<Feed>,
    errors: &mut mpsc::UnboundedReceiver<Error>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut line = Vec::new();

    loop {
        // A cancelled read keeps its partial bytes in `line`
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut line) => read,
            Some(e) = errors.recv() => {
                report(e)?;
                continue;
            }
            _ = feed.closed() => {
                debug!("Writer task stopped, ending ingestion");
                return Ok(());
            }
        };

        match read {
            Ok(0) if line.is_empty() => return Ok(()),
            Ok(_) => {
                let len = line.len();
                if feed.send(Feed::Line(mem::take(&mut line))).await.is_err() {
                    return Ok(());
                }

                let (lines, bytes) = progress.record(len);
                if lines >= config.max_lines || bytes >= config.max_bytes {
                    progress.reset();
                    if feed.send(Feed::Rotate).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Err(e) => return Err(Error::Input(e)),
        }
    }
}

/// Log a failure reported by the writer task; fatal ones stop ingestion
fn report(e: Error) -> Result<()> {
    error!("{}", e);
    if e.is_fatal() {
        Err(e)
    } else {
        Ok(())
    }
}

/// Where rendered lines go
enum Destination {
    /// The active file; `None` after a rotation failed midway
    File(Option<ActiveFile>),
    Sink(Box<dyn OutputWriter>),
}

impl Destination {
    fn open(config: &Config, registry: &OutputRegistry) -> Result<Self> {
        match registry.resolve(config)? {
            Some(sink) => Ok(Destination::Sink(sink)),
            None => {
                fs::create_dir_all(&config.directory)?;
                Ok(Destination::File(Some(ActiveFile::open(config.active_path())?)))
            }
        }
    }

    fn writer(&mut self) -> Option<&mut dyn OutputWriter> {
        match self {
            Destination::File(file) => file.as_mut().map(|f| f as &mut dyn OutputWriter),
            Destination::Sink(sink) => Some(sink.as_mut()),
        }
    }

    fn describe(&self, config: &Config) -> String {
        match self {
            Destination::File(_) => config.active_path().display().to_string(),
            Destination::Sink(_) => format!("output {}", config.target),
        }
    }

    fn is_file(&self) -> bool {
        matches!(self, Destination::File(_))
    }

    fn close(self) -> Result<()> {
        match self {
            Destination::Sink(mut sink) => sink.close()?,
            Destination::File(Some(mut active)) => active.close()?,
            Destination::File(None) => {}
        }
        Ok(())
    }
}

fn remove_if_empty(path: &std::path::Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.len() == 0 => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The only owner of the destination, the processor and the live config
struct Writer {
    config: Config,
    processor: Box<dyn LineProcessor>,
    registry: Arc<OutputRegistry>,
    destination: Destination,
    progress: Arc<Progress>,
    errors: mpsc::UnboundedSender<Error>,
    /// Files rotated out by this run
    rotated: usize,
    /// Time source for timestamp renames
    clock: fn() -> DateTime<Local>,
}

impl Writer {
    async fn run(
        mut self,
        mut feed: mpsc::Receiver<Feed>,
        mut reload: Option<mpsc::Receiver<Config>>,
        mut shutdown: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        let mut ticker = flush_ticker(self.config.flush_interval());

        let ack = loop {
            tokio::select! {
                event = feed.recv() => match event {
                    Some(Feed::Line(line)) => self.write_line(&line),
                    Some(Feed::Rotate) => {
                        if let Err(e) = self.roll_over() {
                            self.report(e);
                        }
                    }
                    None => break None,
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.flush() {
                        self.report(e);
                    }
                }
                Some(config) = next_reload(&mut reload) => {
                    let interval = self.config.flush_interval();
                    self.reload(config);
                    if self.config.flush_interval() != interval {
                        ticker = flush_ticker(self.config.flush_interval());
                    }
                }
                Some(ack) = shutdown.recv() => {
                    info!("Shutdown requested");
                    break Some(ack);
                }
            }
        };

        self.finish();
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn report(&self, e: Error) {
        // The receiver only goes away once the writer task is joined
        let _ = self.errors.send(e);
    }

    fn write_line(&mut self, line: &[u8]) {
        let result = match self.destination.writer() {
            Some(mut out) => self.processor.write(&mut out, line),
            None => Err(Error::NoActiveFile),
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(out) = self.destination.writer() {
            out.flush()?;
        }
        Ok(())
    }

    /// Close out the current file and start a fresh one.
    ///
    /// A failed step skips the rest of the retirement (rename, compress,
    /// prune), but the active file is always reopened. If the rename failed
    /// its lines stay in the active file and go out with the next rotation.
    fn roll_over(&mut self) -> Result<()> {
        let file = match &mut self.destination {
            Destination::Sink(sink) => {
                sink.flush()?;
                return Ok(());
            }
            Destination::File(file) => file,
        };

        let closed = match file.take() {
            Some(mut active) => active.close().map_err(Error::from),
            None => Ok(()),
        };
        let retired = closed.and_then(|()| self.retire_active());
        let reopened = self.reopen_active();
        retired.and(reopened)
    }

    /// Rename, compress and prune; the active file must already be closed
    fn retire_active(&mut self) -> Result<()> {
        if self.config.active_path().exists() {
            let renamed = rotation::rename(&self.config, (self.clock)())?;
            self.rotated += 1;
            rotation::compress(&self.config, &renamed)?;
        }

        rotation::delete_old_files(&self.config)?;
        Ok(())
    }

    fn reopen_active(&mut self) -> Result<()> {
        fs::create_dir_all(&self.config.directory)?;
        let active = ActiveFile::open(self.config.active_path())?;
        self.destination = Destination::File(Some(active));
        Ok(())
    }

    /// Switch to a new config.
    ///
    /// Steps run in order and each failure is reported without rolling back
    /// the earlier ones. An invalid template keeps the old processor. A
    /// destination that cannot be set up keeps the old one, and the installed
    /// config keeps the old location and target so rotations follow the
    /// destination that is actually live.
    fn reload(&mut self, mut new: Config) {
        info!("Reloading configuration");

        if let Err(e) = self.roll_over() {
            self.report(e);
        }
        self.progress.reset();

        match processor_for(&new.prepend_value) {
            Ok(processor) => self.processor = processor,
            Err(e) => self.report(e),
        }

        if let Err(e) = self.swap_destination(&new) {
            warn!("Keeping current destination {}", self.destination.describe(&self.config));
            self.report(e);
            new.directory = self.config.directory.clone();
            new.active_file_name = self.config.active_file_name.clone();
            new.target = self.config.target.clone();
            new.target_options = self.config.target_options.clone();
        }

        self.config = new;
    }

    /// Install the destination for `new`.
    ///
    /// On error the current destination is untouched. Failures while
    /// releasing the old destination are reported, not returned.
    fn swap_destination(&mut self, new: &Config) -> Result<()> {
        let old_path = self.config.active_path();
        let same_file = new.target.is_file() && new.active_path() == old_path;

        let next = match self.registry.resolve(new)? {
            Some(sink) => Destination::Sink(sink),
            None => {
                if same_file && matches!(self.destination, Destination::File(Some(_))) {
                    return Ok(());
                }
                fs::create_dir_all(&new.directory)?;
                Destination::File(Some(ActiveFile::open(new.active_path())?))
            }
        };

        let old = mem::replace(&mut self.destination, next);
        let was_file = old.is_file();
        if let Err(e) = old.close() {
            self.report(e);
        }
        // The fresh file opened by the reload's rotation
        if was_file && !same_file {
            if let Err(e) = remove_if_empty(&old_path) {
                self.report(e);
            }
        }
        Ok(())
    }

    /// Final flush and cleanup; runs once, on end of input or shutdown
    fn finish(&mut self) {
        if let Err(e) = self.flush() {
            error!("Final flush failed: {}", e);
        }
        if let Err(e) = self.cleanup() {
            error!("Cleanup failed: {}", e);
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        let file = match &mut self.destination {
            Destination::Sink(sink) => {
                sink.close()?;
                return Ok(());
            }
            Destination::File(file) => file,
        };

        if let Some(mut active) = file.take() {
            active.close()?;
        }

        let path = self.config.active_path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Active file {} is gone, nothing to rotate", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // The file opened by the last rotation never received a line
        if metadata.len() == 0 && self.rotated > 0 {
            fs::remove_file(&path)?;
            return Ok(());
        }

        let renamed = rotation::rename(&self.config, (self.clock)())?;
        rotation::compress(&self.config, &renamed)?;
        Ok(())
    }
}

fn flush_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Next reload value; stays pending forever when reloading is off
async fn next_reload(reload: &mut Option<mpsc::Receiver<Config>>) -> Option<Config> {
    match reload {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
