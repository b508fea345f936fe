//! Funnel Output - Destinations for processed lines
//!
//! Every destination other than local files is an [`OutputWriter`] built by a
//! named factory in the [`OutputRegistry`]:
//! - stdout
//! - (sinks for search indexes, brokers, object stores register the same way)

#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod registry;
mod stdout;

pub use registry::{global, OutputFactory, OutputRegistry};
pub use stdout::StreamOutput;

use std::io::{self, Write};

/// Capability implemented by every sink.
///
/// `write` and `flush` come from [`std::io::Write`]; a sink may buffer writes
/// and ship them as a batch on `flush`.
pub trait OutputWriter: Write + Send {
    /// Release the destination, flushing anything still buffered
    fn close(&mut self) -> io::Result<()>;
}
