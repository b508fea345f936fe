//! Funnel Logs - Ingestion, line processing, rotation, and retention
//!
//! [`Consumer`] reads newline-delimited input and hands every line to a single
//! writer task that owns the destination: either the active file, rotated by
//! line or byte count, or a sink from the output registry.

mod consumer;
mod processor;
pub mod rotation;
mod writer;

pub use consumer::{Consumer, ShutdownHandle};
pub use processor::{processor_for, LineProcessor, Passthrough, Prefix, TemplatePrefix};
pub use writer::ActiveFile;
