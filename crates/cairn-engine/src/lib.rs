//! Turning directory trees back into bytes.
//!
//! - [`Extractor`] materializes a tree on disk through a four-stage
//!   pipeline (walk, batch, fetch, write) connected by bounded queues.
//! - [`ArchiveStreamer`] streams a subtree as a tar archive through a
//!   producer/consumer pipe.
//! - [`Stats`] and [`ProgressSink`] report progress at a bounded rate.

pub mod archive;
pub mod error;
pub mod extract;
pub mod progress;

pub use archive::ArchiveStreamer;
pub use error::EngineError;
pub use extract::{ExtractSummary, Extractor};
pub use progress::{ProgressSink, Stats, StatsSnapshot, TracingProgress};

#[cfg(test)]
mod tests;
