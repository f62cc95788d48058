//! Immutable directory trees over content-addressed chunk trees.
//!
//! This crate provides:
//! - [`DirectoryNode`]: one directory level, two name-keyed maps sharing a
//!   single namespace, persisted as a `Directory` blob.
//! - [`DirectoryUpdate`]: an overlay of pending file and directory changes.
//! - [`UpdatePlanner`]: applies an overlay to a base tree, producing a new
//!   root that shares every untouched subtree with the base.
//! - [`Ingestor`]: chunks many files in parallel lanes balanced by byte
//!   volume and turns them into a single overlay.

mod apply;
mod codec;
mod entry;
mod error;
mod ingest;
mod node;
mod update;

pub use apply::UpdatePlanner;
pub use entry::{DirectoryEntry, DirectoryRef, FileEntry, validate_name};
pub use error::TreeError;
pub use ingest::{IngestFile, IngestSource, Ingestor, partition_by_volume, scan_directory};
pub use node::DirectoryNode;
pub use update::{DirectoryUpdate, FileContent, FileUpdate, ReverseName};
