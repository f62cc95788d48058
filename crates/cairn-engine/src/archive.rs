//! Streaming tar export of a directory tree.
//!
//! A background task walks the tree and writes tar records into a bounded
//! pipe; the caller reads the archive from the returned [`PipeReader`] as it
//! is produced. Nothing is buffered beyond the pipe and one leaf read-ahead
//! window.

use std::io;
use std::sync::Arc;

use cairn_cas::{CasError, PipeReader, open_content_stream};
use cairn_store::BlobStore;
use cairn_tree::{DirectoryNode, FileEntry};
use cairn_types::{BlobId, FileFlags};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::error::EngineError;

/// Pipe buffer between the producer and the reader.
const ARCHIVE_PIPE_CAPACITY: usize = 256 * 1024;

/// Decides whether a path is exported.
///
/// Directory paths are passed with a trailing `/`; returning `false` for one
/// prunes the whole subtree. File paths are passed as-is.
pub type PathFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Exports directory trees as tar streams.
#[derive(Clone)]
pub struct ArchiveStreamer {
    store: Arc<dyn BlobStore>,
    read_ahead: usize,
}

impl ArchiveStreamer {
    /// Create a streamer reading content with up to `read_ahead` leaves in flight.
    pub fn new(store: Arc<dyn BlobStore>, read_ahead: usize) -> Self {
        Self { store, read_ahead }
    }

    /// Start exporting `root` and return the archive reader.
    ///
    /// Producer errors surface on the reader's next read once buffered bytes
    /// are drained. Dropping the reader stops the producer.
    pub fn export(&self, root: DirectoryNode, filter: Option<PathFilter>) -> PipeReader {
        let store = self.store.clone();
        let read_ahead = self.read_ahead;
        PipeReader::spawn(ARCHIVE_PIPE_CAPACITY, move |pipe, _cancel| async move {
            let mut builder = Builder::new(pipe);
            let entries = write_tree(&mut builder, store, root, filter, read_ahead).await?;
            let mut pipe = builder.into_inner().await.map_err(write_error)?;
            pipe.shutdown().await.map_err(write_error)?;
            debug!(entries, "archive export complete");
            Ok::<(), EngineError>(())
        })
    }
}

async fn write_tree<W>(
    out: &mut Builder<W>,
    store: Arc<dyn BlobStore>,
    root: DirectoryNode,
    filter: Option<PathFilter>,
    read_ahead: usize,
) -> Result<u64, EngineError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let allowed = |path: &str| filter.as_ref().is_none_or(|f| f(path));
    let mut entries = 0u64;

    let mut root = Some(root);
    let mut stack: Vec<(Option<BlobId>, String)> = vec![(None, String::new())];
    while let Some((id, prefix)) = stack.pop() {
        let node = match id {
            Some(id) => DirectoryNode::load(store.as_ref(), id).await?,
            None => root.take().unwrap_or_default(),
        };
        if !prefix.is_empty() {
            let mut header = entry_header(0, 0o775, EntryType::Directory);
            out.append_data(&mut header, &prefix, tokio::io::empty())
                .await
                .map_err(write_error)?;
            entries += 1;
        }

        for file in node.files() {
            let path = format!("{prefix}{}", file.name);
            if !allowed(&path) {
                continue;
            }
            write_file(out, &store, &path, file, read_ahead).await?;
            entries += 1;
        }

        // Reverse so subdirectories come out in ascending name order.
        for dir in node.directories().rev() {
            let path = format!("{prefix}{}/", dir.name);
            if allowed(&path) {
                stack.push((Some(dir.child), path));
            }
        }
    }
    Ok(entries)
}

async fn write_file<W>(
    out: &mut Builder<W>,
    store: &Arc<dyn BlobStore>,
    path: &str,
    file: &FileEntry,
    read_ahead: usize,
) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    // The builder pads whatever the reader yields, so the header size must
    // match the content root exactly.
    if file.length != file.content.length {
        return Err(CasError::Integrity {
            id: file.content.hash,
            reason: format!(
                "{path}: entry says {} bytes, content root says {}",
                file.length, file.content.length
            ),
        }
        .into());
    }

    let mode = if file.flags.contains(FileFlags::EXECUTABLE) {
        0o775
    } else {
        0o664
    };
    let mut header = entry_header(file.length, mode, EntryType::Regular);
    let content = open_content_stream(store.clone(), file.content, read_ahead);
    out.append_data(&mut header, path, content)
        .await
        .map_err(write_error)
}

/// Header for one entry with fixed ownership and a zero mtime, so the same
/// tree always exports to the same bytes.
fn entry_header(size: u64, mode: u32, kind: EntryType) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Map an archive write failure.
///
/// A broken pipe means the reader went away. Content-stream failures carry
/// the chunk-tree error that caused them.
fn write_error(e: io::Error) -> EngineError {
    if e.kind() == io::ErrorKind::BrokenPipe {
        return EngineError::Cancelled;
    }
    if !e.get_ref().is_some_and(|inner| inner.is::<CasError>()) {
        return EngineError::Io(e);
    }
    let kind = e.kind();
    match e.into_inner().map(|inner| inner.downcast::<CasError>()) {
        Some(Ok(cas)) => EngineError::Cas(*cas),
        _ => EngineError::Io(io::Error::from(kind)),
    }
}
