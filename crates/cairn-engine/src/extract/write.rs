//! Write stage: destination files and the workers writing into them.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use cairn_types::FileFlags;
use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::FetchedBatch;
use crate::error::EngineError;
use crate::progress::Stats;

/// One destination file shared by every chunk written into it.
///
/// The handle is opened by whichever chunk arrives first. `pending` counts
/// outstanding chunks plus one guard held by the walk stage until it has
/// emitted the file's last descriptor, so the count reaches zero exactly
/// once, after the last write.
#[derive(Debug)]
pub(crate) struct FileTarget {
    path: PathBuf,
    length: u64,
    flags: FileFlags,
    pending: AtomicU64,
    file: OnceCell<Arc<File>>,
}

impl FileTarget {
    pub(crate) fn new(path: PathBuf, length: u64, flags: FileFlags) -> Self {
        Self {
            path,
            length,
            flags,
            pending: AtomicU64::new(1),
            file: OnceCell::new(),
        }
    }

    /// Register one more chunk before its descriptor is sent.
    pub(crate) fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    async fn handle(&self) -> io::Result<Arc<File>> {
        let file = self
            .file
            .get_or_try_init(|| {
                let path = self.path.clone();
                let length = self.length;
                async move {
                    let file = tokio::task::spawn_blocking(move || open_destination(&path, length))
                        .await
                        .map_err(io::Error::other)??;
                    Ok::<_, io::Error>(Arc::new(file))
                }
            })
            .await?;
        Ok(file.clone())
    }

    /// Write `data` at `offset`.
    pub(crate) async fn write_at(&self, offset: u64, data: Bytes) -> io::Result<()> {
        let file = self.handle().await?;
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(io::Error::other)?
    }

    /// Drop one pending reference. Returns `true` if this finished the file.
    pub(crate) async fn release(&self) -> io::Result<bool> {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(false);
        }
        // A file without chunks is created here.
        let file = self.handle().await?;
        let flags = self.flags;
        tokio::task::spawn_blocking(move || finalize_permissions(&file, flags))
            .await
            .map_err(io::Error::other)??;
        debug!(path = %self.path.display(), length = self.length, "file complete");
        Ok(true)
    }
}

/// Open (creating if needed) and size a destination file.
fn open_destination(path: &Path, length: u64) -> io::Result<File> {
    // A read-only file left by an earlier run must become writable again.
    if let Ok(meta) = std::fs::metadata(path)
        && meta.is_file()
        && meta.permissions().readonly()
    {
        let mut perms = meta.permissions();
        make_writable(&mut perms);
        std::fs::set_permissions(path, perms)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.set_len(length)?;
    Ok(file)
}

#[cfg(unix)]
fn make_writable(perms: &mut std::fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(perms.mode() | 0o200);
}

#[cfg(not(unix))]
fn make_writable(perms: &mut std::fs::Permissions) {
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
}

#[cfg(unix)]
fn finalize_permissions(file: &File, flags: FileFlags) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut mode = if flags.contains(FileFlags::EXECUTABLE) {
        0o755
    } else {
        0o644
    };
    if flags.contains(FileFlags::READ_ONLY) {
        mode &= !0o222;
    }
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn finalize_permissions(file: &File, flags: FileFlags) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(flags.contains(FileFlags::READ_ONLY));
    file.set_permissions(perms)
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    use std::sync::Mutex;

    // Write workers share one handle, so seek and write must not interleave.
    static CURSOR: Mutex<()> = Mutex::new(());
    let _guard = CURSOR.lock().expect("lock poisoned");
    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

/// Write worker: drain fetched batches until the queue closes or the run
/// is cancelled.
pub(crate) async fn write_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<FetchedBatch>>>,
    stats: Arc<Stats>,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                batch = rx.recv() => batch,
            }
        };
        let Some(batch) = next else {
            return Ok(());
        };

        // Group by destination so each file's handle is resolved once per batch.
        let mut groups: Vec<(Arc<FileTarget>, Vec<(u64, Bytes)>)> = Vec::new();
        for (desc, data) in batch.chunks {
            match groups.iter_mut().find(|(t, _)| Arc::ptr_eq(t, &desc.target)) {
                Some((_, writes)) => writes.push((desc.offset, data)),
                None => groups.push((desc.target, vec![(desc.offset, data)])),
            }
        }

        for (target, writes) in groups {
            for (offset, data) in writes {
                let len = data.len() as u64;
                target.write_at(offset, data).await.inspect_err(|_| cancel.cancel())?;
                stats.add_chunk(len);
                if target.release().await.inspect_err(|_| cancel.cancel())? {
                    stats.add_file();
                }
            }
        }
        debug!(worker, "batch written");
    }
}
