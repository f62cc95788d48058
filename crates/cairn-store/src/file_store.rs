//! File-based blob storage backend.
//!
//! Stores one file per blob with a 2-level fan-out directory structure:
//! `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`. Each file holds the one-byte
//! blob type tag followed by the payload.

use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use cairn_types::{BlobId, BlobType};
use tracing::{debug, error};

use crate::error::StoreError;
use crate::traits::{Blob, BlobStore};

/// File-based blob store with 2-level fan-out directory layout.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place. Reads re-hash the payload and reject blobs whose
/// content no longer matches their id.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a new file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Root directory of the store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        let hex = id.to_string();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    fn decode(id: BlobId, raw: Vec<u8>) -> Result<Blob, StoreError> {
        let Some((&tag, _)) = raw.split_first() else {
            return Err(StoreError::UnknownBlobType(u8::MAX));
        };
        let blob_type = BlobType::from_tag(tag).ok_or(StoreError::UnknownBlobType(tag))?;
        let data = Bytes::from(raw).slice(1..);

        let actual = BlobId::for_blob(blob_type, &data);
        if actual != id {
            error!(expected = %id, %actual, "blob corruption detected on read");
            return Err(StoreError::Corrupt {
                expected: id,
                actual,
            });
        }
        Ok(Blob { blob_type, data })
    }
}

#[async_trait::async_trait]
impl BlobStore for FileStore {
    async fn put(&self, blob_type: BlobType, data: Bytes) -> Result<BlobId, StoreError> {
        let id = BlobId::for_blob(blob_type, &data);
        let path = self.blob_path(&id);

        if tokio::fs::try_exists(&path).await? {
            debug!(%id, "blob already present");
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut framed = BytesMut::with_capacity(data.len() + 1);
        framed.put_u8(blob_type.tag());
        framed.put_slice(&data);

        // Write to a sibling temp file, then rename into place.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &framed).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(%id, %blob_type, path = %path.display(), size = data.len(), "stored blob to file");
        Ok(id)
    }

    async fn get(&self, id: BlobId) -> Result<Option<Blob>, StoreError> {
        let path = self.blob_path(&id);
        match tokio::fs::read(&path).await {
            Ok(raw) => Self::decode(id, raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn contains(&self, id: BlobId) -> Result<bool, StoreError> {
        let path = self.blob_path(&id);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<BlobId>, StoreError> {
        let mut ids = Vec::new();

        // Walk the 2-level fan-out: base/XX/YY/<hex>
        let mut level0 = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(d0) = level0.next_entry().await? {
            if !d0.file_type().await?.is_dir() {
                continue;
            }
            let mut level1 = tokio::fs::read_dir(d0.path()).await?;
            while let Some(d1) = level1.next_entry().await? {
                if !d1.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = tokio::fs::read_dir(d1.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str()
                        && let Ok(id) = name.parse::<BlobId>()
                    {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        // Renames are already visible; persist the directory entries.
        let dir = self.base_dir.clone();
        tokio::task::spawn_blocking(move || std::fs::File::open(&dir).and_then(|f| f.sync_all()))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}
