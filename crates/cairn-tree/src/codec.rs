//! Directory blob encoding.
//!
//! ```text
//! varint node_flags (0)
//! varint file_count
//!   [32] content root hash
//!   u8   content node type tag
//!   varint name_len, name (UTF-8)
//!   varint flags (| 1 << 31 when custom data follows)
//!   varint length
//!   [32] stream hash
//!   [varint custom_len, custom data]
//! varint directory_count
//!   [32] child directory id
//!   varint length
//!   varint name_len, name (UTF-8)
//! ```
//!
//! Varints are unsigned LEB128. Entries are written in ascending name order,
//! which decoding enforces so every directory has exactly one encoding.

use bytes::{BufMut, Bytes, BytesMut};
use cairn_types::{BlobId, BlobType, ChunkKind, ChunkRef, FileFlags, StreamHash};

use crate::entry::{DirectoryEntry, FileEntry};
use crate::error::TreeError;

/// Per-file flag bit marking trailing custom data.
const HAS_CUSTOM_DATA: u64 = 1 << 31;

/// Longest varint encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

pub(crate) fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_name(buf: &mut BytesMut, name: &str) {
    put_varint(buf, name.len() as u64);
    buf.put_slice(name.as_bytes());
}

/// Encode one directory level.
pub(crate) fn encode_directory<'a>(
    files: impl ExactSizeIterator<Item = &'a FileEntry>,
    directories: impl ExactSizeIterator<Item = &'a DirectoryEntry>,
) -> Bytes {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, 0);

    put_varint(&mut buf, files.len() as u64);
    for file in files {
        buf.put_slice(file.content.hash.as_bytes());
        buf.put_u8(file.content.kind.blob_type().tag());
        put_name(&mut buf, &file.name);
        let mut flags = u64::from(file.flags.bits());
        if file.has_custom_data() {
            flags |= HAS_CUSTOM_DATA;
        }
        put_varint(&mut buf, flags);
        put_varint(&mut buf, file.length);
        buf.put_slice(file.stream_hash.as_bytes());
        if let Some(custom) = &file.custom_data {
            put_varint(&mut buf, custom.len() as u64);
            buf.put_slice(custom);
        }
    }

    put_varint(&mut buf, directories.len() as u64);
    for dir in directories {
        buf.put_slice(dir.child.as_bytes());
        put_varint(&mut buf, dir.length);
        put_name(&mut buf, &dir.name);
    }

    buf.freeze()
}

/// Decode one directory level.
pub(crate) fn decode_directory(
    data: &[u8],
) -> Result<(Vec<FileEntry>, Vec<DirectoryEntry>), TreeError> {
    let mut r = Reader { data, pos: 0 };

    let node_flags = r.varint()?;
    if node_flags != 0 {
        return Err(format_err(format!("unknown directory flags {node_flags:#x}")));
    }

    let file_count = r.count()?;
    let mut files: Vec<FileEntry> = Vec::with_capacity(file_count);
    for _ in 0..file_count {
        let hash = BlobId::from(r.array32()?);
        let tag = r.u8()?;
        let kind = BlobType::from_tag(tag)
            .and_then(ChunkKind::from_blob_type)
            .ok_or_else(|| format_err(format!("invalid content node tag {tag}")))?;
        let name = r.name()?;
        let raw_flags = r.varint()?;
        let has_custom = raw_flags & HAS_CUSTOM_DATA != 0;
        let flags = u32::try_from(raw_flags & !HAS_CUSTOM_DATA)
            .ok()
            .and_then(FileFlags::from_bits)
            .ok_or_else(|| format_err(format!("unknown file flags {raw_flags:#x} on {name:?}")))?;
        let length = r.varint()?;
        let stream_hash = StreamHash::from(r.array32()?);
        let custom_data = if has_custom {
            let len = r.count()?;
            Some(Bytes::copy_from_slice(r.take(len)?))
        } else {
            None
        };

        if let Some(prev) = files.last()
            && prev.name >= name
        {
            return Err(format_err(format!("file {name:?} out of order")));
        }
        files.push(FileEntry {
            name,
            flags,
            length,
            stream_hash,
            content: ChunkRef { hash, length, kind },
            custom_data,
        });
    }

    let dir_count = r.count()?;
    let mut directories: Vec<DirectoryEntry> = Vec::with_capacity(dir_count);
    for _ in 0..dir_count {
        let child = BlobId::from(r.array32()?);
        let length = r.varint()?;
        let name = r.name()?;
        if let Some(prev) = directories.last()
            && prev.name >= name
        {
            return Err(format_err(format!("directory {name:?} out of order")));
        }
        directories.push(DirectoryEntry {
            name,
            length,
            child,
        });
    }

    if r.pos != data.len() {
        return Err(format_err(format!(
            "{} trailing bytes after directory",
            data.len() - r.pos
        )));
    }
    Ok((files, directories))
}

fn format_err(msg: String) -> TreeError {
    TreeError::Format(msg)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TreeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format_err(format!("truncated directory blob at byte {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TreeError> {
        Ok(self.take(1)?[0])
    }

    fn array32(&mut self) -> Result<[u8; 32], TreeError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn varint(&mut self) -> Result<u64, TreeError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.u8()?;
            let bits = u64::from(byte & 0x7f);
            if i == MAX_VARINT_LEN - 1 && bits > 1 {
                return Err(format_err("varint overflows u64".into()));
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(format_err("varint longer than 10 bytes".into()))
    }

    /// A varint used as an element count or byte length, bounded by what is left.
    fn count(&mut self) -> Result<usize, TreeError> {
        let n = self.varint()?;
        let remaining = (self.data.len() - self.pos) as u64;
        if n > remaining {
            return Err(format_err(format!(
                "count {n} exceeds remaining {remaining} bytes"
            )));
        }
        Ok(n as usize)
    }

    fn name(&mut self) -> Result<String, TreeError> {
        let len = self.count()?;
        let raw = self.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|e| format_err(format!("name is not UTF-8: {e}")))?;
        crate::entry::validate_name(name).map_err(|_| format_err(format!("invalid name {name:?}")))?;
        Ok(name.to_string())
    }
}
