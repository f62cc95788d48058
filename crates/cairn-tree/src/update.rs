//! Overlay of pending changes to a directory tree.
//!
//! A [`DirectoryUpdate`] mirrors the shape of the tree it will be applied
//! to. Each file slot holds either a new [`FileUpdate`] or `None` for
//! deletion. Each subdirectory slot holds a nested overlay or `None` for
//! deletion of the whole subtree.
//!
//! Subdirectories are keyed by [`ReverseName`], so forward iteration visits
//! names in descending order. [`DirectoryUpdate::post_order`] turns that into
//! an explicit children-before-parent sequence that the planner rewrites in.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use cairn_cas::WriteResult;
use cairn_types::{ChunkRef, FileFlags, StreamHash};

use crate::entry::{FileEntry, validate_name};
use crate::error::TreeError;
use crate::node::segments;

/// Directory name ordered in reverse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReverseName(pub String);

impl Ord for ReverseName {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for ReverseName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Where a file's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// An already built chunk tree.
    Root(ChunkRef),
    /// Stored leaves whose interior layers are built when the update is applied.
    Leaves(Vec<ChunkRef>),
}

/// New state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    /// Flag bits for the entry.
    pub flags: FileFlags,
    /// `blake3` of the whole file.
    pub stream_hash: StreamHash,
    /// File size in bytes.
    pub length: u64,
    /// Chunk tree or pending leaves.
    pub content: FileContent,
    /// Opaque caller data.
    pub custom_data: Option<Bytes>,
}

impl FileUpdate {
    /// Update from a completed writer stream, deferring tree construction.
    pub fn from_write(result: WriteResult, flags: FileFlags) -> Self {
        Self {
            flags,
            stream_hash: result.stream_hash,
            length: result.length,
            content: FileContent::Leaves(result.leaves),
            custom_data: None,
        }
    }

    /// Update that re-links an existing entry's content.
    pub fn from_entry(entry: &FileEntry) -> Self {
        Self {
            flags: entry.flags,
            stream_hash: entry.stream_hash,
            length: entry.length,
            content: FileContent::Root(entry.content),
            custom_data: entry.custom_data.clone(),
        }
    }
}

/// Pending changes below one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryUpdate {
    replace: bool,
    files: BTreeMap<String, Option<FileUpdate>>,
    directories: BTreeMap<ReverseName, Option<DirectoryUpdate>>,
}

impl DirectoryUpdate {
    /// An overlay with no changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the base directory is discarded instead of modified.
    ///
    /// Set when a path is added beneath a directory this overlay deletes.
    pub fn replace(&self) -> bool {
        self.replace
    }

    /// Whether the overlay carries no change at all.
    pub fn is_empty(&self) -> bool {
        !self.replace && self.files.is_empty() && self.directories.is_empty()
    }

    /// Set (`Some`) or delete (`None`) the file at `path`.
    ///
    /// Intermediate directories are created in the overlay as needed.
    pub fn add_file(&mut self, path: &str, update: Option<FileUpdate>) -> Result<(), TreeError> {
        let (dirs, name) = split_path(path)?;
        let parent = self.descend(path, &dirs)?;
        if matches!(parent.directories.get(&ReverseName(name.to_string())), Some(Some(_))) {
            return Err(TreeError::InvalidPath {
                path: path.to_string(),
                reason: "a directory with this name is being updated",
            });
        }
        parent.files.insert(name.to_string(), update);
        Ok(())
    }

    /// Delete the file at `path`.
    pub fn delete_file(&mut self, path: &str) -> Result<(), TreeError> {
        self.add_file(path, None)
    }

    /// Ensure the directory at `path` exists after the update, even if empty.
    pub fn add_directory(&mut self, path: &str) -> Result<(), TreeError> {
        let all: Vec<&str> = segments(path).collect();
        if all.is_empty() {
            return Ok(());
        }
        self.descend(path, &all).map(|_| ())
    }

    /// Delete the directory at `path` and everything beneath it.
    pub fn delete_directory(&mut self, path: &str) -> Result<(), TreeError> {
        let (dirs, name) = split_path(path)?;
        let parent = self.descend(path, &dirs)?;
        parent.directories.insert(ReverseName(name.to_string()), None);
        Ok(())
    }

    /// File slots in ascending name order.
    pub fn files(&self) -> impl Iterator<Item = (&str, Option<&FileUpdate>)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Directory slots in descending name order.
    pub fn directories(&self) -> impl Iterator<Item = (&str, Option<&DirectoryUpdate>)> {
        self.directories
            .iter()
            .map(|(k, v)| (k.0.as_str(), v.as_ref()))
    }

    /// Number of file slots set or deleted, recursively.
    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .directories
                .values()
                .flatten()
                .map(DirectoryUpdate::file_count)
                .sum::<usize>()
    }

    /// Fold `later` into this overlay. Where both touch the same slot,
    /// `later` wins.
    pub fn merge(&mut self, later: DirectoryUpdate) {
        if later.replace {
            *self = later;
            return;
        }
        self.files.extend(later.files);
        for (name, slot) in later.directories {
            match (self.directories.get_mut(&name), slot) {
                (Some(Some(existing)), Some(update)) => existing.merge(update),
                (Some(None), Some(mut update)) => {
                    update.replace = true;
                    self.directories.insert(name, Some(update));
                }
                (_, slot) => {
                    self.directories.insert(name, slot);
                }
            }
        }
    }

    /// Every nested overlay with its path, children before their parent.
    ///
    /// Siblings appear in descending name order. The root comes last with
    /// path `""`; deleted subdirectories are not listed.
    pub fn post_order(&self) -> Vec<(String, &DirectoryUpdate)> {
        let mut out = Vec::new();
        self.collect_post_order(String::new(), &mut out);
        out
    }

    fn collect_post_order<'a>(&'a self, path: String, out: &mut Vec<(String, &'a DirectoryUpdate)>) {
        for (name, slot) in &self.directories {
            if let Some(child) = slot {
                let child_path = if path.is_empty() {
                    name.0.clone()
                } else {
                    format!("{path}/{}", name.0)
                };
                child.collect_post_order(child_path, out);
            }
        }
        out.push((path, self));
    }

    /// Walk to (creating as needed) the overlay for `dirs`.
    fn descend(&mut self, path: &str, dirs: &[&str]) -> Result<&mut DirectoryUpdate, TreeError> {
        let mut current = self;
        for dir in dirs {
            validate_name(dir)?;
            if matches!(current.files.get(*dir), Some(Some(_))) {
                return Err(TreeError::InvalidPath {
                    path: path.to_string(),
                    reason: "a file with this name is being added",
                });
            }
            let slot = current
                .directories
                .entry(ReverseName(dir.to_string()))
                .or_insert_with(|| Some(DirectoryUpdate::new()));
            // Adding below a deleted directory starts it over from empty.
            let child = slot.get_or_insert_with(|| DirectoryUpdate {
                replace: true,
                ..DirectoryUpdate::default()
            });
            current = child;
        }
        Ok(current)
    }
}

/// Split a path into its parent segments and final name.
fn split_path(path: &str) -> Result<(Vec<&str>, &str), TreeError> {
    let mut parts: Vec<&str> = segments(path).collect();
    let name = parts.pop().ok_or_else(|| TreeError::InvalidPath {
        path: path.to_string(),
        reason: "path has no name",
    })?;
    validate_name(name)?;
    Ok((parts, name))
}
