//! File registry: last-known timestamp/hash/status per filesystem path.
//!
//! Every path seen by the curator gets an entry here, whether or not it is a
//! recognized asset; a plain `.png` may still be a transform dependency of
//! some asset. Content hashes are deliberately NOT recomputed on observe;
//! hashing is deferred to dependency-resolution time because it reads the
//! whole file.

use std::fs::File;
use std::hash::Hasher;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use fnv::FnvHasher;

use crate::error::Result;
use crate::types::AssetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileStatus {
    /// Not seen in the most recent scan epoch; candidate for deletion.
    #[default]
    Unknown,
    Valid,
}

/// Last-known state of one filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileEntry {
    /// Last known modification time (nanoseconds since epoch); `None` when
    /// the content is not trusted and must be re-read.
    pub timestamp: Option<i64>,
    /// 64-bit hash of the file bytes; 0 when unknown.
    pub content_hash: u64,
    pub status: FileStatus,
    /// The asset this file is the primary document of, if any. A path is
    /// owned by at most one asset at a time.
    pub owner: Option<AssetId>,
}

/// Mapping from absolute path to [`FileEntry`].
#[derive(Debug, Default)]
pub struct FileRegistry {
    entries: fnv::FnvHashMap<PathBuf, FileEntry>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut FileEntry> {
        self.entries.get_mut(path)
    }

    pub fn entry_mut(&mut self, path: &Path) -> &mut FileEntry {
        self.entries.entry(path.to_path_buf()).or_default()
    }

    pub fn insert(&mut self, path: PathBuf, entry: FileEntry) {
        self.entries.insert(path, entry);
    }

    pub fn remove(&mut self, path: &Path) -> Option<FileEntry> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileEntry)> {
        self.entries.iter()
    }

    /// Records a file as seen on disk. Returns true iff the timestamp
    /// differs from the stored value; in that case the stored content hash
    /// is cleared so the next dependency resolution re-reads the file.
    ///
    /// Invalidation fan-out to owning/dependent assets is the caller's job;
    /// the registry only knows about files.
    pub fn observe(&mut self, path: &Path, timestamp: i64) -> bool {
        let entry = self.entry_mut(path);
        entry.status = FileStatus::Valid;

        let changed = entry.timestamp != Some(timestamp);
        if changed {
            // Keep the timestamp invalid until the hash is recomputed, so a
            // racing hasher never pairs a fresh timestamp with a stale hash.
            entry.timestamp = None;
            entry.content_hash = 0;
        }
        changed
    }

    /// Marks a previously known path as no longer found. Returns the owning
    /// asset id, if the path was an asset document. A path never seen before
    /// is a no-op returning `None`.
    pub fn mark_missing(&mut self, path: &Path) -> Option<AssetId> {
        let entry = self.entries.get_mut(path)?;
        entry.timestamp = None;
        entry.content_hash = 0;
        entry.status = FileStatus::Unknown;
        entry.owner.take()
    }

    /// Marks every entry Unknown ahead of a full rescan. Entries still
    /// Unknown after the scan are confirmed deletions.
    pub fn begin_scan_epoch(&mut self) {
        for entry in self.entries.values_mut() {
            entry.status = FileStatus::Unknown;
        }
    }

    /// Paths still Unknown after a scan epoch, i.e. confirmed deletions.
    pub fn unknown_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.status == FileStatus::Unknown)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Modification time as nanoseconds since the Unix epoch.
pub fn file_timestamp(metadata: &std::fs::Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
    i64::try_from(nanos).ok()
}

/// Streaming FNV-1a hash over the file's bytes.
pub fn hash_file(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    let mut hasher = FnvHasher::default();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.write(&buf[..read]);
    }
    Ok(hasher.finish())
}
