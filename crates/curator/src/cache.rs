//! Cache persistence: warm-start state written per data root.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! u32 cache format version
//! u32 document metadata version
//! u32 asset record count
//! u32 file record count
//! asset records: string path | u32 blob len | metadata blob | file entry
//! file records:  string path | file entry
//! ```
//!
//! Strings are `u32` length + UTF-8 bytes; paths are stored absolute. A
//! file entry is `i64` timestamp (`i64::MIN` = invalid),
//! `u64` content hash, 16-byte owner UUID (nil = none). The metadata blob is
//! postcard-encoded [`DocumentMetadata`], covered by the metadata version.
//!
//! Any version mismatch or decode failure discards the whole cache file;
//! the curator then cold-starts for that root. Never an error.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::assets::AssetInfo;
use crate::curator::Curator;
use crate::error::{CuratorError, Result};
use crate::files::{FileEntry, FileStatus};
use crate::ingest::CURATOR_DIR;
use crate::manager::DocumentMetadata;
use crate::types::ExistenceState;

/// Bumped whenever the container layout changes.
pub const CACHE_FORMAT_VERSION: u32 = 2;
/// Bumped whenever the [`DocumentMetadata`] encoding changes.
pub const DOCUMENT_METADATA_VERSION: u32 = 1;

const CACHE_FILE: &str = "index.cache";
const INVALID_TIMESTAMP: i64 = i64::MIN;

fn cache_path(root: &Path) -> PathBuf {
    root.join(CURATOR_DIR).join(CACHE_FILE)
}

impl Curator {
    /// Writes one cache file per data root. Only settled state is saved:
    /// assets whose existence is `Unchanged`, and valid non-asset files.
    pub fn save_caches(&self) -> Result<()> {
        let data = self.shared.data.lock();
        for root in &self.shared.config.roots {
            let mut assets: Vec<&AssetInfo> = data
                .assets
                .iter()
                .filter(|(_, info)| {
                    info.existence == ExistenceState::Unchanged
                        && info.absolute_path.starts_with(root)
                })
                .map(|(_, info)| info)
                .collect();
            assets.sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));

            let mut files: Vec<(&PathBuf, &FileEntry)> = data
                .files
                .iter()
                .filter(|(path, entry)| {
                    entry.status == FileStatus::Valid
                        && entry.owner.is_none()
                        && entry.timestamp.is_some()
                        && path.starts_with(root)
                })
                .collect();
            files.sort_by(|a, b| a.0.cmp(b.0));

            let mut buf = Vec::new();
            write_u32(&mut buf, CACHE_FORMAT_VERSION);
            write_u32(&mut buf, DOCUMENT_METADATA_VERSION);
            write_u32(&mut buf, assets.len() as u32);
            write_u32(&mut buf, files.len() as u32);

            for info in &assets {
                write_path(&mut buf, &info.absolute_path);
                let blob = postcard::to_allocvec(&info.metadata)
                    .map_err(|err| CuratorError::Cache(err.to_string()))?;
                write_u32(&mut buf, blob.len() as u32);
                buf.extend_from_slice(&blob);
                let entry = data
                    .files
                    .get(&info.absolute_path)
                    .cloned()
                    .unwrap_or_default();
                write_entry(&mut buf, &entry);
            }
            for (path, entry) in &files {
                write_path(&mut buf, path);
                write_entry(&mut buf, entry);
            }

            let path = cache_path(root);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            // Atomic replace so readers never see a torn cache.
            let tmp = path.with_extension("cache.tmp");
            std::fs::write(&tmp, &buf)?;
            std::fs::rename(&tmp, &path)?;
            log::debug!(
                "saved cache for {}: {} assets, {} files",
                root.display(),
                assets.len(),
                files.len()
            );
        }
        Ok(())
    }

    /// Loads the per-root caches written by [`save_caches`](Self::save_caches).
    ///
    /// Asset metadata lands in the warm-start side table, adopted by document
    /// refreshes while the on-disk timestamp still matches. Plain file
    /// entries are restored with Unknown status; the next scan re-validates
    /// them. A missing, truncated, or version-mismatched cache is discarded
    /// and the root cold-starts.
    pub fn load_caches(&self) -> Result<()> {
        let mut data = self.shared.data.lock();
        for root in &self.shared.config.roots {
            let path = cache_path(root);
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match parse_cache(&bytes) {
                Ok((assets, files)) => {
                    log::info!(
                        "loaded cache for {}: {} assets, {} files",
                        root.display(),
                        assets.len(),
                        files.len()
                    );
                    for (path, metadata, entry) in assets {
                        data.cached_metadata.insert(path, (metadata, entry));
                    }
                    for (path, mut entry) in files {
                        entry.status = FileStatus::Unknown;
                        data.files.insert(path, entry);
                    }
                }
                Err(err) => {
                    log::warn!(
                        "discarding incompatible cache {}: {err}",
                        path.display()
                    );
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }
}

type CachedAssets = Vec<(PathBuf, DocumentMetadata, FileEntry)>;
type CachedFiles = Vec<(PathBuf, FileEntry)>;

fn parse_cache(bytes: &[u8]) -> Result<(CachedAssets, CachedFiles)> {
    let mut reader = Reader { buf: bytes, pos: 0 };

    let format = reader.read_u32()?;
    if format != CACHE_FORMAT_VERSION {
        return Err(CuratorError::Cache(format!(
            "cache format {format}, expected {CACHE_FORMAT_VERSION}"
        )));
    }
    let metadata_version = reader.read_u32()?;
    if metadata_version != DOCUMENT_METADATA_VERSION {
        return Err(CuratorError::Cache(format!(
            "metadata version {metadata_version}, expected {DOCUMENT_METADATA_VERSION}"
        )));
    }

    let asset_count = reader.read_u32()? as usize;
    let file_count = reader.read_u32()? as usize;

    let mut assets = Vec::with_capacity(asset_count);
    for _ in 0..asset_count {
        let path = PathBuf::from(reader.read_string()?);
        let blob_len = reader.read_u32()? as usize;
        let blob = reader.read_bytes(blob_len)?;
        let metadata: DocumentMetadata = postcard::from_bytes(blob)
            .map_err(|err| CuratorError::Cache(format!("metadata blob: {err}")))?;
        let entry = reader.read_entry()?;
        assets.push((path, metadata, entry));
    }
    let mut files = Vec::with_capacity(file_count);
    for _ in 0..file_count {
        let path = PathBuf::from(reader.read_string()?);
        let entry = reader.read_entry()?;
        files.push((path, entry));
    }
    Ok((assets, files))
}

// ---------------------------------------------------------------------
// Little-endian encoding helpers
// ---------------------------------------------------------------------

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_path(buf: &mut Vec<u8>, path: &Path) {
    let s = path.to_string_lossy();
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_entry(buf: &mut Vec<u8>, entry: &FileEntry) {
    buf.extend_from_slice(&entry.timestamp.unwrap_or(INVALID_TIMESTAMP).to_le_bytes());
    buf.extend_from_slice(&entry.content_hash.to_le_bytes());
    buf.extend_from_slice(entry.owner.unwrap_or(Uuid::nil()).as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CuratorError::Cache("truncated cache".into()))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CuratorError::Cache("malformed path string".into()))
    }

    fn read_entry(&mut self) -> Result<FileEntry> {
        let ts_bytes: [u8; 8] = self.read_bytes(8)?.try_into().unwrap_or_default();
        let timestamp = i64::from_le_bytes(ts_bytes);
        let hash_bytes: [u8; 8] = self.read_bytes(8)?.try_into().unwrap_or_default();
        let content_hash = u64::from_le_bytes(hash_bytes);
        let uuid_bytes: [u8; 16] = self.read_bytes(16)?.try_into().unwrap_or_default();
        let owner = Uuid::from_bytes(uuid_bytes);
        Ok(FileEntry {
            timestamp: (timestamp != INVALID_TIMESTAMP).then_some(timestamp),
            content_hash,
            status: FileStatus::Unknown,
            owner: (!owner.is_nil()).then_some(owner),
        })
    }
}
