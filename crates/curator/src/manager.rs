//! Collaborator interfaces: document-type managers and parsed metadata.
//!
//! The curator never runs a transform itself. Everything type-specific
//! (parsing a document's declared dependencies, checking whether outputs or
//! thumbnails are current, resolving lookup-table entries) goes through the
//! [`AssetTypeManager`] trait, implemented by the host application per
//! document type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::AssetId;

bitflags::bitflags! {
    /// Per-document-type behavior toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AssetTypeFlags: u8 {
        /// The type has a thumbnail that is generated separately from the
        /// transform; a stale thumbnail yields `NeedsThumbnail`.
        const SUPPORTS_THUMBNAIL = 1 << 0;
        /// The transform step produces the thumbnail as a side effect; a
        /// stale thumbnail yields `NeedsTransform` instead.
        const AUTO_THUMBNAIL_ON_TRANSFORM = 1 << 1;
    }
}

/// The dependency declarations and identity parsed from one asset document.
///
/// This is the unit serialized into the cache file as the metadata blob; the
/// encoding (postcard) is covered by `DOCUMENT_METADATA_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: AssetId,
    pub type_name: String,
    /// Hash over the document's own transform settings.
    pub settings_hash: u64,
    /// Path-or-UUID strings whose content gates re-transform.
    pub transform_dependencies: Vec<String>,
    /// Path-or-UUID strings needed at runtime (thumbnail rendering); their
    /// absence blocks thumbnails but not the transform.
    pub runtime_references: Vec<String>,
    /// Output tags; resolved to absolute paths by the owning manager.
    pub outputs: Vec<String>,
    pub sub_assets: Vec<SubAssetData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAssetData {
    pub id: AssetId,
    pub name: String,
}

/// External collaborator owning one document type.
pub trait AssetTypeManager: Send + Sync {
    fn type_name(&self) -> &str;

    /// Lower-case file extension (without dot) of documents of this type.
    fn file_extension(&self) -> &str;

    /// Bumped when the transform output format changes.
    fn type_version(&self) -> u32 {
        1
    }

    fn flags(&self) -> AssetTypeFlags {
        AssetTypeFlags::empty()
    }

    /// Hash of the active build/target configuration. Folded into every
    /// settings hash; changes when the profile changes.
    fn profile_hash(&self) -> u64 {
        0
    }

    /// Re-parses a document's header and returns its declared edges.
    fn read_document_metadata(&self, path: &Path) -> Result<DocumentMetadata>;

    /// Absolute path of the output file for the given tag (empty tag for the
    /// primary output).
    fn output_path(&self, source: &Path, tag: &str) -> PathBuf;

    /// Oracle: is the on-disk output for `asset_hash` present and current?
    fn is_output_up_to_date(&self, source: &Path, outputs: &[String], asset_hash: u64) -> bool;

    /// Oracle: is the on-disk thumbnail current for `thumbnail_hash`?
    fn is_thumbnail_up_to_date(&self, source: &Path, thumbnail_hash: u64, type_version: u32)
        -> bool;

    /// Resolved lookup-table entry for an asset or sub-asset, or `None` if
    /// this asset needs no entry.
    fn lookup_table_entry(&self, id: AssetId, source: &Path) -> Option<String> {
        let _ = (id, source);
        None
    }
}

/// Immutable descriptor tying a file extension to its manager.
#[derive(Clone)]
pub struct TypeDescriptor {
    pub manager: Arc<dyn AssetTypeManager>,
}

impl TypeDescriptor {
    pub fn new(manager: Arc<dyn AssetTypeManager>) -> Self {
        Self { manager }
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_name", &self.manager.type_name())
            .field("extension", &self.manager.file_extension())
            .finish()
    }
}

/// Immutable curator setup: data roots and registered document types.
#[derive(Debug, Clone, Default)]
pub struct CuratorConfig {
    /// Absolute data-root directories, scanned recursively.
    pub roots: Vec<PathBuf>,
    pub types: Vec<TypeDescriptor>,
}

impl CuratorConfig {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            types: Vec::new(),
        }
    }

    pub fn register_type(&mut self, manager: Arc<dyn AssetTypeManager>) {
        self.types.push(TypeDescriptor::new(manager));
    }

    /// Finds the descriptor for a path by its (lower-cased) extension.
    pub fn descriptor_for_path(&self, path: &Path) -> Option<&TypeDescriptor> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.types
            .iter()
            .find(|d| d.manager.file_extension() == ext)
    }

    /// Returns the data root containing `path`, if any.
    pub fn root_for_path(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .map(PathBuf::as_path)
            .find(|root| path.starts_with(root))
    }
}
