//! Incremental asset dependency and transform-state tracking library.
//!
//! This crate provides the bookkeeping core of an asset pipeline:
//! - File registry with timestamp/hash change detection
//! - Forward and inverse dependency indices with self-healing UUID edges
//! - Arena-backed asset and sub-asset records
//! - Optimistic, off-lock transform-state recomputation
//! - Versioned binary cache for warm starts
//! - Lookup-table output for runtime id resolution

pub mod assets;
pub mod cache;
mod curator;
pub mod deps;
pub mod error;
pub mod files;
mod ingest;
pub mod manager;
pub mod state;
mod table;
pub mod types;
mod update;

// Re-export main types
pub use cache::{CACHE_FORMAT_VERSION, DOCUMENT_METADATA_VERSION};
pub use curator::Curator;
pub use error::{CuratorError, Result};
pub use ingest::CURATOR_DIR;
pub use manager::{
    AssetTypeFlags, AssetTypeManager, CuratorConfig, DocumentMetadata, SubAssetData,
    TypeDescriptor,
};
pub use types::{
    AssetId, CuratorEvent, CuratorEventKind, ExistenceState, FileEvent, SubAssetSnapshot,
    TransformState, TransformStats,
};
