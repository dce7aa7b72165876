//! Asset index: arena-backed storage for asset and sub-asset records.
//!
//! `AssetInfo` records live in a slab arena and are addressed by a dense
//! integer handle; the UUID → handle mapping is a separate index. Sub-asset
//! records hold the handle, not a reference, so there is no dangling-pointer
//! hazard when assets are removed concurrently with queries.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fnv::FnvHashMap;
use slab::Slab;

use crate::manager::{DocumentMetadata, TypeDescriptor};
use crate::types::{AssetId, ExistenceState, SubAssetSnapshot, TransformState};

/// Dense arena handle for an [`AssetInfo`].
pub type AssetHandle = usize;

/// Full metadata for one primary asset document.
#[derive(Debug)]
pub struct AssetInfo {
    pub metadata: DocumentMetadata,
    pub descriptor: TypeDescriptor,
    pub absolute_path: PathBuf,
    /// Relative to the owning data root.
    pub relative_path: PathBuf,
    pub existence: ExistenceState,
    pub transform_state: TransformState,
    /// Valid only while the asset is not tagged stale.
    pub asset_hash: u64,
    pub thumbnail_hash: u64,
    pub missing_dependencies: BTreeSet<String>,
    pub missing_references: BTreeSet<String>,
    /// Non-main sub-assets currently produced by this document. The main
    /// sub-asset shares the asset's own id and is not listed here.
    pub sub_assets: BTreeSet<AssetId>,
    /// Bumped on every invalidation; an off-lock computation that observed
    /// an older value discards its result instead of writing it back.
    pub last_state_update: u32,
}

impl AssetInfo {
    pub fn id(&self) -> AssetId {
        self.metadata.id
    }

    /// Adopts a re-parsed document, keeping the transient curator fields.
    pub fn update_from(&mut self, metadata: DocumentMetadata, absolute: PathBuf, relative: PathBuf) {
        self.metadata = metadata;
        self.absolute_path = absolute;
        self.relative_path = relative;
        self.asset_hash = 0;
        self.thumbnail_hash = 0;
    }
}

/// Lightweight record for one output unit of a document.
#[derive(Debug)]
pub struct SubAsset {
    pub parent: AssetHandle,
    pub is_main: bool,
    /// Empty for main sub-assets.
    pub name: String,
    pub existence: ExistenceState,
    pub last_access: Option<Instant>,
}

/// Arena of assets plus the id-keyed indices over it.
#[derive(Debug, Default)]
pub struct AssetIndex {
    arena: Slab<AssetInfo>,
    by_id: FnvHashMap<AssetId, AssetHandle>,
    sub_assets: FnvHashMap<AssetId, SubAsset>,
}

impl AssetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn insert(&mut self, info: AssetInfo) -> AssetHandle {
        let id = info.id();
        let handle = self.arena.insert(info);
        self.by_id.insert(id, handle);
        handle
    }

    /// Removes the asset record and its main sub-asset record. Non-main
    /// sub-asset records are the caller's responsibility (they carry their
    /// own existence lifecycle).
    pub fn remove(&mut self, id: AssetId) -> Option<AssetInfo> {
        let handle = self.by_id.remove(&id)?;
        self.sub_assets.remove(&id);
        Some(self.arena.remove(handle))
    }

    pub fn handle_of(&self, id: AssetId) -> Option<AssetHandle> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, id: AssetId) -> Option<&AssetInfo> {
        self.by_id.get(&id).and_then(|h| self.arena.get(*h))
    }

    pub fn get_mut(&mut self, id: AssetId) -> Option<&mut AssetInfo> {
        let handle = *self.by_id.get(&id)?;
        self.arena.get_mut(handle)
    }

    pub fn get_by_handle(&self, handle: AssetHandle) -> Option<&AssetInfo> {
        self.arena.get(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetHandle, &AssetInfo)> {
        self.arena.iter()
    }

    /// Path of the asset's primary document.
    pub fn path_of(&self, id: AssetId) -> Option<PathBuf> {
        self.get(id).map(|info| info.absolute_path.clone())
    }

    /// Finds the asset whose document lives at `path`.
    pub fn id_at_path(&self, path: &Path) -> Option<AssetId> {
        self.arena
            .iter()
            .find(|(_, info)| info.absolute_path == path)
            .map(|(_, info)| info.id())
    }

    pub fn sub_asset(&self, id: AssetId) -> Option<&SubAsset> {
        self.sub_assets.get(&id)
    }

    pub fn sub_asset_mut(&mut self, id: AssetId) -> Option<&mut SubAsset> {
        self.sub_assets.get_mut(&id)
    }

    pub fn insert_sub_asset(&mut self, id: AssetId, sub: SubAsset) {
        self.sub_assets.insert(id, sub);
    }

    pub fn remove_sub_asset(&mut self, id: AssetId) -> Option<SubAsset> {
        self.sub_assets.remove(&id)
    }

    pub fn sub_asset_ids(&self) -> Vec<AssetId> {
        self.sub_assets.keys().copied().collect()
    }

    /// Resolves a sub-asset id (main or not) to its owning main asset.
    pub fn main_asset_of(&self, id: AssetId) -> Option<AssetId> {
        let sub = self.sub_assets.get(&id)?;
        self.arena.get(sub.parent).map(AssetInfo::id)
    }

    /// Snapshot of a sub-asset for event payloads and queries.
    pub fn snapshot(&self, id: AssetId) -> Option<SubAssetSnapshot> {
        let sub = self.sub_assets.get(&id)?;
        let parent = self.arena.get(sub.parent)?;
        Some(SubAssetSnapshot {
            id,
            parent_id: parent.id(),
            is_main: sub.is_main,
            name: sub.name.clone(),
            absolute_path: parent.absolute_path.clone(),
            transform_state: parent.transform_state,
            asset_hash: parent.asset_hash,
            thumbnail_hash: parent.thumbnail_hash,
        })
    }

    pub fn touch(&mut self, id: AssetId) {
        if let Some(sub) = self.sub_assets.get_mut(&id) {
            sub.last_access = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{AssetTypeFlags, AssetTypeManager};
    use crate::error::CuratorError;
    use std::sync::Arc;

    struct TestManager;

    impl AssetTypeManager for TestManager {
        fn type_name(&self) -> &str {
            "Test"
        }
        fn file_extension(&self) -> &str {
            "test"
        }
        fn flags(&self) -> AssetTypeFlags {
            AssetTypeFlags::empty()
        }
        fn read_document_metadata(&self, path: &Path) -> crate::error::Result<DocumentMetadata> {
            Err(CuratorError::Document(path.display().to_string()))
        }
        fn output_path(&self, source: &Path, _tag: &str) -> PathBuf {
            source.with_extension("out")
        }
        fn is_output_up_to_date(&self, _: &Path, _: &[String], _: u64) -> bool {
            true
        }
        fn is_thumbnail_up_to_date(&self, _: &Path, _: u64, _: u32) -> bool {
            true
        }
    }

    fn test_info(id: AssetId, path: &str) -> AssetInfo {
        AssetInfo {
            metadata: DocumentMetadata {
                id,
                type_name: "Test".into(),
                settings_hash: 0,
                transform_dependencies: vec![],
                runtime_references: vec![],
                outputs: vec![],
                sub_assets: vec![],
            },
            descriptor: TypeDescriptor::new(Arc::new(TestManager)),
            absolute_path: PathBuf::from(path),
            relative_path: PathBuf::from(path).file_name().map(PathBuf::from).unwrap(),
            existence: ExistenceState::Added,
            transform_state: TransformState::Unknown,
            asset_hash: 0,
            thumbnail_hash: 0,
            missing_dependencies: BTreeSet::new(),
            missing_references: BTreeSet::new(),
            sub_assets: BTreeSet::new(),
            last_state_update: 0,
        }
    }

    #[test]
    fn insert_lookup_remove() {
        let mut index = AssetIndex::new();
        let id = AssetId::new_v4();
        let handle = index.insert(test_info(id, "/data/a.test"));

        assert_eq!(index.handle_of(id), Some(handle));
        assert_eq!(index.get(id).unwrap().id(), id);
        assert_eq!(index.id_at_path(Path::new("/data/a.test")), Some(id));

        let removed = index.remove(id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(index.get(id).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn main_sub_asset_resolution() {
        let mut index = AssetIndex::new();
        let main = AssetId::new_v4();
        let child = AssetId::new_v4();
        let handle = index.insert(test_info(main, "/data/a.test"));
        index.insert_sub_asset(
            main,
            SubAsset {
                parent: handle,
                is_main: true,
                name: String::new(),
                existence: ExistenceState::Added,
                last_access: None,
            },
        );
        index.insert_sub_asset(
            child,
            SubAsset {
                parent: handle,
                is_main: false,
                name: "lod0".into(),
                existence: ExistenceState::Added,
                last_access: None,
            },
        );

        assert_eq!(index.main_asset_of(main), Some(main));
        assert_eq!(index.main_asset_of(child), Some(main));

        let snap = index.snapshot(child).unwrap();
        assert_eq!(snap.parent_id, main);
        assert!(!snap.is_main);
        assert_eq!(snap.name, "lod0");
    }

    #[test]
    fn touch_records_access_time() {
        let mut index = AssetIndex::new();
        let id = AssetId::new_v4();
        let handle = index.insert(test_info(id, "/data/a.test"));
        index.insert_sub_asset(
            id,
            SubAsset {
                parent: handle,
                is_main: true,
                name: String::new(),
                existence: ExistenceState::Unchanged,
                last_access: None,
            },
        );

        assert!(index.sub_asset(id).unwrap().last_access.is_none());
        index.touch(id);
        assert!(index.sub_asset(id).unwrap().last_access.is_some());
    }
}
