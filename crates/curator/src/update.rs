//! The recompute algorithm: document refresh, hashing, and the optimistic
//! transform-state update.
//!
//! `update_transform_state` runs in four phases: fast path under the lock,
//! document refresh, snapshot under the lock, then hashing and oracle calls
//! with the lock released. The result is written back only if the asset's
//! `last_state_update` counter still matches the snapshot; a concurrent
//! invalidation wins and the result is discarded (the stale tag stays set,
//! so the queue recomputes).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnv::FnvHashSet;
use uuid::Uuid;

use crate::assets::{AssetInfo, SubAsset};
use crate::curator::{Curator, CuratorData};
use crate::deps::resolve_edge;
use crate::error::{CuratorError, Result};
use crate::files::{file_timestamp, hash_file, FileStatus};
use crate::manager::{AssetTypeFlags, AssetTypeManager, DocumentMetadata, TypeDescriptor};
use crate::state::combine_hash;
use crate::types::{AssetId, ExistenceState, TransformState};

/// Anchors a data-root-relative path. Prefers a root where the file exists;
/// falls back to the first root so a missing dependency still has a
/// canonical key in the inverse maps.
pub(crate) fn make_data_path_absolute(roots: &[PathBuf], relative: &Path) -> Option<PathBuf> {
    for root in roots {
        let candidate = root.join(relative);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    roots.first().map(|root| root.join(relative))
}

struct StateSnapshot {
    counter: u32,
    manager: Arc<dyn AssetTypeManager>,
    settings_hash: u64,
    transform: Vec<String>,
    runtime: Vec<String>,
    outputs: Vec<String>,
}

impl Curator {
    /// Recomputes the transform state of an asset (or the main asset of a
    /// sub-asset) if it is unknown or stale, and returns
    /// `(state, asset_hash, thumbnail_hash)`.
    pub fn update_asset_state(&self, id: AssetId) -> (TransformState, u64, u64) {
        self.update_transform_state(id, false)
    }

    /// Like [`update_asset_state`](Self::update_asset_state), but skips the
    /// cached fast path.
    pub fn force_update_asset_state(&self, id: AssetId) -> (TransformState, u64, u64) {
        self.update_transform_state(id, true)
    }

    fn update_transform_state(&self, id: AssetId, force: bool) -> (TransformState, u64, u64) {
        // Phase 1: redirect to the main asset and take the fast path if the
        // last confirmed state is still trusted.
        let (main, path) = {
            let data = self.shared.data.lock();
            let main = match data.assets.main_asset_of(id) {
                Some(main) => main,
                None if data.assets.get(id).is_some() => id,
                None => {
                    log::error!("transform state requested for unknown asset {id}");
                    return (TransformState::Unknown, 0, 0);
                }
            };
            let Some(info) = data.assets.get(main) else {
                return (TransformState::Unknown, 0, 0);
            };
            if !force
                && info.transform_state != TransformState::Unknown
                && !data.states.is_stale(main)
            {
                return (info.transform_state, info.asset_hash, info.thumbnail_hash);
            }
            (main, info.absolute_path.clone())
        };

        // Phase 2: make sure the parsed document is current. On failure the
        // stale tag is dropped so the queue cannot spin on a document that
        // stays unreadable; the next timestamp change re-queues the asset.
        if let Err(err) = self.ensure_asset_info_updated(&path) {
            log::warn!("cannot refresh asset document {}: {err}", path.display());
            let mut data = self.shared.data.lock();
            data.states.clear_stale(main);
            return (TransformState::Unknown, 0, 0);
        }

        // Phase 3: snapshot everything the computation needs.
        let snapshot = {
            let data = self.shared.data.lock();
            let Some(info) = data.assets.get(main) else {
                return (TransformState::Unknown, 0, 0);
            };
            let manager = info.descriptor.manager.clone();
            StateSnapshot {
                counter: info.last_state_update,
                settings_hash: combine_hash(info.metadata.settings_hash, manager.profile_hash()),
                transform: info.metadata.transform_dependencies.clone(),
                runtime: info.metadata.runtime_references.clone(),
                outputs: info.metadata.outputs.clone(),
                manager,
            }
        };

        // Phase 4: hash and consult the oracles, lock released.
        let mut asset_hash = snapshot.settings_hash;
        let mut thumbnail_hash = snapshot.settings_hash;
        let mut missing_dependencies = BTreeSet::new();
        let mut missing_references = BTreeSet::new();

        for declared in &snapshot.transform {
            if !self.add_dependency_hash(declared, false, force, &mut asset_hash, &mut thumbnail_hash)
            {
                missing_dependencies.insert(declared.clone());
            }
        }
        for declared in &snapshot.runtime {
            if !self.add_dependency_hash(declared, true, force, &mut asset_hash, &mut thumbnail_hash)
            {
                missing_references.insert(declared.clone());
            }
        }

        let state = if !missing_dependencies.is_empty() {
            asset_hash = 0;
            thumbnail_hash = 0;
            TransformState::MissingDependency
        } else if !missing_references.is_empty() {
            thumbnail_hash = 0;
            TransformState::MissingReference
        } else {
            let flags = snapshot.manager.flags();
            if snapshot
                .manager
                .is_output_up_to_date(&path, &snapshot.outputs, asset_hash)
            {
                let wants_thumbnail = flags.intersects(
                    AssetTypeFlags::SUPPORTS_THUMBNAIL | AssetTypeFlags::AUTO_THUMBNAIL_ON_TRANSFORM,
                );
                if wants_thumbnail
                    && !snapshot.manager.is_thumbnail_up_to_date(
                        &path,
                        thumbnail_hash,
                        snapshot.manager.type_version(),
                    )
                {
                    if flags.contains(AssetTypeFlags::AUTO_THUMBNAIL_ON_TRANSFORM) {
                        TransformState::NeedsTransform
                    } else {
                        TransformState::NeedsThumbnail
                    }
                } else {
                    TransformState::UpToDate
                }
            } else {
                TransformState::NeedsTransform
            }
        };

        // Phase 5: optimistic write-back.
        let mut data = self.shared.data.lock();
        let landed = match data.assets.get_mut(main) {
            Some(info) if info.last_state_update == snapshot.counter => {
                info.asset_hash = asset_hash;
                info.thumbnail_hash = thumbnail_hash;
                info.missing_dependencies = missing_dependencies;
                info.missing_references = missing_references;
                true
            }
            Some(_) => {
                log::debug!("discarding outdated transform-state result for {main}");
                false
            }
            None => false,
        };
        if landed {
            data.set_transform_state(main, state);
        }
        (state, asset_hash, thumbnail_hash)
    }

    /// Folds one declared dependency into the rolling hashes. Returns false
    /// if the dependency is missing (unknown asset, unreadable file).
    ///
    /// References feed the thumbnail hash only; dependencies feed both.
    fn add_dependency_hash(
        &self,
        declared: &str,
        is_reference: bool,
        force: bool,
        asset_hash: &mut u64,
        thumbnail_hash: &mut u64,
    ) -> bool {
        if declared.is_empty() {
            return true;
        }

        if let Ok(dep_id) = Uuid::parse_str(declared) {
            let known = {
                let data = self.shared.data.lock();
                data.assets.main_asset_of(dep_id).is_some() || data.assets.get(dep_id).is_some()
            };
            if !known {
                return false;
            }
            let (state, dep_asset, dep_thumb) = self.update_transform_state(dep_id, force);
            if state == TransformState::Unknown || state.is_missing() {
                return false;
            }
            *thumbnail_hash = combine_hash(*thumbnail_hash, dep_thumb);
            if !is_reference {
                *asset_hash = combine_hash(*asset_hash, dep_asset);
            }
            return true;
        }

        let Some(absolute) = self.resolve_dependency_path(declared) else {
            return false;
        };
        let Ok(fs_meta) = std::fs::metadata(&absolute) else {
            return false;
        };
        let Some(timestamp) = file_timestamp(&fs_meta) else {
            return false;
        };

        let (prev_timestamp, prev_hash) = {
            let mut data = self.shared.data.lock();
            let entry = data.files.entry_mut(&absolute);
            entry.status = FileStatus::Valid;
            (entry.timestamp, entry.content_hash)
        };

        let hash = if prev_timestamp == Some(timestamp) {
            prev_hash
        } else {
            let Ok(hash) = hash_file(&absolute) else {
                return false;
            };
            let mut data = self.shared.data.lock();
            let entry = data.files.entry_mut(&absolute);
            // Write back only if nobody advanced the entry while we hashed.
            if entry.timestamp == prev_timestamp {
                entry.timestamp = Some(timestamp);
                entry.content_hash = hash;
            }
            hash
        };

        *thumbnail_hash = combine_hash(*thumbnail_hash, hash);
        if !is_reference {
            *asset_hash = combine_hash(*asset_hash, hash);
        }
        true
    }

    fn resolve_dependency_path(&self, declared: &str) -> Option<PathBuf> {
        let path = Path::new(declared);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        make_data_path_absolute(&self.shared.config.roots, path)
    }

    /// Re-parses an asset document if its on-disk timestamp moved, merging
    /// the result into the asset index (new asset, modification, move, or
    /// id change at the same path).
    pub(crate) fn ensure_asset_info_updated(&self, path: &Path) -> Result<()> {
        let fs_meta =
            std::fs::metadata(path).map_err(|_| CuratorError::PathNotFound(path.to_path_buf()))?;
        let timestamp = file_timestamp(&fs_meta).ok_or_else(|| {
            CuratorError::Path(format!("no modification time for {}", path.display()))
        })?;

        {
            let data = self.shared.data.lock();
            if let Some(entry) = data.files.get(path) {
                if entry.timestamp == Some(timestamp) {
                    return Ok(());
                }
            }
        }

        let descriptor = self
            .shared
            .config
            .descriptor_for_path(path)
            .ok_or_else(|| CuratorError::UnknownAssetType(path.to_path_buf()))?
            .clone();

        // Warm start: adopt metadata restored from the cache while the
        // on-disk timestamp still matches, skipping the parse entirely.
        let cached = self.shared.data.lock().cached_metadata.remove(path);
        let (metadata, content_hash) = match cached {
            Some((metadata, entry)) if entry.timestamp == Some(timestamp) => {
                (metadata, entry.content_hash)
            }
            _ => {
                let metadata = descriptor.manager.read_document_metadata(path)?;
                (metadata, hash_file(path)?)
            }
        };

        let relative = self
            .shared
            .config
            .root_for_path(path)
            .and_then(|root| path.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());

        let mut data = self.shared.data.lock();
        data.apply_document(path, timestamp, content_hash, descriptor, metadata, relative)
    }
}

impl CuratorData {
    /// Merges a freshly parsed document into the indices. Handles the four
    /// identity cases: new asset, plain modification, document moved from a
    /// vanished path, and a different asset id appearing at a known path.
    pub(crate) fn apply_document(
        &mut self,
        path: &Path,
        timestamp: i64,
        content_hash: u64,
        descriptor: TypeDescriptor,
        metadata: DocumentMetadata,
        relative: PathBuf,
    ) -> Result<()> {
        let new_id = metadata.id;
        let old_owner = self.files.get(path).and_then(|entry| entry.owner);

        if let Some(old_id) = old_owner {
            if old_id != new_id {
                // The document at this path now carries a different id; the
                // previous asset is gone as far as this path is concerned.
                self.set_existence(old_id, ExistenceState::Removed);
                self.states.remove(old_id);
                if let Some(entry) = self.files.get_mut(path) {
                    entry.owner = None;
                }
            }
        }

        match self.assets.path_of(new_id) {
            Some(existing) if existing == path => {
                self.modify_existing(new_id, path, relative, metadata);
            }
            Some(existing) if !existing.exists() => {
                log::info!(
                    "asset {new_id} moved: {} -> {}",
                    existing.display(),
                    path.display()
                );
                if let Some(entry) = self.files.get_mut(&existing) {
                    if entry.owner == Some(new_id) {
                        entry.owner = None;
                    }
                }
                self.modify_existing(new_id, path, relative, metadata);
            }
            Some(existing) => {
                log::error!(
                    "asset id {new_id} claimed by both {} and {}; ignoring the latter",
                    existing.display(),
                    path.display()
                );
                return Err(CuratorError::Document(format!(
                    "duplicate asset id {new_id} at {}",
                    path.display()
                )));
            }
            None => {
                self.insert_new(descriptor, metadata, path, relative);
            }
        }

        let entry = self.files.entry_mut(path);
        entry.status = FileStatus::Valid;
        entry.timestamp = Some(timestamp);
        entry.content_hash = content_hash;
        entry.owner = Some(new_id);

        self.invalidate_transform_state(new_id);
        Ok(())
    }

    fn insert_new(
        &mut self,
        descriptor: TypeDescriptor,
        metadata: DocumentMetadata,
        path: &Path,
        relative: PathBuf,
    ) {
        let id = metadata.id;
        log::debug!("new asset {id} at {}", path.display());
        self.assets.insert(AssetInfo {
            metadata,
            descriptor,
            absolute_path: path.to_path_buf(),
            relative_path: relative,
            existence: ExistenceState::Added,
            transform_state: TransformState::Unknown,
            asset_hash: 0,
            thumbnail_hash: 0,
            missing_dependencies: BTreeSet::new(),
            missing_references: BTreeSet::new(),
            sub_assets: BTreeSet::new(),
            last_state_update: 0,
        });
        self.track_asset_edges(id);
        self.update_sub_assets(id);
    }

    fn modify_existing(
        &mut self,
        id: AssetId,
        path: &Path,
        relative: PathBuf,
        metadata: DocumentMetadata,
    ) {
        self.untrack_asset_edges(id);
        if let Some(info) = self.assets.get_mut(id) {
            info.update_from(metadata, path.to_path_buf(), relative);
        }
        self.track_asset_edges(id);
        self.set_existence(id, ExistenceState::Modified);
        self.update_sub_assets(id);
    }

    /// Installs the asset's declared edges in the dependency index and
    /// grafts any parked edges that were waiting for it.
    pub(crate) fn track_asset_edges(&mut self, id: AssetId) {
        let Some(info) = self.assets.get(id) else {
            return;
        };
        let transform = info.metadata.transform_dependencies.clone();
        let runtime = info.metadata.runtime_references.clone();
        let manager = info.descriptor.manager.clone();
        let source = info.absolute_path.clone();

        let mut outputs = vec![manager.output_path(&source, "")];
        for tag in &info.metadata.outputs {
            outputs.push(manager.output_path(&source, tag));
        }

        let CuratorData {
            deps,
            assets,
            roots,
            ..
        } = self;
        deps.set_edges(id, &transform, &runtime, &outputs, |declared| {
            resolve_edge(
                declared,
                |dep| assets.path_of(dep),
                |rel| make_data_path_absolute(roots, rel),
            )
        });
        deps.resolve_pending(|dep| assets.path_of(dep));
    }

    pub(crate) fn untrack_asset_edges(&mut self, id: AssetId) {
        self.deps.untrack(id);
    }

    /// Marks an asset and everything depending on it for recomputation.
    /// Bumps the optimistic counter, clears hashes, and sets the stale tag;
    /// the last confirmed state stays visible until recomputation lands.
    pub(crate) fn invalidate_transform_state(&mut self, id: AssetId) {
        let start = self.assets.main_asset_of(id).unwrap_or(id);
        let mut visited = FnvHashSet::default();
        let mut todo = vec![start];
        while let Some(current) = todo.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(info) = self.assets.get_mut(current) else {
                continue;
            };
            info.last_state_update = info.last_state_update.wrapping_add(1);
            info.asset_hash = 0;
            info.thumbnail_hash = 0;
            let path = info.absolute_path.clone();
            self.states.mark_stale(current);
            for dependent in self.deps.dependents_of(&path) {
                todo.push(self.assets.main_asset_of(dependent).unwrap_or(dependent));
            }
        }
    }

    /// Stale-marks every asset depending on the given file (dependents of a
    /// plain file, the owner of an output, etc.).
    pub(crate) fn invalidate_dependents_of_path(&mut self, path: &Path) {
        for dependent in self.deps.dependents_of(path) {
            self.invalidate_transform_state(dependent);
        }
    }

    /// Sets the confirmed state and notifies if it changed. `Unknown` also
    /// stale-marks the asset, so the queue picks it up.
    pub(crate) fn set_transform_state(&mut self, id: AssetId, state: TransformState) {
        let main = self.assets.main_asset_of(id).unwrap_or(id);
        self.states.set_state(main, state);

        let mut notify: Vec<AssetId> = Vec::new();
        if let Some(info) = self.assets.get_mut(main) {
            if info.transform_state != state {
                info.transform_state = state;
                notify.push(main);
                notify.extend(info.sub_assets.iter().copied());
            }
        }
        for sub in notify {
            self.changed_sub_assets.insert(sub);
        }

        if state == TransformState::Unknown {
            self.states.mark_stale(main);
        }
    }

    /// Sets existence on the asset and all its sub-assets and queues the
    /// notifications. An `Added` not yet reported is never downgraded to
    /// `Modified`.
    pub(crate) fn set_existence(&mut self, id: AssetId, state: ExistenceState) {
        let mut affected = vec![id];
        if let Some(info) = self.assets.get(id) {
            affected.extend(info.sub_assets.iter().copied());
        }

        for sub_id in affected {
            if let Some(sub) = self.assets.sub_asset_mut(sub_id) {
                let keep_added = state == ExistenceState::Modified
                    && sub.existence == ExistenceState::Added;
                if !keep_added {
                    sub.existence = state;
                }
                self.changed_sub_assets.insert(sub_id);
            }
        }

        if let Some(info) = self.assets.get_mut(id) {
            let keep_added =
                state == ExistenceState::Modified && info.existence == ExistenceState::Added;
            if !keep_added {
                info.existence = state;
            }
        }
    }

    /// Reconciles the sub-asset records with the document's declared list:
    /// vanished entries are reported removed, survivors modified, new ones
    /// added. The main sub-asset record is created on first sight.
    pub(crate) fn update_sub_assets(&mut self, id: AssetId) {
        let Some(handle) = self.assets.handle_of(id) else {
            return;
        };
        let (existence, declared, old_subs) = {
            let Some(info) = self.assets.get(id) else {
                return;
            };
            (
                info.existence,
                info.metadata.sub_assets.clone(),
                info.sub_assets.clone(),
            )
        };
        if existence == ExistenceState::Removed {
            return;
        }

        if self.assets.sub_asset(id).is_none() {
            self.assets.insert_sub_asset(
                id,
                SubAsset {
                    parent: handle,
                    is_main: true,
                    name: String::new(),
                    existence: ExistenceState::Added,
                    last_access: None,
                },
            );
            self.changed_sub_assets.insert(id);
        }

        for sub_id in &old_subs {
            if let Some(sub) = self.assets.sub_asset_mut(*sub_id) {
                sub.existence = ExistenceState::Removed;
                self.changed_sub_assets.insert(*sub_id);
            }
        }

        let mut current = BTreeSet::new();
        for data in declared {
            let sub_id = data.id;
            let survived = old_subs.contains(&sub_id);
            if let Some(sub) = self.assets.sub_asset_mut(sub_id) {
                sub.parent = handle;
                sub.name = data.name;
                sub.existence = if survived {
                    ExistenceState::Modified
                } else {
                    ExistenceState::Added
                };
            } else {
                self.assets.insert_sub_asset(
                    sub_id,
                    SubAsset {
                        parent: handle,
                        is_main: false,
                        name: data.name,
                        existence: ExistenceState::Added,
                        last_access: None,
                    },
                );
            }
            self.changed_sub_assets.insert(sub_id);
            current.insert(sub_id);
        }

        if let Some(info) = self.assets.get_mut(id) {
            info.sub_assets = current;
        }
    }
}
