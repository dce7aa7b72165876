//! Dependency index: declared forward edges and their inverse maps.
//!
//! Edges are declared by documents as strings: a UUID, a data-root-relative
//! path, or an absolute path. Resolution to a canonical key happens once
//! when the edge set is installed, not at every lookup. The inverse maps
//! (path → dependent assets) are maintained incrementally on every forward
//! edge change and are always the exact transpose of the forward lists;
//! they are never recomputed from scratch during normal operation.
//!
//! A UUID edge whose target asset is not yet known is parked in an
//! unresolved set and grafted into the inverse map as soon as the target
//! appears, so a `MissingDependency` heals itself without a rescan.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use uuid::Uuid;

use crate::types::AssetId;

/// Canonical target of one declared edge string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeTarget {
    /// Resolved to an absolute path (directly, or via a known asset's UUID).
    Path(PathBuf),
    /// A UUID naming an asset the curator does not know yet.
    UnresolvedAsset(AssetId),
    /// Empty or otherwise meaningless declaration; tracked by nothing.
    Skip,
}

/// Resolves a declared edge string to its canonical target.
///
/// `asset_path` maps a known asset id to its document path; `make_absolute`
/// anchors a relative path in its data root.
pub fn resolve_edge(
    declared: &str,
    asset_path: impl Fn(AssetId) -> Option<PathBuf>,
    make_absolute: impl Fn(&Path) -> Option<PathBuf>,
) -> EdgeTarget {
    if declared.is_empty() {
        return EdgeTarget::Skip;
    }
    if let Ok(id) = Uuid::parse_str(declared) {
        return match asset_path(id) {
            Some(path) => EdgeTarget::Path(path),
            None => EdgeTarget::UnresolvedAsset(id),
        };
    }
    let path = Path::new(declared);
    if path.is_absolute() {
        return EdgeTarget::Path(path.to_path_buf());
    }
    match make_absolute(path) {
        Some(abs) => EdgeTarget::Path(abs),
        None => EdgeTarget::Skip,
    }
}

/// Targets as they were resolved when the edge set was installed (or as
/// rewritten by a later graft). Untrack prunes exactly these, never
/// re-resolving; the target asset may no longer exist by then.
#[derive(Debug, Clone, Default)]
struct DeclaredEdges {
    transform: Vec<EdgeTarget>,
    runtime: Vec<EdgeTarget>,
    /// Resolved absolute output paths; also entered into the inverse
    /// reference map so touching an output invalidates its producer.
    outputs: Vec<PathBuf>,
}

/// Forward and inverse dependency bookkeeping for all known assets.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    forward: FnvHashMap<AssetId, DeclaredEdges>,
    /// Absolute path → assets that declare it as a transform dependency.
    inverse_transform: BTreeMap<PathBuf, Vec<AssetId>>,
    /// Absolute path → assets that declare it as a runtime reference or
    /// produce it as an output.
    inverse_runtime: BTreeMap<PathBuf, Vec<AssetId>>,
    /// (dependent, missing target) pairs awaiting the target asset.
    unresolved_transform: BTreeSet<(AssetId, AssetId)>,
    unresolved_runtime: BTreeSet<(AssetId, AssetId)>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces an asset's forward edges, updating the inverse maps.
    /// Previous edges are pruned, not superseded. Each declared string is
    /// resolved here, once; the resolved targets are stored so a later
    /// untrack removes exactly what was added.
    pub fn set_edges<R>(
        &mut self,
        id: AssetId,
        transform: &[String],
        runtime: &[String],
        outputs: &[PathBuf],
        resolve: R,
    ) where
        R: Fn(&str) -> EdgeTarget,
    {
        self.untrack(id);

        let mut transform_targets = Vec::with_capacity(transform.len());
        for declared in transform {
            let target = resolve(declared);
            match &target {
                EdgeTarget::Path(path) => {
                    add_inverse(&mut self.inverse_transform, path.clone(), id);
                }
                EdgeTarget::UnresolvedAsset(missing) => {
                    self.unresolved_transform.insert((id, *missing));
                }
                EdgeTarget::Skip => {}
            }
            transform_targets.push(target);
        }
        let mut runtime_targets = Vec::with_capacity(runtime.len());
        for declared in runtime {
            let target = resolve(declared);
            match &target {
                EdgeTarget::Path(path) => {
                    add_inverse(&mut self.inverse_runtime, path.clone(), id);
                }
                EdgeTarget::UnresolvedAsset(missing) => {
                    self.unresolved_runtime.insert((id, *missing));
                }
                EdgeTarget::Skip => {}
            }
            runtime_targets.push(target);
        }
        for output in outputs {
            add_inverse(&mut self.inverse_runtime, output.clone(), id);
        }

        self.forward.insert(
            id,
            DeclaredEdges {
                transform: transform_targets,
                runtime: runtime_targets,
                outputs: outputs.to_vec(),
            },
        );
    }

    /// Removes all edges declared by `id` from the inverse maps, pruning
    /// the targets as they were resolved at edge-set (or graft) time.
    pub fn untrack(&mut self, id: AssetId) {
        let Some(edges) = self.forward.remove(&id) else {
            return;
        };
        for target in &edges.transform {
            match target {
                EdgeTarget::Path(path) => remove_inverse(&mut self.inverse_transform, path, id),
                EdgeTarget::UnresolvedAsset(missing) => {
                    self.unresolved_transform.remove(&(id, *missing));
                }
                EdgeTarget::Skip => {}
            }
        }
        for target in &edges.runtime {
            match target {
                EdgeTarget::Path(path) => remove_inverse(&mut self.inverse_runtime, path, id),
                EdgeTarget::UnresolvedAsset(missing) => {
                    self.unresolved_runtime.remove(&(id, *missing));
                }
                EdgeTarget::Skip => {}
            }
        }
        for output in &edges.outputs {
            remove_inverse(&mut self.inverse_runtime, output, id);
        }
    }

    /// Grafts parked UUID edges whose target asset has appeared into the
    /// inverse maps, rewriting the stored targets to the resolved paths.
    /// Call after a new asset becomes known.
    pub fn resolve_pending(&mut self, asset_path: impl Fn(AssetId) -> Option<PathBuf>) {
        let Self {
            forward,
            inverse_transform,
            inverse_runtime,
            unresolved_transform,
            unresolved_runtime,
        } = self;
        resolve_pending_into(
            unresolved_transform,
            inverse_transform,
            forward,
            |edges| &mut edges.transform,
            &asset_path,
        );
        resolve_pending_into(
            unresolved_runtime,
            inverse_runtime,
            forward,
            |edges| &mut edges.runtime,
            &asset_path,
        );
    }

    /// Assets whose state must be recomputed because `path` changed.
    /// Direct dependents only; transitive effects are realized by genuine
    /// recomputation, not by a precomputed closure.
    pub fn dependents_of(&self, path: &Path) -> Vec<AssetId> {
        let mut out = Vec::new();
        if let Some(ids) = self.inverse_transform.get(path) {
            out.extend_from_slice(ids);
        }
        if let Some(ids) = self.inverse_runtime.get(path) {
            for id in ids {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        }
        out
    }

    pub fn transform_dependents(&self, path: &Path) -> &[AssetId] {
        self.inverse_transform
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True if at least one asset depends on or references the file.
    pub fn is_referenced(&self, path: &Path) -> bool {
        self.inverse_transform.contains_key(path) || self.inverse_runtime.contains_key(path)
    }

    /// Direct (or, with `transitive`, indirect) users of the given path.
    pub fn find_uses(&self, path: &Path, transitive: bool, resolve_path: impl Fn(AssetId) -> Option<PathBuf>) -> BTreeSet<AssetId> {
        let mut uses = BTreeSet::new();
        let mut todo = vec![path.to_path_buf()];
        while let Some(current) = todo.pop() {
            for id in self.dependents_of(&current) {
                if uses.insert(id) && transitive {
                    if let Some(dependent_path) = resolve_path(id) {
                        todo.push(dependent_path);
                    }
                }
            }
        }
        uses
    }
}

fn add_inverse(map: &mut BTreeMap<PathBuf, Vec<AssetId>>, path: PathBuf, id: AssetId) {
    map.entry(path).or_default().push(id);
}

fn remove_inverse(map: &mut BTreeMap<PathBuf, Vec<AssetId>>, path: &Path, id: AssetId) {
    if let Some(ids) = map.get_mut(path) {
        if let Some(pos) = ids.iter().position(|x| *x == id) {
            ids.swap_remove(pos);
        }
        if ids.is_empty() {
            map.remove(path);
        }
    }
}

fn resolve_pending_into(
    unresolved: &mut BTreeSet<(AssetId, AssetId)>,
    inverse: &mut BTreeMap<PathBuf, Vec<AssetId>>,
    forward: &mut FnvHashMap<AssetId, DeclaredEdges>,
    pick: impl Fn(&mut DeclaredEdges) -> &mut Vec<EdgeTarget>,
    asset_path: &impl Fn(AssetId) -> Option<PathBuf>,
) {
    let resolved: Vec<(AssetId, AssetId, PathBuf)> = unresolved
        .iter()
        .filter_map(|(dependent, target)| {
            asset_path(*target).map(|path| (*dependent, *target, path))
        })
        .collect();
    for (dependent, target, path) in resolved {
        unresolved.remove(&(dependent, target));
        let Some(edges) = forward.get_mut(&dependent) else {
            continue;
        };
        // One inverse entry per stored slot, so untrack stays symmetric.
        for slot in pick(edges).iter_mut() {
            if *slot == EdgeTarget::UnresolvedAsset(target) {
                *slot = EdgeTarget::Path(path.clone());
                add_inverse(inverse, path.clone(), dependent);
            }
        }
    }
}
