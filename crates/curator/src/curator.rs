//! The curator context object: locked state, queries, events, update task.
//!
//! One `parking_lot::Mutex` guards all mutable curator state. Public
//! operations take the lock for bookkeeping only; content hashing and
//! recursive state computation run off-lock and write back under the
//! optimistic `last_state_update` counter (see `update`).
//!
//! Listeners are never called under the lock: definitive changes are
//! collected in a changed-set and drained by [`Curator::main_thread_tick`],
//! which coalesces rapid successive changes into one notification.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use fnv::FnvHashSet;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::assets::AssetIndex;
use crate::deps::DependencyIndex;
use crate::files::{FileEntry, FileRegistry};
use crate::manager::{CuratorConfig, DocumentMetadata};
use crate::state::TransformStates;
use crate::types::{
    AssetId, CuratorEvent, CuratorEventKind, ExistenceState, SubAssetSnapshot, TransformState,
    TransformStats,
};

/// All mutable curator state, guarded by one mutex.
#[derive(Default)]
pub(crate) struct CuratorData {
    /// Copy of the configured data roots, for edge resolution under the lock.
    pub roots: Vec<PathBuf>,
    pub files: FileRegistry,
    pub deps: DependencyIndex,
    pub assets: AssetIndex,
    pub states: TransformStates,
    /// Sub-assets with a definitive change pending notification; drained by
    /// the tick.
    pub changed_sub_assets: FnvHashSet<AssetId>,
    /// Warm-start side table: metadata loaded from the cache, adopted by
    /// document re-reads while the on-disk timestamp still matches.
    pub cached_metadata: std::collections::HashMap<PathBuf, (DocumentMetadata, FileEntry)>,
}

pub(crate) struct CuratorShared {
    pub config: CuratorConfig,
    pub data: Mutex<CuratorData>,
    pub subscribers: Mutex<Vec<Sender<CuratorEvent>>>,
    /// Gate for background recomputation; cleared to pause the queue.
    pub run_updates: AtomicBool,
    /// At most one update task is in flight at a time.
    pub update_in_flight: AtomicBool,
}

/// Incremental asset dependency and transform-state tracker.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Curator {
    pub(crate) shared: Arc<CuratorShared>,
}

impl Curator {
    pub fn new(config: CuratorConfig) -> Self {
        let data = CuratorData {
            roots: config.roots.clone(),
            ..CuratorData::default()
        };
        Self {
            shared: Arc::new(CuratorShared {
                config,
                data: Mutex::new(data),
                subscribers: Mutex::new(Vec::new()),
                run_updates: AtomicBool::new(true),
                update_in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.shared.config
    }

    // -----------------------------------------------------------------
    // Event stream
    // -----------------------------------------------------------------

    /// Subscribes to curator events. Events are delivered from
    /// [`main_thread_tick`](Self::main_thread_tick), never synchronously
    /// from a mutating call.
    pub fn subscribe(&self) -> Receiver<CuratorEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn broadcast(&self, events: Vec<CuratorEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|tx| {
            events.iter().all(|event| tx.send(event.clone()).is_ok())
        });
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Finds an asset or sub-asset by stringified UUID, absolute path, or
    /// data-root-relative path. Returns a snapshot, or `None` if nothing
    /// matches.
    pub fn find_asset(&self, path_or_id: &str) -> Option<SubAssetSnapshot> {
        let data = self.shared.data.lock();

        if let Ok(id) = Uuid::parse_str(path_or_id) {
            return data.assets.snapshot(id);
        }

        let path = Path::new(path_or_id);
        if path.is_absolute() {
            let id = data.assets.id_at_path(path)?;
            return data.assets.snapshot(id);
        }
        for root in &self.shared.config.roots {
            if let Some(id) = data.assets.id_at_path(&root.join(path)) {
                return data.assets.snapshot(id);
            }
        }
        None
    }

    /// Last confirmed `(state, asset_hash, thumbnail_hash)` for an asset or
    /// sub-asset. Does not trigger recomputation.
    pub fn get_transform_state(&self, id: AssetId) -> Option<(TransformState, u64, u64)> {
        let data = self.shared.data.lock();
        let main = data.assets.main_asset_of(id)?;
        let info = data.assets.get(main)?;
        Some((info.transform_state, info.asset_hash, info.thumbnail_hash))
    }

    /// Per-state asset counts.
    pub fn transform_stats(&self) -> TransformStats {
        let data = self.shared.data.lock();
        data.states.stats(data.assets.len())
    }

    /// All assets using `path` as a dependency, reference, or output,
    /// optionally following indirect users.
    pub fn find_all_uses(&self, path: &Path, transitive: bool) -> std::collections::BTreeSet<AssetId> {
        let data = self.shared.data.lock();
        let assets = &data.assets;
        data.deps
            .find_uses(path, transitive, |id| assets.path_of(id))
    }

    /// Whether any asset depends on or references the file.
    pub fn is_referenced(&self, path: &Path) -> bool {
        self.shared.data.lock().deps.is_referenced(path)
    }

    /// Records UI access time for recency ordering.
    pub fn touch_asset(&self, id: AssetId) {
        self.shared.data.lock().assets.touch(id);
    }

    // -----------------------------------------------------------------
    // Invalidation entry points
    // -----------------------------------------------------------------

    /// Tells the curator to re-evaluate an asset's state, e.g. after its
    /// document was saved in-editor.
    pub fn notify_asset_change(&self, id: AssetId) {
        self.shared.data.lock().invalidate_transform_state(id);
    }

    /// Re-queues every asset currently in `state` (used when the active
    /// profile changes).
    pub fn invalidate_assets_in_state(&self, state: TransformState) {
        let mut data = self.shared.data.lock();
        let ids: Vec<AssetId> = data.states.in_state(state).collect();
        for id in ids {
            data.invalidate_transform_state(id);
        }
    }

    // -----------------------------------------------------------------
    // Update queue
    // -----------------------------------------------------------------

    pub fn pause_updates(&self) {
        self.shared.run_updates.store(false, Ordering::SeqCst);
    }

    pub fn resume_updates(&self) {
        self.shared.run_updates.store(true, Ordering::SeqCst);
    }

    pub fn updates_paused(&self) -> bool {
        !self.shared.run_updates.load(Ordering::SeqCst)
    }

    /// Pulls one stale asset, or `None` when the queue is empty. A stale
    /// tag whose asset no longer exists is dropped and logged (expected
    /// consequence of concurrent removal).
    pub(crate) fn next_stale_asset(&self) -> Option<AssetId> {
        let mut data = self.shared.data.lock();
        while let Some(id) = data.states.peek_stale() {
            if data.assets.get(id).is_some() {
                return Some(id);
            }
            log::debug!("dropping stale tag for removed asset {id}");
            data.states.clear_stale(id);
        }
        None
    }

    /// Synchronously recomputes stale assets until the queue is empty or
    /// updates are paused. Returns the number of recomputations performed.
    pub fn process_stale_queue(&self) -> usize {
        let mut processed = 0;
        while self.shared.run_updates.load(Ordering::SeqCst) {
            let Some(id) = self.next_stale_asset() else {
                break;
            };
            self.update_asset_state(id);
            processed += 1;
        }
        processed
    }

    /// Starts a background task draining the stale queue. A no-op if one is
    /// already in flight; at most one runs at a time.
    pub fn request_background_update(&self) -> Option<JoinHandle<()>> {
        if !self.shared.run_updates.load(Ordering::SeqCst) {
            return None;
        }
        if self.shared.update_in_flight.swap(true, Ordering::SeqCst) {
            return None;
        }
        let curator = self.clone();
        Some(std::thread::spawn(move || {
            curator.process_stale_queue();
            curator.shared.update_in_flight.store(false, Ordering::SeqCst);
        }))
    }

    // -----------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------

    /// Drains pending existence/state changes into events, destroys assets
    /// whose removal has been reported, and broadcasts to subscribers.
    ///
    /// Must be called periodically by the host (once per UI tick).
    pub fn main_thread_tick(&self) {
        let events = {
            let mut data = self.shared.data.lock();
            data.drain_changed_sub_assets()
        };
        self.broadcast(events);
        if self.shared.data.lock().states.has_stale() {
            let _ = self.request_background_update();
        }
    }
}

impl CuratorData {
    /// Drains the changed-set into ordered events and destroys assets whose
    /// `Removed` state has now been reported.
    pub(crate) fn drain_changed_sub_assets(&mut self) -> Vec<CuratorEvent> {
        let mut changed: Vec<AssetId> = self.changed_sub_assets.drain().collect();
        if changed.is_empty() {
            return Vec::new();
        }
        // Report non-main removals before their main asset so snapshots can
        // still resolve the parent.
        changed.sort_by_key(|id| {
            self.assets
                .sub_asset(*id)
                .map(|sub| sub.is_main)
                .unwrap_or(true)
        });

        let mut events = Vec::new();
        let mut destroyed = Vec::new();
        for id in changed {
            let Some((existence, is_main)) = self
                .assets
                .sub_asset(id)
                .map(|sub| (sub.existence, sub.is_main))
            else {
                continue;
            };
            match existence {
                ExistenceState::Added => {
                    self.settle_existence(id);
                    events.push(CuratorEvent {
                        kind: CuratorEventKind::AssetAdded,
                        asset_id: id,
                        snapshot: self.assets.snapshot(id),
                    });
                }
                ExistenceState::Removed => {
                    let snapshot = self.assets.snapshot(id);
                    events.push(CuratorEvent {
                        kind: CuratorEventKind::AssetRemoved,
                        asset_id: id,
                        snapshot,
                    });
                    self.assets.remove_sub_asset(id);
                    if is_main {
                        destroyed.push(id);
                    }
                }
                ExistenceState::Modified | ExistenceState::Unchanged => {
                    self.settle_existence(id);
                    events.push(CuratorEvent {
                        kind: CuratorEventKind::AssetUpdated,
                        asset_id: id,
                        snapshot: self.assets.snapshot(id),
                    });
                }
            }
        }

        for id in destroyed {
            self.destroy_asset(id);
        }
        events
    }

    fn settle_existence(&mut self, id: AssetId) {
        let Some(sub) = self.assets.sub_asset_mut(id) else {
            return;
        };
        sub.existence = ExistenceState::Unchanged;
        let is_main = sub.is_main;
        if is_main {
            if let Some(info) = self.assets.get_mut(id) {
                info.existence = ExistenceState::Unchanged;
            }
        }
    }

    /// Final teardown of an asset record after its removal was reported.
    pub(crate) fn destroy_asset(&mut self, id: AssetId) {
        self.untrack_asset_edges(id);
        self.states.remove(id);
        if let Some(info) = self.assets.remove(id) {
            if let Some(entry) = self.files.get_mut(&info.absolute_path) {
                if entry.owner == Some(id) {
                    entry.owner = None;
                }
            }
        }
    }
}

/// `AssetListReset` event value, shared by rescan and shutdown paths.
pub(crate) fn list_reset_event() -> CuratorEvent {
    CuratorEvent {
        kind: CuratorEventKind::AssetListReset,
        asset_id: Uuid::nil(),
        snapshot: None,
    }
}
