//! Shared enums and result types for the curator.
//!
//! These are the core types observers see. The curator converts its internal
//! records to snapshot types before broadcasting so that no lock is held
//! while listeners run.

use std::path::PathBuf;

use uuid::Uuid;

/// Process-wide-unique asset (or sub-asset) identifier, assigned by the
/// document itself and stable across sessions.
pub type AssetId = Uuid;

/// Derived-output state of one asset.
///
/// `Unknown` doubles as "never computed": invalidation does NOT move an
/// asset back to `Unknown`, it is tagged stale instead, so observers never
/// see flicker for a re-save that changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransformState {
    #[default]
    Unknown = 0,
    UpToDate,
    NeedsTransform,
    NeedsThumbnail,
    MissingDependency,
    MissingReference,
}

impl TransformState {
    pub const COUNT: usize = 6;

    pub fn index(self) -> usize {
        self as usize
    }

    /// States in which the asset's hashes could not be fully resolved.
    pub fn is_missing(self) -> bool {
        matches!(self, Self::MissingDependency | Self::MissingReference)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::UpToDate => "up-to-date",
            Self::NeedsTransform => "needs-transform",
            Self::NeedsThumbnail => "needs-thumbnail",
            Self::MissingDependency => "missing-dependency",
            Self::MissingReference => "missing-reference",
        }
    }
}

/// Transient existence state, drained once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistenceState {
    #[default]
    Unchanged,
    Added,
    Modified,
    Removed,
}

/// Per-state asset counts, as reported by [`Curator::transform_stats`].
///
/// [`Curator::transform_stats`]: crate::Curator::transform_stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub total: usize,
    counts: [usize; TransformState::COUNT],
}

impl TransformStats {
    pub(crate) fn new(total: usize, counts: [usize; TransformState::COUNT]) -> Self {
        Self { total, counts }
    }

    pub fn count(&self, state: TransformState) -> usize {
        self.counts[state.index()]
    }
}

/// A read-only snapshot of one sub-asset, carried by curator events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAssetSnapshot {
    pub id: AssetId,
    /// Main asset this sub-asset belongs to. Equals `id` for main assets.
    pub parent_id: AssetId,
    pub is_main: bool,
    /// Empty for main assets.
    pub name: String,
    pub absolute_path: PathBuf,
    pub transform_state: TransformState,
    pub asset_hash: u64,
    pub thumbnail_hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuratorEventKind {
    AssetAdded,
    AssetRemoved,
    AssetUpdated,
    /// The whole asset list was rebuilt (full rescan); queries must be redone.
    AssetListReset,
}

/// Broadcast to subscribers from [`Curator::main_thread_tick`], never from
/// inside the curator lock.
///
/// [`Curator::main_thread_tick`]: crate::Curator::main_thread_tick
#[derive(Debug, Clone)]
pub struct CuratorEvent {
    pub kind: CuratorEventKind,
    /// Nil for `AssetListReset`.
    pub asset_id: AssetId,
    /// Absent for `AssetListReset` and for assets already destroyed.
    pub snapshot: Option<SubAssetSnapshot>,
}

/// A raw filesystem change notification, produced by an external watcher
/// and consumed by the curator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A file was added or modified (the curator re-stats it either way).
    Changed(PathBuf),
    /// A file was removed. Also the right event for a failed stat.
    Removed(PathBuf),
    /// The watcher lost track; a full rescan of all data roots is required.
    RescanRequired,
}
