//! By-state asset indices, the stale set, and the hash fold.
//!
//! The visible `TransformState` of an asset and its membership in the
//! by-state sets always move together, and only through
//! [`TransformStates::set_state`]. Invalidation goes through the *stale*
//! set instead of resetting the state, so observers keep seeing the last
//! confirmed state until recomputation proves it changed.

use fnv::FnvHashSet;

use crate::types::{AssetId, TransformState, TransformStats};

/// Folds one dependency hash into a rolling 64-bit hash.
///
/// The combine is commutative (wrapping add), so reordering a dependency
/// list without content change leaves `asset_hash`/`thumbnail_hash`
/// untouched. Changing this would silently invalidate every existing cache.
#[inline]
pub fn combine_hash(base: u64, hash: u64) -> u64 {
    base.wrapping_add(hash)
}

#[derive(Debug, Default)]
pub struct TransformStates {
    by_state: [FnvHashSet<AssetId>; TransformState::COUNT],
    stale: FnvHashSet<AssetId>,
}

impl TransformStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `id` into the set for `state` and clears its stale tag.
    pub fn set_state(&mut self, id: AssetId, state: TransformState) {
        for set in &mut self.by_state {
            set.remove(&id);
        }
        self.by_state[state.index()].insert(id);
        self.stale.remove(&id);
    }

    /// Drops the asset from every set, stale included.
    pub fn remove(&mut self, id: AssetId) {
        for set in &mut self.by_state {
            set.remove(&id);
        }
        self.stale.remove(&id);
    }

    pub fn mark_stale(&mut self, id: AssetId) {
        self.stale.insert(id);
    }

    pub fn is_stale(&self, id: AssetId) -> bool {
        self.stale.contains(&id)
    }

    pub fn has_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    /// Any stale asset, without removing it; recomputation clears the tag
    /// via `set_state` once it lands.
    pub fn peek_stale(&self) -> Option<AssetId> {
        self.stale.iter().next().copied()
    }

    /// Force-drops a stale tag. Used when the tagged asset turns out not to
    /// exist anymore (expected race, not an error).
    pub fn clear_stale(&mut self, id: AssetId) {
        self.stale.remove(&id);
    }

    pub fn in_state(&self, state: TransformState) -> impl Iterator<Item = AssetId> + '_ {
        self.by_state[state.index()].iter().copied()
    }

    pub fn stats(&self, total: usize) -> TransformStats {
        let mut counts = [0usize; TransformState::COUNT];
        for (i, set) in self.by_state.iter().enumerate() {
            counts[i] = set.len();
        }
        TransformStats::new(total, counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_hash_is_order_insensitive() {
        let deps = [0x1111u64, 0x2222, 0x3333, u64::MAX - 7];
        let forward = deps.iter().fold(99u64, |acc, h| combine_hash(acc, *h));
        let reverse = deps.iter().rev().fold(99u64, |acc, h| combine_hash(acc, *h));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn set_state_moves_between_sets() {
        let mut states = TransformStates::new();
        let id = AssetId::new_v4();

        states.set_state(id, TransformState::NeedsTransform);
        assert_eq!(states.stats(1).count(TransformState::NeedsTransform), 1);

        states.set_state(id, TransformState::UpToDate);
        let stats = states.stats(1);
        assert_eq!(stats.count(TransformState::NeedsTransform), 0);
        assert_eq!(stats.count(TransformState::UpToDate), 1);
    }

    #[test]
    fn set_state_clears_stale_tag() {
        let mut states = TransformStates::new();
        let id = AssetId::new_v4();

        states.mark_stale(id);
        assert!(states.is_stale(id));
        assert_eq!(states.peek_stale(), Some(id));

        states.set_state(id, TransformState::UpToDate);
        assert!(!states.is_stale(id));
        assert!(!states.has_stale());
    }

    #[test]
    fn remove_drops_everywhere() {
        let mut states = TransformStates::new();
        let id = AssetId::new_v4();
        states.set_state(id, TransformState::MissingDependency);
        states.mark_stale(id);

        states.remove(id);
        assert_eq!(states.stats(0).count(TransformState::MissingDependency), 0);
        assert!(!states.is_stale(id));
    }
}
