//! Local list reconciliation for live-updated screens
//!
//! Each screen materializes one ordered, duplicate-free list of
//! entities, seeded from a snapshot query and then kept consistent by
//! applying the channel's change events on top. Apply is idempotent, so
//! at-least-once delivery (and the optimistic local echo of the
//! client's own mutations) cannot corrupt the list.

use crate::gateway::ChangeEvent;
use crate::types::FeedEntity;

/// An ordered, de-duplicated in-memory list of entities.
///
/// Ordering invariant: items are sorted by `created_at` descending
/// (newest first), matching how feed snapshots are queried. The
/// ordering key is immutable after creation, so updates never move an
/// item.
#[derive(Debug, Clone)]
pub struct ListReconciler<T: FeedEntity> {
    items: Vec<T>,
}

impl<T: FeedEntity> Default for ListReconciler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FeedEntity> ListReconciler<T> {
    /// Create an empty reconciler
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Replace the entire state with a fresh snapshot.
    ///
    /// Wholesale replacement, not a merge: rows deleted on the server
    /// while we were disconnected must not survive locally. The input
    /// is re-sorted and de-duplicated defensively.
    pub fn load_snapshot(&mut self, mut items: Vec<T>) {
        items.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        let mut seen = std::collections::HashSet::new();
        items.retain(|item| seen.insert(item.entity_id()));

        self.items = items;
    }

    /// Apply one change event. Returns whether the state changed.
    ///
    /// Idempotent: applying the same event twice leaves the same state
    /// as applying it once.
    pub fn apply(&mut self, event: ChangeEvent<T>) -> bool {
        match event {
            ChangeEvent::Insert { new } => self.insert(new),
            ChangeEvent::Update { new } => self.update(new),
            ChangeEvent::Delete { id } => self.remove(&id),
        }
    }

    fn insert(&mut self, new: T) -> bool {
        // The initiating client can see both its optimistic echo and
        // the server event for the same row; the second one is dropped.
        if self.contains(&new.entity_id()) {
            return false;
        }

        let pos = self
            .items
            .iter()
            .position(|item| item.created_at() <= new.created_at())
            .unwrap_or(self.items.len());
        self.items.insert(pos, new);
        true
    }

    fn update(&mut self, new: T) -> bool {
        let id = new.entity_id();
        match self.items.iter_mut().find(|item| item.entity_id() == id) {
            Some(existing) => {
                existing.absorb(new);
                true
            }
            // Never materialized locally, or already deleted. An
            // update must not resurrect the row.
            None => false,
        }
    }

    fn remove(&mut self, id: &T::Id) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.entity_id() != *id);
        self.items.len() != before
    }

    /// Mutate one item in place.
    ///
    /// Used by the like coordinator for optimistic count deltas. The
    /// closure must not change the ordering key. Returns whether the
    /// item was present.
    pub fn modify<F: FnOnce(&mut T)>(&mut self, id: &T::Id, f: F) -> bool {
        match self.items.iter_mut().find(|item| item.entity_id() == *id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// All items, newest first
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Look up one item by id
    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.items.iter().find(|item| item.entity_id() == *id)
    }

    /// Whether an item with this id is present
    pub fn contains(&self, id: &T::Id) -> bool {
        self.items.iter().any(|item| item.entity_id() == *id)
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all items
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
