//! Bounded cache of materialized historical-revision trees, so repeated
//! reads at an old revision don't replay the whole commit chain every
//! time. Shaped after the pack decoder's waitlist (`internal/pack/waitlist.rs`):
//! a `DashMap` for concurrent lookup, with a small amount of extra
//! bookkeeping (here, an insertion-order queue) for bounded eviction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::tree::ContentTree;

/// An LRU-ish cache of `revision -> ContentTree` snapshots, capped at a
/// fixed entry count (spec.md SPEC_FULL.md §B, "Repository content
/// cache").
pub struct SnapshotCache {
    entries: DashMap<i32, Arc<ContentTree>>,
    order: Mutex<VecDeque<i32>>,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        SnapshotCache {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, revision: i32) -> Option<Arc<ContentTree>> {
        self.entries.get(&revision).map(|e| e.clone())
    }

    pub fn insert(&self, revision: i32, tree: Arc<ContentTree>) {
        if self.entries.contains_key(&revision) {
            return;
        }
        self.entries.insert(revision, tree);
        let mut order = self.order.lock().expect("snapshot cache order lock poisoned");
        order.push_back(revision);
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.order.lock().expect("snapshot cache order lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_entry_past_capacity() {
        let cache = SnapshotCache::new(2);
        cache.insert(1, Arc::new(ContentTree::new()));
        cache.insert(2, Arc::new(ContentTree::new()));
        cache.insert(3, Arc::new(ContentTree::new()));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }
}
