//! `Tile` and `PageSet`: the cache's bookkeeping of which pages are resident
//! (`pages`) or awaiting a load (`waits`), and the LRU+priority eviction
//! policy.
//!
//! Grounded on `examples/original_source/scm-set.{hpp,cpp}` (`scm_page`/
//! `scm_set::eject`).

use std::collections::BTreeMap;

use crate::index::PageId;

/// One active page: which file it belongs to, which atlas slot it occupies
/// (0 while only a wait placeholder), and the frame it was last touched.
/// Ordered `(page_id, file_index)`, matching `scm_item::operator<` — this
/// ordering is what makes the deepest (highest id) tile the tie-break
/// eviction candidate.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TileKey {
    pub page_id: PageId,
    pub file_index: i32,
}

#[derive(Copy, Clone, Debug)]
pub struct TileEntry {
    pub slot: u32,
    pub last_used_frame: u32,
}

/// A set of active pages (either `pages`, the resident set, or `waits`, the
/// set of pages currently being loaded), each associated with the frame it
/// was last touched.
#[derive(Default)]
pub struct PageSet {
    entries: BTreeMap<TileKey, TileEntry>,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// If `key` is present, bumps its last-used frame to `frame` and returns
    /// the updated entry.
    pub fn search(&mut self, key: TileKey, frame: u32) -> Option<TileEntry> {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used_frame = frame;
            Some(*entry)
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: TileKey, slot: u32, frame: u32) {
        self.entries.insert(
            key,
            TileEntry {
                slot,
                last_used_frame: frame,
            },
        );
    }

    pub fn remove(&mut self, key: TileKey) {
        self.entries.remove(&key);
    }

    /// Chooses a page to evict to accommodate the load of `incoming` at
    /// frame `frame`. Two candidates are considered: `a`, the
    /// least-recently-used page (by `last_used_frame`), and `l`, the
    /// highest-sorting (deepest, by `(page_id, file_index)`) page present.
    /// `a` is evicted if it's been untouched for more than two frames;
    /// otherwise `l` is evicted only if it is strictly lower priority
    /// (a higher page id) than the incoming page — this refusal is what
    /// prevents thrashing when the cache is already full of pages that are
    /// all still in active use.
    pub fn eject(&mut self, frame: u32, incoming: PageId) -> Option<(TileKey, TileEntry)> {
        if self.entries.is_empty() {
            return None;
        }

        let lru_key = *self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used_frame)
            .map(|(k, _)| k)
            .expect("checked non-empty above");

        let last_key = *self
            .entries
            .keys()
            .next_back()
            .expect("checked non-empty above");

        let lru_entry = self.entries[&lru_key];

        if lru_entry.last_used_frame < frame.saturating_sub(2) {
            let entry = self.entries.remove(&lru_key).unwrap();
            return Some((lru_key, entry));
        }

        if incoming < last_key.page_id {
            let entry = self.entries.remove(&last_key).unwrap();
            return Some((last_key, entry));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page_id: i64, file_index: i32) -> TileKey {
        TileKey {
            page_id: PageId(page_id),
            file_index,
        }
    }

    #[test]
    fn eject_empty_set_refuses() {
        let mut set = PageSet::new();
        assert!(set.eject(10, PageId(0)).is_none());
    }

    #[test]
    fn eject_prefers_stale_lru_entry() {
        let mut set = PageSet::new();
        set.insert(key(100, 0), 1, 0); // stale: last used frame 0
        set.insert(key(50, 0), 2, 10); // fresh

        let (evicted, _) = set.eject(10, PageId(5)).unwrap();
        assert_eq!(evicted, key(100, 0));
    }

    #[test]
    fn eject_refuses_when_all_recent_and_incoming_is_lower_priority() {
        let mut set = PageSet::new();
        set.insert(key(5, 0), 1, 9);
        set.insert(key(7, 0), 2, 10);

        // incoming page 3 is coarser (lower id / higher priority) than the
        // deepest resident page (7), so page 7 should be evicted.
        let (evicted, _) = set.eject(10, PageId(3)).unwrap();
        assert_eq!(evicted, key(7, 0));
    }

    #[test]
    fn eject_refuses_anti_thrash_scenario() {
        let mut set = PageSet::new();
        set.insert(key(5, 0), 1, 9);
        set.insert(key(7, 0), 2, 10);

        // incoming page 9 is lower priority (deeper) than any resident
        // page and none are stale: refuse to thrash.
        assert!(set.eject(10, PageId(9)).is_none());
    }
}
