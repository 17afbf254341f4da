//! Bounded tag cache for duplicate detection.
//!
//! Holds the `depth` most recently inserted tags. A ring records insertion
//! order; an open-addressed map with linear probing answers membership.
//! When the ring is full the oldest tag is evicted, from both the ring and
//! the map, before the new tag goes in.

use crate::TangoError;

const TAG_NULL: u64 = 0;

pub struct TCache {
    depth: usize,
    oldest: usize,
    ring: Box<[u64]>,
    map: Box<[u64]>,
}

impl std::fmt::Debug for TCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TCache")
            .field("depth", &self.depth)
            .field("map_cnt", &self.map.len())
            .field("oldest", &self.oldest)
            .finish()
    }
}

impl TCache {
    /// Map slot count used when none is requested: twice the depth, rounded
    /// up to a power of two, which keeps the load factor at or below one half.
    pub fn map_cnt_default(depth: usize) -> usize {
        (2 * depth).max(2).next_power_of_two()
    }

    /// Heap footprint of a cache, used when accounting for tile scratch.
    pub fn footprint(depth: usize, map_cnt: usize) -> usize {
        (depth + map_cnt) * std::mem::size_of::<u64>()
    }

    /// Create an empty cache. A `map_cnt` of zero selects the default.
    pub fn new(depth: usize, map_cnt: usize) -> Result<Self, TangoError> {
        if depth == 0 {
            return Err(TangoError::BadDepth(0));
        }
        let map_cnt = if map_cnt == 0 {
            Self::map_cnt_default(depth)
        } else {
            map_cnt
        };
        if !map_cnt.is_power_of_two() || map_cnt <= depth {
            return Err(TangoError::BadDepth(map_cnt as u64));
        }
        Ok(Self {
            depth,
            oldest: 0,
            ring: vec![TAG_NULL; depth].into_boxed_slice(),
            map: vec![TAG_NULL; map_cnt].into_boxed_slice(),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn map_cnt(&self) -> usize {
        self.map.len()
    }

    /// Tag 0 marks empty slots, so it is folded onto 1.
    #[inline]
    fn canon(tag: u64) -> u64 {
        if tag == TAG_NULL {
            1
        } else {
            tag
        }
    }

    #[inline]
    fn home(&self, tag: u64) -> usize {
        (tag as usize) & (self.map.len() - 1)
    }

    /// Slot holding `tag`, or the empty slot where the probe ended.
    fn probe(&self, tag: u64) -> (usize, bool) {
        let mask = self.map.len() - 1;
        let mut slot = self.home(tag);
        loop {
            match self.map[slot] {
                t if t == tag => return (slot, true),
                TAG_NULL => return (slot, false),
                _ => slot = (slot + 1) & mask,
            }
        }
    }

    pub fn query(&self, tag: u64) -> bool {
        self.probe(Self::canon(tag)).1
    }

    /// Insert `tag`, returning `true` if it was already present.
    ///
    /// A duplicate does not refresh the tag's position in the eviction order.
    pub fn insert(&mut self, tag: u64) -> bool {
        let tag = Self::canon(tag);
        let (slot, found) = self.probe(tag);
        if found {
            return true;
        }

        let evicted = self.ring[self.oldest];
        if evicted != TAG_NULL {
            self.map_remove(evicted);
        }
        // The eviction may have shifted entries, so probe again.
        let slot = if evicted != TAG_NULL {
            self.probe(tag).0
        } else {
            slot
        };
        self.map[slot] = tag;
        self.ring[self.oldest] = tag;
        self.oldest = (self.oldest + 1) % self.depth;
        false
    }

    /// Remove with backward-shift deletion so probe chains stay unbroken.
    fn map_remove(&mut self, tag: u64) {
        let mask = self.map.len() - 1;
        let (mut hole, found) = self.probe(tag);
        if !found {
            return;
        }
        self.map[hole] = TAG_NULL;
        let mut slot = hole;
        loop {
            slot = (slot + 1) & mask;
            let cur = self.map[slot];
            if cur == TAG_NULL {
                return;
            }
            let home = self.home(cur);
            // Entry stays if its home lies cyclically in (hole, slot].
            let stays = if hole <= slot {
                hole < home && home <= slot
            } else {
                hole < home || home <= slot
            };
            if !stays {
                self.map[hole] = cur;
                self.map[slot] = TAG_NULL;
                hole = slot;
            }
        }
    }

    /// Forget every tag.
    pub fn reset(&mut self) {
        self.ring.fill(TAG_NULL);
        self.map.fill(TAG_NULL);
        self.oldest = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_insert_is_duplicate() {
        let mut tc = TCache::new(4, 0).unwrap();
        assert!(!tc.insert(10));
        assert!(tc.insert(10));
        assert!(tc.query(10));
        assert!(!tc.query(11));
    }

    #[test]
    fn test_depth_plus_one_evicts_first() {
        let depth = 8;
        let mut tc = TCache::new(depth, 0).unwrap();
        for tag in 1..=depth as u64 {
            assert!(!tc.insert(tag));
        }
        assert!(tc.query(1));
        assert!(!tc.insert(100));
        assert!(!tc.query(1));
        for tag in 2..=depth as u64 {
            assert!(tc.query(tag), "tag {tag} evicted early");
        }
        assert!(!tc.insert(1));
    }

    #[test]
    fn test_tag_zero_is_usable() {
        let mut tc = TCache::new(2, 0).unwrap();
        assert!(!tc.insert(0));
        assert!(tc.insert(0));
    }

    #[test]
    fn test_colliding_tags_survive_eviction() {
        // Every tag homes to slot 0 of a 16-slot map.
        let mut tc = TCache::new(4, 16).unwrap();
        let tags: Vec<u64> = (1..=12).map(|i| i << 8).collect();
        for (i, &tag) in tags.iter().enumerate() {
            assert!(!tc.insert(tag));
            let live = &tags[i.saturating_sub(3)..=i];
            for &t in live {
                assert!(tc.query(t), "tag {t:#x} lost after inserting {i}");
            }
            if i >= 4 {
                assert!(!tc.query(tags[i - 4]));
            }
        }
    }

    #[test]
    fn test_reset() {
        let mut tc = TCache::new(4, 0).unwrap();
        tc.insert(5);
        tc.reset();
        assert!(!tc.query(5));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(TCache::new(0, 0).is_err());
        assert!(TCache::new(8, 8).is_err());
        assert!(TCache::new(8, 12).is_err());
    }
}
