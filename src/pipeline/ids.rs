//! Smallest-available-integer id allocator
//!
//! Job ids stay small and are reused once a job is retired, so log lines
//! and progress rows keep readable numbers for the whole run.

use crate::types::JobId;
use std::collections::BTreeSet;

/// Hands out the smallest free id in `[0, limit)` (or `[0, ∞)`)
///
/// Ids freed below the high-water mark are kept in an ordered set of holes,
/// so `take`, `free` and `reserve` are all O(log n).
#[derive(Debug, Clone, Default)]
pub struct JobIdAllocator {
    taken: BTreeSet<usize>,
    /// Ids below this bound that were freed, smallest first
    holes: BTreeSet<usize>,
    /// Next id never handed out yet
    high_water: usize,
    limit: Option<usize>,
}

impl JobIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Take the smallest free id; `None` when the limit is exhausted
    pub fn take(&mut self) -> Option<JobId> {
        let id = match self.holes.pop_first() {
            Some(hole) => hole,
            None => {
                if self.limit.is_some_and(|limit| self.high_water >= limit) {
                    return None;
                }
                let id = self.high_water;
                self.high_water += 1;
                id
            }
        };
        self.taken.insert(id);
        Some(JobId(id))
    }

    /// Return an id to the pool; freeing a free id is a no-op
    pub fn free(&mut self, id: JobId) {
        if !self.taken.remove(&id.0) {
            return;
        }

        if id.0 + 1 == self.high_water {
            // shrink the high-water mark past any trailing holes
            self.high_water = id.0;
            while self.high_water > 0 && self.holes.remove(&(self.high_water - 1)) {
                self.high_water -= 1;
            }
        } else {
            self.holes.insert(id.0);
        }
    }

    /// Mark a specific id as taken; false if it is taken or out of range
    pub fn reserve(&mut self, id: JobId) -> bool {
        if self.limit.is_some_and(|limit| id.0 >= limit) || self.taken.contains(&id.0) {
            return false;
        }

        if id.0 >= self.high_water {
            self.holes.extend(self.high_water..id.0);
            self.high_water = id.0 + 1;
        } else {
            self.holes.remove(&id.0);
        }
        self.taken.insert(id.0);
        true
    }

    pub fn is_free(&self, id: JobId) -> bool {
        !self.taken.contains(&id.0) && self.limit.map_or(true, |limit| id.0 < limit)
    }

    /// Number of ids currently taken
    pub fn count(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Taken ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.taken.iter().map(|&id| JobId(id))
    }
}
