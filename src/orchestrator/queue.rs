//! Priority queue of job ids with removal and reprioritization.
//!
//! Entries live in a binary heap ordered by `(priority, seq)`, where `seq` is
//! the enqueue order. Removal and reprioritization only touch the `live` map;
//! heap entries whose generation no longer matches are discarded when they
//! surface at pop time. Once `live` is empty the heap is cleared, so stale
//! entries never outlive a full drain.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use super::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    key: Reverse<(i32, u64)>,
    id: JobId,
    generation: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy)]
struct Live {
    priority: i32,
    seq: u64,
    generation: u64,
}

/// Min-priority queue; FIFO within a priority.
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<Entry>,
    live: HashMap<JobId, Live>,
    next_seq: u64,
    next_generation: u64,
}

impl JobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`; re-pushing a queued id just reprioritizes it.
    pub fn push(&mut self, id: JobId, priority: i32) {
        if self.reprioritize(id, priority) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let generation = self.bump_generation();
        self.live.insert(
            id,
            Live {
                priority,
                seq,
                generation,
            },
        );
        self.heap.push(Entry {
            key: Reverse((priority, seq)),
            id,
            generation,
        });
    }

    /// Removes and returns the most urgent id.
    pub fn pop(&mut self) -> Option<JobId> {
        while let Some(entry) = self.heap.pop() {
            let current = self
                .live
                .get(&entry.id)
                .is_some_and(|live| live.generation == entry.generation);
            if current {
                self.live.remove(&entry.id);
                self.compact_if_drained();
                return Some(entry.id);
            }
        }
        None
    }

    /// Drops `id` from the queue. Returns false if it was not queued.
    pub fn remove(&mut self, id: JobId) -> bool {
        let removed = self.live.remove(&id).is_some();
        self.compact_if_drained();
        removed
    }

    /// Moves `id` to `priority`, keeping its place among equal priorities.
    /// Returns false if it was not queued.
    pub fn reprioritize(&mut self, id: JobId, priority: i32) -> bool {
        let generation = self.bump_generation();
        let Some(live) = self.live.get_mut(&id) else {
            return false;
        };
        live.priority = priority;
        live.generation = generation;
        let seq = live.seq;
        self.heap.push(Entry {
            key: Reverse((priority, seq)),
            id,
            generation,
        });
        true
    }

    /// True if `id` is waiting in the queue.
    #[must_use]
    pub fn contains(&self, id: JobId) -> bool {
        self.live.contains_key(&id)
    }

    /// Queued ids in the order they would be popped.
    #[must_use]
    pub fn ordered_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<(i32, u64, JobId)> = self
            .live
            .iter()
            .map(|(id, live)| (live.priority, live.seq, *id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Number of queued ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Heap entries including stale ones.
    #[cfg(test)]
    fn heap_len(&self) -> usize {
        self.heap.len()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn compact_if_drained(&mut self) {
        if self.live.is_empty() {
            self.heap.clear();
        }
    }
}
