//! Priority Queue with lazy deletion
//!
//! Uses std::collections::BinaryHeap with a HashMap for O(1) lookup.
//! Supports remove() via the lazy deletion pattern, which is what makes
//! cancelling a pending wake-up cheap.

use crate::time::TimePoint;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Key for the priority queue heap.
/// Uses (deadline, tie, id) for deterministic ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Key {
    deadline: TimePoint,
    tie: u64,
    id: u64,
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap, so we reverse the ordering for min-heap behavior.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.tie.cmp(&other.tie))
            .then(self.id.cmp(&other.id))
            .reverse()
    }
}

/// A min-priority queue keyed on TimePoint deadlines.
/// The HashMap is the source of truth; heap entries whose id was removed are
/// discarded on peek/pop. Ids must not be reused over the lifetime of the
/// queue, so an id still in the map always matches its heap entry.
pub struct MinPq<M> {
    heap: BinaryHeap<Key>,
    live: HashMap<u64, M>,
}

impl<M> Default for MinPq<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MinPq<M> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
        }
    }

    /// Add an item to the queue. Returns false if id is queued already.
    pub fn add(&mut self, id: u64, deadline: TimePoint, tie: u64, meta: M) -> bool {
        if self.live.contains_key(&id) {
            return false;
        }
        self.live.insert(id, meta);
        self.heap.push(Key { deadline, tie, id });
        true
    }

    /// Remove an item by id. Returns the metadata if found.
    pub fn remove(&mut self, id: u64) -> Option<M> {
        self.live.remove(&id)
    }

    /// Whether an item with this id is still queued.
    pub fn contains(&self, id: u64) -> bool {
        self.live.contains_key(&id)
    }

    /// Peek the minimum deadline without removing. Returns None if empty.
    pub fn peek_deadline(&mut self) -> Option<TimePoint> {
        self.clean_top();
        self.heap.peek().map(|k| k.deadline)
    }

    /// Pop the minimum item. Returns (id, deadline, tie, metadata).
    pub fn pop(&mut self) -> Option<(u64, TimePoint, u64, M)> {
        loop {
            let k = self.heap.pop()?;
            // Removed ids leave stale heap entries behind.
            if let Some(meta) = self.live.remove(&k.id) {
                return Some((k.id, k.deadline, k.tie, meta));
            }
        }
    }

    /// Remove stale entries from the top of the heap.
    fn clean_top(&mut self) {
        while let Some(k) = self.heap.peek() {
            if self.live.contains_key(&k.id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Get the number of live items.
    pub fn len(&self) -> usize {
        self.live.len()
    }
}
