use std::collections::HashSet;

use crate::Oid;

/// Bounded, deduplicating set of entry ids.
///
/// Ids are handed out last-in first-out. An id is accepted at most once over
/// the life of the set, even after it was popped, and once `capacity` ids
/// have been accepted every further `add` is dropped.
#[derive(Debug)]
pub struct UidSet {
    pending: Vec<Oid>,
    seen: HashSet<Oid>,
    capacity: usize,
}

impl UidSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            seen: HashSet::new(),
            capacity,
        }
    }

    /// Returns false if `oid` was already accepted or the set is full
    pub fn add(
        &mut self,
        oid: Oid,
    ) -> bool {
        if self.is_full() || !self.seen.insert(oid) {
            return false;
        }
        self.pending.push(oid);
        true
    }

    /// Most recently added id not yet popped
    pub fn pop(&mut self) -> Option<Oid> {
        self.pending.pop()
    }

    pub fn contains(
        &self,
        oid: Oid,
    ) -> bool {
        self.seen.contains(&oid)
    }

    pub fn is_full(&self) -> bool {
        self.seen.len() >= self.capacity
    }

    /// Ids accepted so far
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Ids accepted but not popped yet
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
