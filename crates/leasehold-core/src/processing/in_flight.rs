//! InFlightSet - message ids currently admitted for processing.
//!
//! Capacity is enforced at the admission point by waiting for a free slot,
//! not by rejecting inserts. Between admitting a message and the next wait
//! the set may hold `max_size` entries; it never grows past that while the
//! single dispatcher honours the wait.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

#[derive(Debug)]
pub struct InFlightSet<T> {
    entries: Mutex<HashSet<T>>,
    freed: Notify,
    max_size: usize,
}

impl<T: Eq + Hash> InFlightSet<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashSet::new()),
            freed: Notify::new(),
            max_size,
        }
    }

    // The critical sections never panic mid-update, so a poisoned lock still
    // guards a consistent set.
    fn entries(&self) -> MutexGuard<'_, HashSet<T>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `id`. Callers check `contains` first; the return value tells
    /// whether the id was new.
    pub fn insert(&self, id: T) -> bool {
        self.entries().insert(id)
    }

    pub fn contains(&self, id: &T) -> bool {
        self.entries().contains(id)
    }

    /// Remove `id` if present and wake every waiter, present or not.
    pub fn remove(&self, id: &T) -> bool {
        let removed = self.entries().remove(id);
        self.freed.notify_waiters();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn free_slots(&self) -> usize {
        self.max_size.saturating_sub(self.len())
    }

    /// Wait until `len() < max_size`.
    pub async fn wait_for_free_slot(&self) {
        loop {
            // register interest before checking so a remove() in between is not lost
            let notified = self.freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.len() < self.max_size {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Clone + Eq + Hash> InFlightSet<T> {
    /// Copy of the current entries, for introspection and tests.
    pub fn snapshot(&self) -> HashSet<T> {
        self.entries().clone()
    }
}
