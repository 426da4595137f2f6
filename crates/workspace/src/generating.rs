//! Bookkeeping for the "generating" indicator.
//!
//! A tab is generating while output keeps arriving. Every mark restarts a
//! quiescence timer; the timer task carries the generation it was armed
//! with, and an expiry whose generation is no longer current is ignored.
//! That makes a late expiry racing with a reset or a close harmless.

use collections::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;

use terminal::ProcessId;

struct PendingExpiry {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct GeneratingTracker {
    active: FxHashSet<ProcessId>,
    timers: FxHashMap<ProcessId, PendingExpiry>,
    next_generation: u64,
}

impl GeneratingTracker {
    /// Add `id` to the set and allocate a fresh timer generation, cancelling
    /// the previous timer. Returns `(newly_added, generation)`.
    pub(crate) fn mark(&mut self, id: &ProcessId) -> (bool, u64) {
        if let Some(previous) = self.timers.remove(id) {
            previous.task.abort();
        }
        self.next_generation += 1;
        let added = self.active.insert(id.clone());
        (added, self.next_generation)
    }

    /// Record the timer task armed for `generation`.
    pub(crate) fn arm(&mut self, id: ProcessId, generation: u64, task: JoinHandle<()>) {
        if let Some(previous) = self.timers.insert(id, PendingExpiry { generation, task }) {
            previous.task.abort();
        }
    }

    /// Timer for `generation` fired. Returns whether `id` left the set.
    pub(crate) fn expire(&mut self, id: &ProcessId, generation: u64) -> bool {
        match self.timers.get(id) {
            Some(pending) if pending.generation == generation => {
                self.timers.remove(id);
                self.active.remove(id)
            }
            _ => false,
        }
    }

    /// Cancel the timer and remove `id`. Returns whether it was in the set.
    pub(crate) fn clear(&mut self, id: &ProcessId) -> bool {
        if let Some(pending) = self.timers.remove(id) {
            pending.task.abort();
        }
        self.active.remove(id)
    }

    /// Cancel every timer without touching the set.
    pub(crate) fn cancel_timers(&mut self) {
        for (_, pending) in self.timers.drain() {
            pending.task.abort();
        }
    }

    pub(crate) fn contains(&self, id: &ProcessId) -> bool {
        self.active.contains(id)
    }

    pub(crate) fn active(&self) -> &FxHashSet<ProcessId> {
        &self.active
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self, id: &ProcessId) -> bool {
        self.timers.contains_key(id)
    }
}
