//! Shared work queue for one run.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use revdb_core::PageTarget;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PageTarget>,
    seen: HashSet<String>,
    in_flight: usize,
    halted: Option<String>,
}

/// Pending targets plus the seen-set that keeps each URL to one visit per run.
/// Workers block in [`WorkQueue::next`] until an item arrives or the run is over:
/// nothing pending and nothing in flight, or halted.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

/// A dequeued item. Dropping it marks the item finished, even when the worker panics.
#[derive(Debug)]
pub struct Claim<'a> {
    queue: &'a WorkQueue,
    target: PageTarget,
}

impl Claim<'_> {
    pub fn target(&self) -> &PageTarget {
        &self.target
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.queue.changed.notify_waiters();
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `target` unless its URL was already seen this run or the run is halted.
    pub fn push(&self, target: PageTarget) -> bool {
        let mut state = self.state();
        if state.halted.is_some() || !state.seen.insert(target.url.clone()) {
            return false;
        }
        state.pending.push_back(target);
        drop(state);
        self.changed.notify_waiters();
        true
    }

    pub async fn next(&self) -> Option<Claim<'_>> {
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.state();
                if state.halted.is_some() {
                    return None;
                }
                if let Some(target) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(Claim { queue: self, target });
                }
                if state.in_flight == 0 {
                    drop(state);
                    self.changed.notify_waiters();
                    return None;
                }
            }
            changed.await;
        }
    }

    /// Stop handing out work. Items already claimed run to completion.
    /// Returns how many pending items were dropped.
    pub fn halt(&self, reason: impl Into<String>) -> usize {
        let mut state = self.state();
        if state.halted.is_none() {
            state.halted = Some(reason.into());
        }
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);
        self.changed.notify_waiters();
        dropped
    }

    pub fn halted_reason(&self) -> Option<String> {
        self.state().halted.clone()
    }

    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }
}
