use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cmdwire_frame::Value;
use tokio::sync::oneshot;

use crate::fault::Fault;

/// What a waiting caller receives: the result value or the remote fault.
pub type CallOutcome = Result<Value, Fault>;

/// Outstanding correlated calls of one connection, keyed by correlation id.
///
/// Ids are allocated from a per-connection counter and never reused while a
/// call with the same id is still waiting.
#[derive(Debug)]
pub struct PendingCalls {
    waiters: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
    next_id: AtomicU64,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<CallOutcome>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh correlation id and register a waiter for it.
    pub fn register(&self) -> (u64, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters();
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if let std::collections::hash_map::Entry::Vacant(slot) = waiters.entry(id) {
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    /// Hand `outcome` to the waiter for `id`.
    ///
    /// Returns `false` when nobody waits for that id (already timed out,
    /// cancelled or never issued).
    pub fn resolve(&self, id: u64, outcome: CallOutcome) -> bool {
        let Some(waiter) = self.waiters().remove(&id) else {
            return false;
        };
        // The caller may have stopped listening between removal and send.
        waiter.send(outcome).is_ok()
    }

    /// Forget the waiter for `id`.
    pub fn cancel(&self, id: u64) -> bool {
        self.waiters().remove(&id).is_some()
    }

    /// Drop every waiter. Their receivers observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.waiters().drain().collect();
        drained.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.waiters().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters().is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a pending waiter when the awaiting call is dropped or times out.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
    active: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingCalls, id: u64) -> Self {
        Self {
            pending,
            id,
            active: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.active = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.active && self.pending.cancel(self.id) {
            tracing::debug!(correlation_id = self.id, "removed abandoned call waiter");
        }
    }
}
