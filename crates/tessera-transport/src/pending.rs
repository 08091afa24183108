//! Pending-request table.
//!
//! Each entry is removed exactly once: by the matching reply ([`settle`]), by
//! the caller's deadline or drop ([`forget`]), or by connection loss
//! ([`reject_all`]). Whoever removes the entry owns the outcome; the others
//! find nothing and do nothing.
//!
//! [`settle`]: PendingTable::settle
//! [`forget`]: PendingTable::forget
//! [`reject_all`]: PendingTable::reject_all

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TransportError;

type Responder<E> = oneshot::Sender<Result<E, TransportError>>;

/// Outstanding requests keyed by request id.
pub struct PendingTable<E> {
    entries: Mutex<HashMap<String, Responder<E>>>,
}

impl<E> Default for PendingTable<E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<E> PendingTable<E> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its outcome will arrive on.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Result<E, TransportError>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.entries.lock().insert(id.to_owned(), tx);
        rx
    }

    /// Register `id` and return a guard that forgets the entry when dropped.
    pub fn register_guarded(
        &self,
        id: &str,
    ) -> (PendingGuard<'_, E>, oneshot::Receiver<Result<E, TransportError>>) {
        let rx = self.register(id);
        let guard = PendingGuard {
            table: self,
            id: id.to_owned(),
        };
        (guard, rx)
    }

    /// Deliver `outcome` to `id`. Returns `false` when no such entry exists
    /// (already settled, timed out or rejected).
    pub fn settle(&self, id: &str, outcome: Result<E, TransportError>) -> bool {
        let Some(tx) = self.entries.lock().remove(id) else {
            return false;
        };
        // The caller may have stopped listening; the entry is gone either way.
        let _ = tx.send(outcome);
        true
    }

    /// Remove `id` without delivering anything. Returns whether it was present.
    pub fn forget(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Fail every outstanding request with a clone of `err` and empty the
    /// table. Returns how many were rejected.
    pub fn reject_all(&self, err: &TransportError) -> usize {
        let drained: Vec<Responder<E>> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }
}

/// Removes its entry from the table on drop.
pub struct PendingGuard<'a, E> {
    table: &'a PendingTable<E>,
    id: String,
}

impl<E> PendingGuard<'_, E> {
    /// Request id this guard owns.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the entry now. Returns whether it was still present, i.e.
    /// whether the caller won the race against a reply or a rejection.
    pub fn forget(&self) -> bool {
        self.table.forget(&self.id)
    }
}

impl<E> Drop for PendingGuard<'_, E> {
    fn drop(&mut self) {
        let _ = self.table.forget(&self.id);
    }
}
