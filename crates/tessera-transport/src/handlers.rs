//! Type-subscription and lifecycle-listener tables.
//!
//! Handlers are invoked in insertion order on a snapshot taken with the table
//! lock released, so a handler may subscribe or unsubscribe (itself included)
//! without deadlocking. A failing or panicking handler never stops delivery to
//! the rest.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::envelope::Inbound;
use crate::error::HandlerError;
use crate::state::{LifecycleEvent, LifecycleKind};

/// Handler for one inbound event type.
pub type TypeHandler<E> = dyn Fn(&Inbound<E>) -> Result<(), HandlerError> + Send + Sync;

/// Listener for lifecycle events.
pub type LifecycleListener = dyn Fn(&LifecycleEvent) + Send + Sync;

// ─── Subscription handle ─────────────────────────────────────────────────────

/// Handle returned by a subscribe call. Dropping it leaves the handler
/// installed; call [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Handle that runs `cancel` on the first `unsubscribe`.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the handler. Subsequent calls do nothing.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether `unsubscribe` has not run yet.
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Anything that can install a type-subscribed handler.
pub trait Subscribe<E>: Send + Sync {
    /// Install `handler` for frames of type `kind`.
    fn subscribe(&self, kind: &str, handler: Arc<TypeHandler<E>>) -> Subscription;
}

// ─── Generic table ───────────────────────────────────────────────────────────

struct HandlerTable<K, H: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<K, Vec<(u64, Arc<H>)>>>,
}

impl<K: Eq + Hash, H: ?Sized> HandlerTable<K, H> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn add(&self, key: K, handler: Arc<H>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().entry(key).or_default().push((id, handler));
        id
    }

    fn remove_where(&self, key: &K, pred: impl Fn(u64, &Arc<H>) -> bool) -> bool {
        let mut entries = self.entries.lock();
        let Some(list) = entries.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, h)| !pred(*id, h));
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = entries.remove(key);
        }
        removed
    }

    fn snapshot(&self, key: &K) -> Vec<Arc<H>> {
        self.entries
            .lock()
            .get(key)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    fn count(&self, key: &K) -> usize {
        self.entries.lock().get(key).map_or(0, Vec::len)
    }

    fn total(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

fn removal<K, H>(table: &Arc<HandlerTable<K, H>>, key: K, id: u64) -> Subscription
where
    K: Eq + Hash + Send + Sync + 'static,
    H: ?Sized + Send + Sync + 'static,
{
    let weak: Weak<HandlerTable<K, H>> = Arc::downgrade(table);
    Subscription::new(move || {
        if let Some(table) = weak.upgrade() {
            let _ = table.remove_where(&key, |entry, _| entry == id);
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

// ─── Type subscriptions ──────────────────────────────────────────────────────

/// Event-type → handlers mapping.
pub struct SubscriptionTable<E> {
    table: Arc<HandlerTable<String, TypeHandler<E>>>,
}

impl<E> Clone for SubscriptionTable<E> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<E: 'static> Default for SubscriptionTable<E> {
    fn default() -> Self {
        Self {
            table: Arc::new(HandlerTable::new()),
        }
    }
}

impl<E: 'static> SubscriptionTable<E> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `kind`.
    pub fn on_type(&self, kind: &str, handler: Arc<TypeHandler<E>>) -> Subscription {
        let id = self.table.add(kind.to_owned(), handler);
        removal(&self.table, kind.to_owned(), id)
    }

    /// Remove every registration of `handler` (by identity) under `kind`.
    pub fn off_type(&self, kind: &str, handler: &Arc<TypeHandler<E>>) -> bool {
        self.table
            .remove_where(&kind.to_owned(), |_, h| Arc::ptr_eq(h, handler))
    }

    /// Handlers installed for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.table.count(&kind.to_owned())
    }

    /// Handlers installed across all types.
    pub fn total_handlers(&self) -> usize {
        self.table.total()
    }

    /// Invoke every handler for `inbound.kind`. Returns the failures, panics
    /// included, in invocation order.
    pub fn dispatch(&self, inbound: &Inbound<E>) -> Vec<HandlerError> {
        let handlers = self.table.snapshot(&inbound.kind);
        let mut failures = Vec::new();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(inbound))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(kind = %inbound.kind, error = %err, "event handler failed");
                    failures.push(err);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(kind = %inbound.kind, panic = %message, "event handler panicked");
                    failures.push(HandlerError::new(message));
                }
            }
        }
        failures
    }
}

impl<E: Send + Sync + 'static> Subscribe<E> for SubscriptionTable<E> {
    fn subscribe(&self, kind: &str, handler: Arc<TypeHandler<E>>) -> Subscription {
        self.on_type(kind, handler)
    }
}

// ─── Lifecycle listeners ─────────────────────────────────────────────────────

/// Lifecycle-event → listeners mapping.
#[derive(Clone)]
pub struct ListenerTable {
    table: Arc<HandlerTable<LifecycleKind, LifecycleListener>>,
}

impl Default for ListenerTable {
    fn default() -> Self {
        Self {
            table: Arc::new(HandlerTable::new()),
        }
    }
}

impl ListenerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `listener` for `kind`.
    pub fn on(&self, kind: LifecycleKind, listener: Arc<LifecycleListener>) -> Subscription {
        let id = self.table.add(kind, listener);
        removal(&self.table, kind, id)
    }

    /// Remove `listener` (by identity) from `kind`.
    pub fn off(&self, kind: LifecycleKind, listener: &Arc<LifecycleListener>) -> bool {
        self.table.remove_where(&kind, |_, l| Arc::ptr_eq(l, listener))
    }

    /// Listeners installed for `kind`.
    pub fn listener_count(&self, kind: LifecycleKind) -> usize {
        self.table.count(&kind)
    }

    /// Deliver `event` to its listeners. Panics are logged and swallowed.
    pub fn emit(&self, event: &LifecycleEvent) {
        for listener in self.table.snapshot(&event.kind()) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                warn!(
                    event = event.kind().as_str(),
                    panic = %panic_message(panic.as_ref()),
                    "lifecycle listener panicked"
                );
            }
        }
    }
}
