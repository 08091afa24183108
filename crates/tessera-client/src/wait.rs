//! First-event-wins wait across several event types.
//!
//! An [`EventWait`] subscribes one handler per awaited type. All handlers
//! share a single result slot: whichever fires first takes it, delivers the
//! event and unsubscribes every handler. The deadline lives inside
//! [`EventWait::wait`], so the timer ends with the wait on every path.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tessera_protocol::ClassifiedEvent;
use tessera_transport::{
    ConnectionState, HandlerError, Inbound, Subscribe, Subscription, TransportError, TypeHandler,
};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WorkflowError};

/// The event that completed a wait.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    /// Dispatch type the event arrived under.
    pub kind: String,
    /// Classified event.
    pub event: ClassifiedEvent,
}

type Slot = Arc<Mutex<Option<oneshot::Sender<Completion>>>>;
type Subscriptions = Arc<Mutex<Vec<Subscription>>>;

/// Pending wait for the first of several event types.
///
/// Handlers are installed by [`register`](Self::register), before anything is
/// sent, so a reply that arrives immediately is not missed. Dropping the wait
/// removes every handler that is still installed.
pub struct EventWait {
    rx: oneshot::Receiver<Completion>,
    subscriptions: Subscriptions,
    state: Option<watch::Receiver<ConnectionState>>,
    cancel: Option<CancellationToken>,
}

impl EventWait {
    /// Wait for any event dispatched under one of `kinds`.
    pub fn register<S>(source: &S, kinds: &[&str]) -> Self
    where
        S: Subscribe<ClassifiedEvent> + ?Sized,
    {
        Self::register_filtered(source, kinds, |_, _| true)
    }

    /// Wait for the first event under one of `kinds` that `accept` admits.
    /// Rejected events leave the wait untouched.
    pub fn register_filtered<S, F>(source: &S, kinds: &[&str], accept: F) -> Self
    where
        S: Subscribe<ClassifiedEvent> + ?Sized,
        F: Fn(&str, &ClassifiedEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        let subscriptions: Subscriptions = Arc::new(Mutex::new(Vec::with_capacity(kinds.len())));
        let accept = Arc::new(accept);

        for kind in kinds {
            let handler = settle_handler(
                Arc::clone(&slot),
                Arc::downgrade(&subscriptions),
                Arc::clone(&accept),
            );
            let subscription = source.subscribe(kind, handler);
            subscriptions.lock().push(subscription);
        }

        // A handler that fired mid-registration could not see the later
        // subscriptions.
        if slot.lock().is_none() {
            release(&subscriptions);
        }

        Self {
            rx,
            subscriptions,
            state: None,
            cancel: None,
        }
    }

    /// Also fail the wait as soon as `state` leaves `Connected`.
    #[must_use]
    pub fn abort_on_disconnect(mut self, state: watch::Receiver<ConnectionState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Fail the wait when `token` is cancelled. Unlike
    /// [`abort_on_disconnect`](Self::abort_on_disconnect) this survives
    /// reconnects.
    #[must_use]
    pub fn abort_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Number of handlers still installed.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.is_active())
            .count()
    }

    /// Resolve with the first matching event, or fail once `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration, operation: &str) -> Result<Completion> {
        let disconnected = disconnected(self.state.take());
        let cancel = self.cancel.take();
        tokio::select! {
            biased;
            done = &mut self.rx => done.map_err(|_| {
                TransportError::ConnectionClosed {
                    reason: format!("event source dropped during {operation}"),
                }
                .into()
            }),
            () = disconnected => Err(TransportError::ConnectionClosed {
                reason: format!("connection lost during {operation}"),
            }
            .into()),
            () = cancelled(cancel) => Err(TransportError::ConnectionClosed {
                reason: format!("closed during {operation}"),
            }
            .into()),
            () = tokio::time::sleep(timeout) => Err(WorkflowError::Timeout {
                operation: operation.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Drop for EventWait {
    fn drop(&mut self) {
        release(&self.subscriptions);
    }
}

impl std::fmt::Debug for EventWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWait")
            .field("active_subscriptions", &self.active_subscriptions())
            .finish_non_exhaustive()
    }
}

fn settle_handler<F>(
    slot: Slot,
    subscriptions: Weak<Mutex<Vec<Subscription>>>,
    accept: Arc<F>,
) -> Arc<TypeHandler<ClassifiedEvent>>
where
    F: Fn(&str, &ClassifiedEvent) -> bool + Send + Sync + 'static,
{
    Arc::new(
        move |inbound: &Inbound<ClassifiedEvent>| -> std::result::Result<(), HandlerError> {
            if !accept(&inbound.kind, &inbound.body) {
                return Ok(());
            }
            let Some(tx) = slot.lock().take() else {
                return Ok(());
            };
            let _ = tx.send(Completion {
                kind: inbound.kind.clone(),
                event: inbound.body.clone(),
            });
            if let Some(subscriptions) = subscriptions.upgrade() {
                release(&subscriptions);
            }
            Ok(())
        },
    )
}

fn release(subscriptions: &Mutex<Vec<Subscription>>) {
    let taken = std::mem::take(&mut *subscriptions.lock());
    for subscription in taken {
        subscription.unsubscribe();
    }
}

async fn disconnected(state: Option<watch::Receiver<ConnectionState>>) {
    match state {
        Some(mut rx) => {
            let _ = rx.wait_for(|s| *s != ConnectionState::Connected).await;
        }
        None => std::future::pending().await,
    }
}

async fn cancelled(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use tessera_protocol::{EventKind, classify, classify_text, markers};
    use tessera_transport::SubscriptionTable;

    use super::*;

    fn deliver(table: &SubscriptionTable<ClassifiedEvent>, event: ClassifiedEvent) {
        let kind = event.kind().as_str().to_owned();
        let failures = table.dispatch(&Inbound::event(kind, event));
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn first_event_wins_and_releases_everything() {
        let table = SubscriptionTable::new();
        let wait = EventWait::register(&table, &["PinSerial", "WrongPin"]);
        assert_eq!(table.total_handlers(), 2);
        assert_eq!(wait.active_subscriptions(), 2);

        deliver(&table, classify_text(markers::WRONG_PIN));
        assert_eq!(table.total_handlers(), 0);

        let done = wait.wait(Duration::from_secs(1), "check_pin").await.unwrap();
        assert_eq!(done.kind, "WrongPin");
        assert_eq!(done.event.kind(), EventKind::WrongPin);
    }

    #[tokio::test]
    async fn back_to_back_events_settle_once() {
        let table = SubscriptionTable::new();
        let wait = EventWait::register(&table, &["EnrollmentStatus"]);

        deliver(&table, classify(json!({"ParticipantsEnrolled": 2})));
        deliver(&table, classify(json!({"ParticipantsEnrolled": 3})));

        let done = wait.wait(Duration::from_secs(1), "wait_for").await.unwrap();
        assert_eq!(done.event.participants_enrolled(), Some(2));
    }

    #[tokio::test]
    async fn rejected_events_keep_waiting() {
        let table = SubscriptionTable::new();
        let wait = EventWait::register_filtered(&table, &["EnrollmentStatus"], |_, e| {
            e.participants_enrolled() >= Some(3)
        });

        deliver(&table, classify(json!({"ParticipantsEnrolled": 1})));
        assert_eq!(table.total_handlers(), 1);
        deliver(&table, classify(json!({"ParticipantsEnrolled": 3})));
        assert_eq!(table.total_handlers(), 0);

        let done = wait.wait(Duration::from_secs(1), "wait_for").await.unwrap();
        assert_eq!(done.event.participants_enrolled(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_handlers() {
        let table = SubscriptionTable::new();
        let wait = EventWait::register(&table, &["SignResult", markers::SIGNATURE_ADDED]);

        let err = wait.wait(Duration::from_secs(300), "sign").await.unwrap_err();
        assert_matches!(
            err,
            WorkflowError::Timeout { ref operation, timeout_ms: 300_000 } if operation == "sign"
        );
        assert_eq!(table.total_handlers(), 0);
    }

    #[tokio::test]
    async fn dropping_the_wait_releases_handlers() {
        let table = SubscriptionTable::new();
        let wait = EventWait::register(&table, &["ManagerInfo"]);
        assert_eq!(table.handler_count("ManagerInfo"), 1);
        drop(wait);
        assert_eq!(table.handler_count("ManagerInfo"), 0);
    }

    #[tokio::test]
    async fn disconnect_fails_the_wait() {
        let table = SubscriptionTable::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let wait = EventWait::register(&table, &["EnrollmentResult"]).abort_on_disconnect(state_rx);

        let pending = tokio::spawn(wait.wait(Duration::from_secs(200), "enroll"));
        tokio::task::yield_now().await;
        let _ = state_tx.send_replace(ConnectionState::Disconnected);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_connection_loss());
        assert_eq!(table.total_handlers(), 0);
    }

    #[tokio::test]
    async fn cancel_token_fails_the_wait() {
        let table = SubscriptionTable::new();
        let token = CancellationToken::new();
        let wait = EventWait::register(&table, &["EnrollmentStatus"]).abort_on(token.clone());

        let pending = tokio::spawn(wait.wait(Duration::from_secs(200), "wait_for"));
        tokio::task::yield_now().await;
        token.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_connection_loss());
        assert!(err.to_string().contains("closed during wait_for"), "{err}");
        assert_eq!(table.total_handlers(), 0);
    }

    #[tokio::test]
    async fn event_before_disconnect_still_wins() {
        let table = SubscriptionTable::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let wait = EventWait::register(&table, &["EnrollmentResult"]).abort_on_disconnect(state_rx);

        deliver(&table, classify_text(markers::SUCCESS_ENROLL));
        let _ = state_tx.send_replace(ConnectionState::Disconnected);

        let done = wait.wait(Duration::from_secs(1), "enroll").await.unwrap();
        assert_eq!(done.event.message(), Some("SUCCESS.ENROLL"));
    }
}
