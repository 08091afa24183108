//! Fixed-interval status polling.

use std::future::Future;
use std::time::Duration;

use tessera_transport::ConnectionState;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cancels a running poller. Cheap to clone.
#[derive(Clone, Debug)]
pub struct PollCancel(CancellationToken);

impl PollCancel {
    /// Stop the poller. Idempotent.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Whether the poller has been stopped.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Owns a running poller. Dropping the handle stops it.
#[derive(Debug)]
pub struct PollingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// A cancel function for this poller.
    pub fn canceller(&self) -> PollCancel {
        PollCancel(self.cancel.clone())
    }

    /// Stop the poller and every call it still has in flight.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the poller is still running.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `tick` every `interval`, first after one full interval, skipping ticks
/// while `state` is not `Connected`.
///
/// Calls started by earlier ticks keep running while later ticks fire. On
/// stop, the calls still in flight are aborted.
pub fn spawn_poller<F, Fut>(
    interval: Duration,
    mut state: watch::Receiver<ConnectionState>,
    tick: F,
) -> PollingHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if *state.borrow_and_update() == ConnectionState::Connected {
                        let _ = in_flight.spawn(tick());
                    } else {
                        debug!("not connected, skipping poll");
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "poll call panicked");
                        }
                    }
                }
            }
        }

        in_flight.abort_all();
        debug!(aborted = in_flight.len(), "poller stopped");
    });

    PollingHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_full_interval() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = spawn_poller(Duration::from_millis(5_000), state_rx, counting(&counter));

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_after_stop() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = spawn_poller(Duration::from_millis(5_000), state_rx, counting(&counter));
        let cancel = handle.canceller();

        tokio::time::sleep(Duration::from_millis(7_500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert!(cancel.is_cancelled());
        tokio::time::sleep(Duration::from_millis(60_000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn skips_ticks_while_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Reconnecting);
        let counter = Arc::new(AtomicUsize::new(0));
        let _handle = spawn_poller(Duration::from_millis(1_000), state_rx, counting(&counter));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let _ = state_tx.send_replace(ConnectionState::Connected);
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_calls_in_flight() {
        struct Flag(Arc<AtomicUsize>);
        impl Drop for Flag {
            fn drop(&mut self) {
                let _ = self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let dropped = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&dropped);
        let handle = spawn_poller(Duration::from_millis(1_000), state_rx, move || {
            let flag = Flag(Arc::clone(&d));
            async move {
                let _flag = flag;
                std::future::pending::<()>().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
