//! Reconnecting WebSocket transport.
//!
//! One background task owns the socket. It writes queued outbound frames,
//! sends heartbeat pings, decodes inbound frames, settles pending requests and
//! fans events out to type-subscribed handlers. When the socket ends it
//! rejects every pending request, then waits out the backoff delay and dials
//! again until the reconnect policy says stop or `close()` is called.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tessera_core::{ConnectionId, RequestIdGenerator};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;
use crate::config::{TokenProvider, TransportConfig, redact_url, resolve_url};
use crate::envelope::{Envelope, Inbound, PING_TYPE};
use crate::error::TransportError;
use crate::handlers::{
    LifecycleListener, ListenerTable, Subscribe, Subscription, SubscriptionTable, TypeHandler,
};
use crate::pending::PendingTable;
use crate::state::{ConnectionState, LifecycleEvent, LifecycleKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;
/// Inconsistent data (used when a frame fails to decode in strict mode).
const CLOSE_INVALID_DATA: u16 = 1007;

/// Handle to one logical connection. Clones share the socket, the pending
/// table and the subscription tables.
pub struct Transport<C: Codec> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for Transport<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: Codec> {
    codec: C,
    config: TransportConfig,
    conn_id: ConnectionId,
    ids: RequestIdGenerator,
    token_provider: Option<Arc<dyn TokenProvider>>,
    pending: PendingTable<C::Event>,
    subscriptions: SubscriptionTable<C::Event>,
    listeners: ListenerTable,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    user_closed: AtomicBool,
    attempts: AtomicU32,
    shutdown: Mutex<CancellationToken>,
    close_frame: Mutex<Option<CloseFrame>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl<C: Codec> Transport<C> {
    /// Unconnected transport. Call [`connect`](Self::connect) to open it.
    pub fn new(codec: C, config: TransportConfig) -> Self {
        Self::build(codec, config, None)
    }

    /// Unconnected transport whose URL gets a token from `provider` on every
    /// connect.
    pub fn with_token_provider(
        codec: C,
        config: TransportConfig,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::build(codec, config, Some(provider))
    }

    fn build(codec: C, config: TransportConfig, token_provider: Option<Arc<dyn TokenProvider>>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                codec,
                config,
                conn_id: ConnectionId::new(),
                ids: RequestIdGenerator::new(),
                token_provider,
                pending: PendingTable::new(),
                subscriptions: SubscriptionTable::new(),
                listeners: ListenerTable::new(),
                state_tx,
                outbound: Mutex::new(None),
                user_closed: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                shutdown: Mutex::new(CancellationToken::new()),
                close_frame: Mutex::new(None),
                supervisor: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    /// Id recorded as `conn_id` on this transport's log events.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.inner.conn_id
    }

    /// Configuration this transport was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Handlers currently subscribed to `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.inner.subscriptions.handler_count(kind)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Open the socket.
    ///
    /// Resolves once the handshake completes and fails if it does not. When
    /// the reconnect policy allows it, a first dial that could not reach the
    /// peer still hands over to the backoff loop, so the connection comes up
    /// once the peer does.
    /// No-op while a connection is already open or being re-established;
    /// overlapping calls wait for the dial in progress.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        let _dialing = inner.connecting.lock().await;
        if inner.supervising() {
            return Ok(());
        }

        inner.user_closed.store(false, Ordering::SeqCst);
        inner.attempts.store(0, Ordering::SeqCst);
        let shutdown = CancellationToken::new();
        *inner.shutdown.lock() = shutdown.clone();
        *inner.close_frame.lock() = None;

        let ws = match inner.open().await {
            Ok(ws) => ws,
            Err(err) => {
                inner.set_state(ConnectionState::Disconnected);
                inner.emit(&LifecycleEvent::Error(err.clone()));
                // A bad URL or token will not fix itself; only dial failures retry.
                if err.is_connection_loss() && inner.config.reconnect.allows(0) {
                    let _ = inner.spawn_supervisor(None, shutdown);
                }
                return Err(err);
            }
        };

        let outbound = inner.on_open();
        if inner.spawn_supervisor(Some((ws, outbound)), shutdown) {
            Ok(())
        } else {
            inner.on_close(None, "closed while connecting".to_owned());
            Err(TransportError::closed("closed while connecting"))
        }
    }

    /// Close the socket and stop reconnecting. Idempotent.
    ///
    /// When this returns, every pending request has been rejected and the
    /// state is `Disconnected`.
    pub async fn close(&self, code: Option<u16>, reason: Option<&str>) {
        let inner = &self.inner;
        let (task, shutdown) = {
            let mut supervisor = inner.supervisor.lock();
            inner.user_closed.store(true, Ordering::SeqCst);
            (supervisor.take(), inner.shutdown.lock().clone())
        };
        let Some(task) = task else {
            return;
        };

        inner.set_state(ConnectionState::Closing);
        *inner.close_frame.lock() = Some(CloseFrame {
            code: CloseCode::from(code.unwrap_or(CLOSE_NORMAL)),
            reason: reason.unwrap_or_default().to_owned().into(),
        });
        shutdown.cancel();

        if let Err(err) = task.await {
            warn!(conn_id = %inner.conn_id, error = %err, "connection task ended abnormally");
        }
        // The task may have been between sockets with nothing left to reject.
        let _ = inner.pending.reject_all(&TransportError::closed("closed by client"));
        inner.set_state(ConnectionState::Disconnected);
    }

    // ─── Messaging ───────────────────────────────────────────────────────

    /// Fire-and-forget message.
    pub fn send(&self, kind: &str, payload: Option<Value>) -> Result<(), TransportError> {
        let text = self.inner.codec.encode(&Envelope::event(kind, payload))?;
        self.inner.write(text)
    }

    /// Request with the configured default deadline.
    pub async fn request(&self, kind: &str, payload: Option<Value>) -> Result<C::Event, TransportError> {
        self.request_with_timeout(kind, payload, self.inner.config.request_timeout)
            .await
    }

    /// Send a request envelope and wait for the reply whose `replyTo` matches
    /// its id.
    ///
    /// Fails with `Protocol` when the reply carries an error, `Timeout` when no
    /// reply arrives in time, and `ConnectionClosed` when the socket goes away
    /// first. Dropping the future removes the pending entry.
    pub async fn request_with_timeout(
        &self,
        kind: &str,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<C::Event, TransportError> {
        let inner = &self.inner;
        let id = inner.ids.next_id();
        let text = inner
            .codec
            .encode(&Envelope::request(kind, id.clone(), payload))?;

        let (guard, mut rx) = inner.pending.register_guarded(&id);
        inner.write(text)?;
        debug!(conn_id = %inner.conn_id, kind, id = %id, "request sent");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::closed("request abandoned")),
            Err(_) => {
                if guard.forget() {
                    debug!(conn_id = %inner.conn_id, kind, id = %id, "request timed out");
                    Err(TransportError::Timeout {
                        timeout_ms: duration_ms(timeout),
                        context: format!("request {kind}"),
                    })
                } else {
                    // A reply or rejection removed the entry first; it wins.
                    rx.try_recv()
                        .unwrap_or_else(|_| Err(TransportError::closed("request abandoned")))
                }
            }
        }
    }

    // ─── Subscriptions ───────────────────────────────────────────────────

    /// Subscribe `handler` to inbound frames of type `kind`.
    pub fn on_type(&self, kind: &str, handler: Arc<TypeHandler<C::Event>>) -> Subscription {
        self.inner.subscriptions.on_type(kind, handler)
    }

    /// Remove `handler` (by identity) from `kind`.
    pub fn off_type(&self, kind: &str, handler: &Arc<TypeHandler<C::Event>>) -> bool {
        self.inner.subscriptions.off_type(kind, handler)
    }

    /// Subscribe to a lifecycle event.
    pub fn on(&self, kind: LifecycleKind, listener: Arc<LifecycleListener>) -> Subscription {
        self.inner.listeners.on(kind, listener)
    }

    /// Remove a lifecycle listener (by identity).
    pub fn off(&self, kind: LifecycleKind, listener: &Arc<LifecycleListener>) -> bool {
        self.inner.listeners.off(kind, listener)
    }
}

impl<C: Codec> Subscribe<C::Event> for Transport<C> {
    fn subscribe(&self, kind: &str, handler: Arc<TypeHandler<C::Event>>) -> Subscription {
        self.on_type(kind, handler)
    }
}

impl<C: Codec> std::fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("conn_id", &self.inner.conn_id)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ─── Connection task ─────────────────────────────────────────────────────────

type Session = (WsStream, mpsc::UnboundedReceiver<Message>);

/// Own the connection until shutdown or the reconnect policy gives up.
/// Without an open `session` it starts in the backoff loop.
async fn supervise<C: Codec>(
    inner: Arc<Inner<C>>,
    mut session: Option<Session>,
    shutdown: CancellationToken,
) {
    if session.is_none() {
        session = inner.reconnect(&shutdown).await;
    }
    while let Some((ws, outbound)) = session.take() {
        let (code, reason) = inner.pump(ws, outbound, &shutdown).await;
        inner.on_close(code, reason);
        session = inner.reconnect(&shutdown).await;
    }
    inner.set_state(ConnectionState::Disconnected);
}

impl<C: Codec> Inner<C> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(conn_id = %self.conn_id, from = %previous, to = %state, "state change");
        }
    }

    fn emit(&self, event: &LifecycleEvent) {
        self.listeners.emit(event);
    }

    fn supervising(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the connection task unless `close()` got in first. The check and
    /// the store share the lock `close()` takes, so no task outlives it.
    fn spawn_supervisor(
        self: &Arc<Self>,
        session: Option<Session>,
        shutdown: CancellationToken,
    ) -> bool {
        let mut supervisor = self.supervisor.lock();
        if self.user_closed.load(Ordering::SeqCst) {
            return false;
        }
        *supervisor = Some(tokio::spawn(supervise(Arc::clone(self), session, shutdown)));
        true
    }

    async fn open(&self) -> Result<WsStream, TransportError> {
        self.set_state(ConnectionState::Connecting);
        let token = match &self.token_provider {
            Some(provider) => provider.token().await?,
            None => None,
        };
        let url = resolve_url(
            &self.config.url,
            &self.config.token_query_param,
            token.as_deref(),
        )?;
        let shown = redact_url(&url, &self.config.token_query_param);
        debug!(conn_id = %self.conn_id, url = %shown, "connecting");

        let (ws, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    url: shown,
                    reason: e.to_string(),
                })?;
        Ok(ws)
    }

    fn on_open(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx);
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!(conn_id = %self.conn_id, url = %self.config.url, "connected");
        self.emit(&LifecycleEvent::Connected);
        rx
    }

    fn on_close(&self, code: Option<u16>, reason: String) {
        let _ = self.outbound.lock().take();
        let rejected = self
            .pending
            .reject_all(&TransportError::closed(reason.clone()));
        self.set_state(ConnectionState::Disconnected);
        if self.user_closed.load(Ordering::SeqCst) {
            info!(conn_id = %self.conn_id, code, reason = %reason, rejected, "disconnected");
        } else {
            warn!(conn_id = %self.conn_id, code, reason = %reason, rejected, "connection lost");
        }
        self.emit(&LifecycleEvent::Disconnected { code, reason });
    }

    /// Dial until a socket opens, the policy gives up, or shutdown fires.
    async fn reconnect(&self, shutdown: &CancellationToken) -> Option<Session> {
        loop {
            if self.user_closed.load(Ordering::SeqCst) || shutdown.is_cancelled() {
                return None;
            }
            let policy = &self.config.reconnect;
            let attempt = self.attempts.load(Ordering::SeqCst);
            if !policy.allows(attempt) {
                if policy.auto_reconnect {
                    error!(conn_id = %self.conn_id, attempts = attempt, "reconnect attempts exhausted");
                }
                return None;
            }

            let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = policy.backoff.delay(attempt);
            self.set_state(ConnectionState::Reconnecting);
            info!(
                conn_id = %self.conn_id,
                attempt,
                delay_ms = duration_ms(delay),
                "reconnecting"
            );
            self.emit(&LifecycleEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                () = shutdown.cancelled() => return None,
                opened = self.open() => opened,
            };
            match opened {
                Ok(ws) => return Some((ws, self.on_open())),
                Err(err) => {
                    warn!(conn_id = %self.conn_id, attempt, error = %err, "reconnect failed");
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(&LifecycleEvent::Error(err));
                }
            }
        }
    }

    /// Drive one socket until it ends. Returns the close code and reason.
    async fn pump(
        &self,
        ws: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        shutdown: &CancellationToken,
    ) -> (Option<u16>, String) {
        let (mut sink, mut stream) = ws.split();
        let mut heartbeat = self.config.heartbeat.enabled_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let frame = self.close_frame.lock().take();
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by client".to_owned());
                    let _ = sink.send(Message::Close(frame)).await;
                    return (code, reason);
                }
                msg = outbound.recv() => {
                    let Some(msg) = msg else {
                        return (None, "outbound channel closed".to_owned());
                    };
                    if let Err(err) = sink.send(msg).await {
                        return (None, format!("write failed: {err}"));
                    }
                }
                () = next_tick(&mut heartbeat) => {
                    match self.codec.encode(&Envelope::event(PING_TYPE, None)) {
                        Ok(text) => {
                            if let Err(err) = sink.send(Message::text(text)).await {
                                return (None, format!("heartbeat failed: {err}"));
                            }
                        }
                        Err(err) => warn!(conn_id = %self.conn_id, error = %err, "heartbeat encode failed"),
                    }
                }
                frame = stream.next() => {
                    let result = match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.handle_frame(text),
                            Err(err) => self.decode_failure(TransportError::Decode(format!(
                                "binary frame is not UTF-8: {err}"
                            ))),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let reason = frame
                                .map(|f| f.reason.as_str().to_owned())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by peer".to_owned());
                            return (code, reason);
                        }
                        Some(Ok(_)) => Ok(()),
                        Some(Err(err)) => return (None, err.to_string()),
                        None => return (None, "connection ended".to_owned()),
                    };
                    if let Err(err) = result {
                        let reason = err.to_string();
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(CLOSE_INVALID_DATA),
                                reason: reason.clone().into(),
                            })))
                            .await;
                        return (Some(CLOSE_INVALID_DATA), reason);
                    }
                }
            }
        }
    }

    /// Route one inbound text frame. An error means the socket must close.
    fn handle_frame(&self, text: &str) -> Result<(), TransportError> {
        let inbound = match self.codec.decode(text) {
            Ok(inbound) => inbound,
            Err(err) => return self.decode_failure(err.into()),
        };
        debug!(conn_id = %self.conn_id, kind = %inbound.kind, "frame received");

        let correlated = inbound
            .reply_to
            .clone()
            .filter(|id| self.pending.contains(id));
        if let Some(reply_to) = correlated {
            let outcome = match inbound.error {
                Some(body) => Err(TransportError::from(body)),
                None => Ok(inbound.body),
            };
            let _ = self.pending.settle(&reply_to, outcome);
            return Ok(());
        }

        self.dispatch(&inbound);
        Ok(())
    }

    fn dispatch(&self, inbound: &Inbound<C::Event>) {
        let failures = self.subscriptions.dispatch(inbound);
        if !inbound.expects_reply() {
            return;
        }
        let (Some(id), Some(failure)) = (inbound.id.as_deref(), failures.first()) else {
            return;
        };
        let reply = Envelope::error_reply(&inbound.kind, id, failure.to_error_body());
        let sent = self
            .codec
            .encode(&reply)
            .map_err(TransportError::from)
            .and_then(|text| self.write(text));
        if let Err(err) = sent {
            warn!(conn_id = %self.conn_id, id, error = %err, "failed to send error reply");
        }
    }

    fn decode_failure(&self, err: TransportError) -> Result<(), TransportError> {
        if self.config.tolerant_decode {
            warn!(conn_id = %self.conn_id, error = %err, "dropping malformed frame");
            self.emit(&LifecycleEvent::Error(err));
            Ok(())
        } else {
            Err(err)
        }
    }

    fn write(&self, text: String) -> Result<(), TransportError> {
        if *self.state_tx.borrow() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(Message::text(text))
            .map_err(|_| TransportError::NotConnected)
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
