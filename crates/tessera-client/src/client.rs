//! Per-participant workflow client.
//!
//! Every operation follows the same shape: install the completion waiter,
//! send one frame, then wait for the first awaited event type under the
//! operation's own deadline. Replies are never correlated by id; the external
//! service answers with bare frames that the classifier names.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tessera_protocol::{
    ClassifiedEvent, EnrollmentCodec, EnrollmentResult, EnrollmentStatus, EventKind, ManagerInfo,
    PinSerial, WrongPin, markers, method,
};
use tessera_transport::{ConnectionState, StaticToken, Transport, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, WorkflowConfig};
use crate::error::{Result, WorkflowError};
use crate::polling::{PollCancel, PollingHandle, spawn_poller};
use crate::wait::{Completion, EventWait};

/// Outcome of [`WorkflowClient::check_pin`]. A wrong PIN is a normal branch:
/// the caller asks for the PIN again.
#[derive(Clone, Debug, PartialEq)]
pub enum PinCheck {
    /// The device accepted the PIN and reported its serial number.
    Serial(PinSerial),
    /// The device rejected the PIN.
    WrongPin(WrongPin),
}

/// Outcome of [`WorkflowClient::wait_for`].
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome {
    /// A status report satisfied the predicate.
    Status(EnrollmentStatus),
    /// Enrollment finished.
    Enrolled(EnrollmentResult),
}

/// Workflow operations over one connection.
pub struct WorkflowClient {
    link: Link,
    poller: Mutex<Option<PollingHandle>>,
    closed: Mutex<CancellationToken>,
}

/// The part of a client that status polling runs on.
#[derive(Clone)]
struct Link {
    name: Arc<str>,
    transport: Transport<EnrollmentCodec>,
    config: WorkflowConfig,
}

impl WorkflowClient {
    /// Unconnected client for one endpoint.
    pub fn new(config: ClientConfig) -> Self {
        let transport = match config.token {
            Some(token) => Transport::with_token_provider(
                EnrollmentCodec,
                config.transport,
                Arc::new(StaticToken::new(token)),
            ),
            None => Transport::new(EnrollmentCodec, config.transport),
        };
        Self::with_transport(config.name, transport, config.workflow)
    }

    /// Client over an existing transport, e.g. one with a custom token
    /// provider.
    pub fn with_transport(
        name: impl Into<String>,
        transport: Transport<EnrollmentCodec>,
        config: WorkflowConfig,
    ) -> Self {
        let name: String = name.into();
        Self {
            link: Link {
                name: name.into(),
                transport,
                config,
            },
            poller: Mutex::new(None),
            closed: Mutex::new(CancellationToken::new()),
        }
    }

    /// Participant name.
    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Underlying transport, for lifecycle listeners and raw subscriptions.
    pub fn transport(&self) -> &Transport<EnrollmentCodec> {
        &self.link.transport
    }

    /// Operation deadlines.
    pub fn config(&self) -> &WorkflowConfig {
        &self.link.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.link.transport.state()
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.link.transport.is_connected()
    }

    /// Open the connection.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut closed = self.closed.lock();
            if closed.is_cancelled() {
                *closed = CancellationToken::new();
            }
        }
        self.link.transport.connect().await?;
        info!(participant = %self.link.name, "workflow client connected");
        Ok(())
    }

    /// Stop polling and close the connection. Pending waits fail with a
    /// connection-closed error.
    pub async fn close(&self) {
        self.closed.lock().cancel();
        let _ = self.stop_status_polling();
        self.link.transport.close(None, None).await;
        info!(participant = %self.link.name, "workflow client closed");
    }

    /// Send `method` and wait for the first event dispatched under one of
    /// `kinds`.
    pub async fn send_and_wait(
        &self,
        method: &str,
        params: Option<Value>,
        kinds: &[&str],
        timeout: Duration,
    ) -> Result<Completion> {
        self.link
            .exchange(method, method, params, kinds, |_, _| true, timeout)
            .await
    }

    /// Ask the coordinator for session info.
    pub async fn request_manager_info(&self, params: Option<Value>) -> Result<ManagerInfo> {
        const OP: &str = "request_manager_info";
        let done = self
            .link
            .exchange(
                OP,
                method::INFO_ENROLLMENT,
                params,
                &[EventKind::ManagerInfo.as_str()],
                |_, e| matches!(e, ClassifiedEvent::ManagerInfo(_)),
                self.link.config.manager_info_timeout,
            )
            .await?;
        match done.event {
            ClassifiedEvent::ManagerInfo(info) => Ok(info),
            other => Err(unexpected(OP, &other)),
        }
    }

    /// Enroll this device's key share.
    pub async fn enroll(&self, params: Option<Value>) -> Result<EnrollmentResult> {
        const OP: &str = "enroll";
        let done = self
            .link
            .exchange(
                OP,
                method::ENROLLMENT,
                params,
                &[EventKind::EnrollmentResult.as_str()],
                |_, e| matches!(e, ClassifiedEvent::EnrollmentResult(_)),
                self.link.config.enroll_timeout,
            )
            .await?;
        match done.event {
            ClassifiedEvent::EnrollmentResult(result) => Ok(result),
            other => Err(unexpected(OP, &other)),
        }
    }

    /// Ask the device to sign. Completes on a sign result or either
    /// signature-success marker; [`Completion::kind`] says which.
    pub async fn sign(&self, params: Option<Value>) -> Result<Completion> {
        let sign_result = EventKind::SignResult.as_str();
        self.link
            .exchange(
                "sign",
                method::SIGN,
                params,
                &[sign_result, markers::SIGNATURE_ADDED, markers::SIGNATURE_ENDED],
                move |kind, e| kind != sign_result || matches!(e, ClassifiedEvent::SignResult(_)),
                self.link.config.sign_timeout,
            )
            .await
    }

    /// Submit a PIN to the device.
    pub async fn check_pin(&self, params: Option<Value>) -> Result<PinCheck> {
        const OP: &str = "check_pin";
        let done = self
            .link
            .exchange(
                OP,
                method::CHECK_PIN,
                params,
                &[EventKind::PinSerial.as_str(), EventKind::WrongPin.as_str()],
                |_, e| {
                    matches!(
                        e,
                        ClassifiedEvent::PinSerial(_) | ClassifiedEvent::WrongPin(_)
                    )
                },
                self.link.config.check_pin_timeout,
            )
            .await?;
        match done.event {
            ClassifiedEvent::PinSerial(serial) => Ok(PinCheck::Serial(serial)),
            ClassifiedEvent::WrongPin(wrong) => {
                info!(participant = %self.link.name, "device rejected the PIN");
                Ok(PinCheck::WrongPin(wrong))
            }
            other => Err(unexpected(OP, &other)),
        }
    }

    /// Ask the coordinator how many participants have enrolled.
    pub async fn send_status(&self, params: Option<Value>) -> Result<EnrollmentStatus> {
        self.link.send_status(params).await
    }

    /// Call [`send_status`](Self::send_status) every `interval` (default from
    /// config) while connected. Replaces any poller already running.
    pub fn start_status_polling(
        &self,
        params: Option<Value>,
        interval: Option<Duration>,
    ) -> PollCancel {
        let interval = interval.unwrap_or(self.link.config.status_poll_interval);
        let link = self.link.clone();
        let handle = spawn_poller(interval, self.link.transport.watch_state(), move || {
            let link = link.clone();
            let params = params.clone();
            async move {
                if let Err(e) = link.send_status(params).await {
                    debug!(participant = %link.name, error = %e, "status poll failed");
                }
            }
        });
        let cancel = handle.canceller();
        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.stop();
        }
        debug!(participant = %self.link.name, ?interval, "status polling started");
        cancel
    }

    /// Stop status polling. Returns whether a poller was running.
    pub fn stop_status_polling(&self) -> bool {
        let Some(handle) = self.poller.lock().take() else {
            return false;
        };
        let was_active = handle.is_active();
        handle.stop();
        debug!(participant = %self.link.name, "status polling stopped");
        was_active
    }

    /// Whether a status poller is running.
    pub fn is_polling(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(PollingHandle::is_active)
    }

    /// Resolve on the first status report that satisfies `predicate`, or on
    /// any enrollment result, whichever arrives first. Sends nothing; pair
    /// with status polling.
    ///
    /// Rides through reconnects. Fails on its deadline, when [`close`](Self::close)
    /// is called, or at once when the client is not connected at all.
    pub async fn wait_for<P>(&self, predicate: P, timeout: Option<Duration>) -> Result<WaitOutcome>
    where
        P: Fn(&EnrollmentStatus) -> bool + Send + Sync + 'static,
    {
        const OP: &str = "wait_for";
        if self.state() == ConnectionState::Disconnected {
            return Err(TransportError::NotConnected.into());
        }
        let closed = self.closed.lock().clone();
        let timeout = timeout.unwrap_or(self.link.config.wait_timeout);
        let wait = EventWait::register_filtered(
            &self.link.transport,
            &[
                EventKind::EnrollmentStatus.as_str(),
                EventKind::EnrollmentResult.as_str(),
            ],
            move |_, e| match e {
                ClassifiedEvent::EnrollmentStatus(status) => predicate(status),
                ClassifiedEvent::EnrollmentResult(_) => true,
                _ => false,
            },
        )
        .abort_on(closed);

        match wait.wait(timeout, OP).await?.event {
            ClassifiedEvent::EnrollmentStatus(status) => Ok(WaitOutcome::Status(status)),
            ClassifiedEvent::EnrollmentResult(result) => Ok(WaitOutcome::Enrolled(result)),
            other => Err(unexpected(OP, &other)),
        }
    }
}

impl Link {
    async fn exchange<F>(
        &self,
        operation: &str,
        method: &str,
        params: Option<Value>,
        kinds: &[&str],
        accept: F,
        timeout: Duration,
    ) -> Result<Completion>
    where
        F: Fn(&str, &ClassifiedEvent) -> bool + Send + Sync + 'static,
    {
        let wait = EventWait::register_filtered(&self.transport, kinds, accept)
            .abort_on_disconnect(self.transport.watch_state());
        self.transport.send(method, params)?;
        debug!(participant = %self.name, operation, method, "sent, awaiting completion");

        let outcome = wait.wait(timeout, operation).await;
        match &outcome {
            Ok(done) => debug!(participant = %self.name, operation, kind = %done.kind, "completed"),
            Err(e) => warn!(participant = %self.name, operation, error = %e, "operation failed"),
        }
        outcome
    }

    async fn send_status(&self, params: Option<Value>) -> Result<EnrollmentStatus> {
        const OP: &str = "send_status";
        let done = self
            .exchange(
                OP,
                method::INFO_ENROLLMENT,
                params,
                &[EventKind::EnrollmentStatus.as_str()],
                |_, e| matches!(e, ClassifiedEvent::EnrollmentStatus(_)),
                self.config.status_timeout,
            )
            .await?;
        match done.event {
            ClassifiedEvent::EnrollmentStatus(status) => Ok(status),
            other => Err(unexpected(OP, &other)),
        }
    }
}

fn unexpected(operation: &str, event: &ClassifiedEvent) -> WorkflowError {
    WorkflowError::UnexpectedEvent {
        operation: operation.to_owned(),
        kind: event.kind().as_str().to_owned(),
    }
}

impl Drop for WorkflowClient {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.stop();
        }
    }
}

impl std::fmt::Debug for WorkflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowClient")
            .field("name", &self.link.name)
            .field("state", &self.state())
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}
