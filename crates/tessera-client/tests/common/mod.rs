//! Scripted device/coordinator endpoint for workflow tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tessera_client::{ClientConfig, WorkflowClient, WorkflowConfig};
use tessera_transport::{BackoffConfig, ReconnectPolicy, TransportConfig};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Frames sent back for one received frame, parsed as JSON when possible.
pub type Script = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

enum Command {
    Push(String),
    Drop,
}

/// Endpoint that answers each received frame according to a script.
pub struct Endpoint {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl Endpoint {
    /// Endpoint that never answers.
    pub async fn silent() -> Self {
        Self::start(Arc::new(|_: &Value| Vec::new())).await
    }

    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (commands, mut command_rx) = mpsc::unbounded_channel::<Command>();

        let task = {
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let Ok(mut ws) = accept_async(stream).await else {
                        continue;
                    };
                    loop {
                        tokio::select! {
                            cmd = command_rx.recv() => match cmd {
                                Some(Command::Push(text)) => {
                                    let _ = ws.send(Message::text(text)).await;
                                }
                                Some(Command::Drop) => break,
                                None => return,
                            },
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let frame = serde_json::from_str(text.as_str())
                                        .unwrap_or_else(|_| Value::String(text.as_str().to_owned()));
                                    received.lock().push(frame.clone());
                                    for reply in script(&frame) {
                                        let _ = ws.send(Message::text(reply)).await;
                                    }
                                }
                                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                }
            })
        };

        Self {
            url: format!("ws://{addr}/ws"),
            received,
            commands,
            task,
        }
    }

    /// Send an unsolicited frame.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Push(text.into()));
    }

    /// Drop the current connection without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client config for `url` that never reconnects and uses short deadlines.
pub fn client_config(name: &str, url: &str) -> ClientConfig {
    let short = Duration::from_millis(500);
    ClientConfig::new(name, url)
        .with_transport(TransportConfig::new(url).with_reconnect(ReconnectPolicy {
            auto_reconnect: false,
            max_attempts: None,
            backoff: BackoffConfig::default(),
        }))
        .with_workflow(WorkflowConfig {
            manager_info_timeout: short,
            enroll_timeout: short,
            sign_timeout: short,
            check_pin_timeout: short,
            status_timeout: short,
            status_poll_interval: Duration::from_millis(50),
            wait_timeout: TIMEOUT,
        })
}

/// Connected client for `endpoint`.
pub async fn connected(name: &str, endpoint: &Endpoint) -> WorkflowClient {
    let client = WorkflowClient::new(client_config(name, &endpoint.url));
    client.connect().await.unwrap();
    client
}

/// `Method` of a flattened frame.
pub fn method_of(frame: &Value) -> Option<&str> {
    frame.get("Method").and_then(Value::as_str)
}

/// Poll `cond` until it holds or [`TIMEOUT`] elapses.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// A URL nothing listens on.
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}
