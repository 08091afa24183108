//! Local WebSocket server for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Computes the frames sent back for one received text frame.
pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

enum Command {
    Push(String),
    Drop,
    Close(u16, String),
}

/// One-connection-at-a-time WebSocket server.
pub struct MockServer {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    uris: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Server that never answers.
    pub async fn silent() -> Self {
        Self::start(Arc::new(|_: &str| Vec::new())).await
    }

    /// Server that answers every envelope request with
    /// `{type: <type>:REPLY, replyTo: <id>, payload: {echo: <payload>}}`.
    pub async fn echo() -> Self {
        Self::start(Arc::new(|text: &str| {
            let Ok(v) = serde_json::from_str::<Value>(text) else {
                return Vec::new();
            };
            let Some(id) = v.get("id").and_then(Value::as_str) else {
                return Vec::new();
            };
            let kind = v["type"].as_str().unwrap_or_default();
            vec![
                json!({
                    "type": format!("{kind}:REPLY"),
                    "replyTo": id,
                    "payload": {"echo": v.get("payload").cloned().unwrap_or(Value::Null)},
                })
                .to_string(),
            ]
        }))
        .await
    }

    pub async fn start(responder: Responder) -> Self {
        Self::start_at("127.0.0.1:0".parse().unwrap(), responder).await
    }

    /// Server listening on a chosen address.
    pub async fn start_at(addr: SocketAddr, responder: Responder) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let uris = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (commands, mut command_rx) = mpsc::unbounded_channel::<Command>();

        let task = {
            let received = Arc::clone(&received);
            let uris = Arc::clone(&uris);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let uris = Arc::clone(&uris);
                    let record_uri =
                        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                            uris.lock().push(req.uri().to_string());
                            Ok(resp)
                        };
                    let handshake = accept_hdr_async(stream, record_uri);
                    let Ok(mut ws) = handshake.await else {
                        continue;
                    };
                    let _ = connections.fetch_add(1, Ordering::SeqCst);

                    loop {
                        tokio::select! {
                            cmd = command_rx.recv() => match cmd {
                                Some(Command::Push(text)) => {
                                    let _ = ws.send(Message::text(text)).await;
                                }
                                Some(Command::Drop) => break,
                                Some(Command::Close(code, reason)) => {
                                    let _ = ws
                                        .send(Message::Close(Some(CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: reason.into(),
                                        })))
                                        .await;
                                    break;
                                }
                                None => return,
                            },
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    received.lock().push(text.as_str().to_owned());
                                    for reply in responder(text.as_str()) {
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
            uris,
            connections,
            commands,
            task,
        }
    }

    /// Send a text frame on the current (or next) connection.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Push(text.into()));
    }

    /// Drop the current connection without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Close the current connection with a close frame.
    pub fn close_connection(&self, code: u16, reason: &str) {
        let _ = self.commands.send(Command::Close(code, reason.to_owned()));
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn received_json(&self) -> Vec<Value> {
        self.received()
            .iter()
            .filter_map(|t| serde_json::from_str(t).ok())
            .collect()
    }

    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
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

/// A local address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A URL nothing listens on.
pub async fn unused_url() -> String {
    format!("ws://{}/ws", unused_addr().await)
}
