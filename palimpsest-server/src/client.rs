//! WebSocket client for the version server.
//!
//! One writer task forwards encoded requests to the socket; one reader task
//! routes each response to the caller waiting on its `request_id`.
//!
//! Reference: Kleppmann, DDIA Chapter 4 (Dataflow Through Services)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::history::{VersionContent, VersionInfo};
use crate::key::FileKey;
use crate::protocol::{ProtocolError, Request, RequestBody, Response, ResponseBody};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// The version client.
pub struct VersionClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    next_id: AtomicU64,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    /// Callers waiting for a response, by request id
    pending: Pending,
    request_timeout: Duration,
}

impl VersionClient {
    /// Create a client for `server_url` (e.g. `ws://127.0.0.1:9090`).
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            next_id: AtomicU64::new(1),
            outgoing_tx: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Fail requests that get no answer within `timeout` (default: 30s).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect to the server and start the reader/writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionFailed(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing_tx = Some(out_tx);

        // Reader task: route responses to waiting callers
        let pending = self.pending.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match Response::decode(&data) {
                        Ok(response) => {
                            let waiter = pending.lock().await.remove(&response.request_id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => log::warn!(
                                    "Response for unknown request {}",
                                    response.request_id
                                ),
                            }
                        }
                        Err(e) => log::warn!("Failed to decode response: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            // Dropping the senders wakes every waiter with ConnectionClosed
            pending.lock().await.clear();
            log::info!("Disconnected from version server");
        });

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.server_url);
        Ok(())
    }

    /// Close the connection. Pending requests fail with `ConnectionClosed`.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Send `body` and wait for the matching response.
    pub async fn request(&self, body: RequestBody) -> Result<ResponseBody, ProtocolError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let encoded = Request::new(request_id, body).encode()?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, resp_tx);

        if tx.send(encoded).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(ProtocolError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, resp_rx).await {
            Ok(Ok(response)) => match response.body {
                ResponseBody::Error { code, message } => Err(ProtocolError::Remote { code, message }),
                body => Ok(body),
            },
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ProtocolError::Timeout)
            }
        }
    }

    pub async fn create_version(
        &self,
        key: FileKey,
        author: &str,
        content: &str,
    ) -> Result<VersionInfo, ProtocolError> {
        let body = RequestBody::CreateVersion {
            key,
            author: author.to_string(),
            content: content.to_string(),
        };
        match self.request(body).await? {
            ResponseBody::Created(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// `version: None` reads the latest version.
    pub async fn get_version(
        &self,
        key: FileKey,
        version: Option<u64>,
    ) -> Result<VersionContent, ProtocolError> {
        match self.request(RequestBody::GetVersion { key, version }).await? {
            ResponseBody::Version(content) => Ok(content),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_versions(&self, key: FileKey) -> Result<Vec<VersionInfo>, ProtocolError> {
        match self.request(RequestBody::ListVersions { key }).await? {
            ResponseBody::Versions(versions) => Ok(versions),
            other => Err(unexpected(other)),
        }
    }

    pub async fn remove_edit(
        &self,
        key: FileKey,
        version: u64,
        author: &str,
    ) -> Result<VersionInfo, ProtocolError> {
        let body = RequestBody::RemoveEdit {
            key,
            version,
            author: author.to_string(),
        };
        match self.request(body).await? {
            ResponseBody::Removed(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Round-trip time of a Ping.
    pub async fn ping(&self) -> Result<Duration, ProtocolError> {
        let start = std::time::Instant::now();
        match self.request(RequestBody::Ping).await? {
            ResponseBody::Pong => Ok(start.elapsed()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(body: ResponseBody) -> ProtocolError {
    ProtocolError::UnexpectedResponse(format!("{body:?}"))
}
