//! WebSocket front end for the version service.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── task: dispatch(request) ──┐
//!             ├── connection loop ────┼── task: dispatch(request) ──┼──► responses (mpsc)
//! Client B ──┘   (decode frames)      └── task: dispatch(request) ──┘         │
//!                                                │                            ▼
//!                                          VersionService ──► Mediator ──► BlobStore
//! ```
//!
//! Each request runs on its own task, so a slow write on one file does not
//! hold up reads of another file on the same connection.
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 4 (dataflow through services)

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::history::HistoryConfig;
use crate::mediator::{MediatorConfig, VersionedFileMediator};
use crate::protocol::{ErrorCode, Request, RequestBody, Response, ResponseBody};
use crate::service::VersionService;
use crate::storage::BlobStore;

/// Responses buffered per connection before request tasks wait.
const RESPONSE_BUFFER: usize = 256;

/// Where blobs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process map; lost on exit
    Memory,
    /// RocksDB directory
    Rocks(PathBuf),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    pub storage: StorageBackend,
    pub mediator: MediatorConfig,
    pub history: HistoryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage: StorageBackend::Memory,
            mediator: MediatorConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl ServerConfig {
    /// Ephemeral port, in-memory storage, short lock timeout.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            storage: StorageBackend::Memory,
            mediator: MediatorConfig::for_testing(),
            history: HistoryConfig::for_testing(),
        }
    }

    /// Defaults overridden by `PALIMPSEST_*` environment variables.
    ///
    /// - `PALIMPSEST_BIND`: listen address
    /// - `PALIMPSEST_STORAGE`: `memory` or a RocksDB directory
    /// - `PALIMPSEST_LOCK_TIMEOUT_MS`: file lock wait limit, `0` = wait forever
    /// - `PALIMPSEST_COMPACTION_THRESHOLD`: history entries before compaction
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bind) = lookup("PALIMPSEST_BIND") {
            config.bind_addr = bind;
        }

        if let Some(storage) = lookup("PALIMPSEST_STORAGE") {
            config.storage = match storage.as_str() {
                "" => {
                    return Err(ConfigError {
                        var: "PALIMPSEST_STORAGE",
                        value: storage,
                        reason: "expected `memory` or a directory".into(),
                    })
                }
                "memory" => StorageBackend::Memory,
                path => StorageBackend::Rocks(PathBuf::from(path)),
            };
        }

        if let Some(ms) = lookup("PALIMPSEST_LOCK_TIMEOUT_MS") {
            let ms: u64 = parse_var("PALIMPSEST_LOCK_TIMEOUT_MS", &ms)?;
            config.mediator.lock_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(threshold) = lookup("PALIMPSEST_COMPACTION_THRESHOLD") {
            let threshold: usize = parse_var("PALIMPSEST_COMPACTION_THRESHOLD", &threshold)?;
            config.history.compaction_threshold = threshold;
            config.history.retained_entries = config.history.retained_entries.min(threshold);
        }

        Ok(config)
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_bytes: u64,
}

/// The version server.
pub struct VersionServer<S> {
    config: ServerConfig,
    service: VersionService<S>,
    stats: Arc<RwLock<ServerStats>>,
}

impl<S: BlobStore + 'static> VersionServer<S> {
    /// Create a server over `store`.
    pub fn new(config: ServerConfig, store: S) -> Self {
        let mediator = VersionedFileMediator::new(store, config.mediator.clone());
        let service = VersionService::new(mediator, config.history.clone());
        Self {
            config,
            service,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Version server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept WebSocket connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let service = self.service.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, service, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        service: VersionService<S>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(ws_stream, addr, service, stats.clone()).await;

        stats.write().await.active_connections -= 1;
        log::info!("Connection closed from {addr}");
        result
    }

    /// Read requests, spawn one task per request, write responses back.
    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        addr: SocketAddr,
        service: VersionService<S>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (response_tx, mut response_rx) = mpsc::channel::<Response>(RESPONSE_BUFFER);

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_requests += 1;
                                s.total_bytes += data.len() as u64;
                            }

                            match Request::decode(&data) {
                                Ok(request) => {
                                    let service = service.clone();
                                    let tx = response_tx.clone();
                                    let stats = stats.clone();
                                    tokio::spawn(async move {
                                        let response = dispatch(&service, request).await;
                                        if matches!(response.body, ResponseBody::Error { .. }) {
                                            stats.write().await.failed_requests += 1;
                                        }
                                        let _ = tx.send(response).await;
                                    });
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode request from {addr}: {e}");
                                    stats.write().await.failed_requests += 1;
                                    let response = Response::error(0, ErrorCode::Invalid, e.to_string());
                                    ws_sender.send(Message::Binary(response.encode()?.into())).await?;
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                Some(response) = response_rx.recv() => {
                    let encoded = response.encode()?;
                    ws_sender.send(Message::Binary(encoded.into())).await?;
                }
            }
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn service(&self) -> &VersionService<S> {
        &self.service
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Run one request against the service.
pub async fn dispatch<S: BlobStore>(service: &VersionService<S>, request: Request) -> Response {
    let Request { request_id, body } = request;

    let result = match body {
        RequestBody::CreateVersion { author, .. } | RequestBody::RemoveEdit { author, .. }
            if author.trim().is_empty() =>
        {
            return Response::error(request_id, ErrorCode::Invalid, "author must not be empty");
        }
        RequestBody::CreateVersion {
            key,
            author,
            content,
        } => service
            .create_version(&key, &author, &content)
            .await
            .map(ResponseBody::Created),
        RequestBody::GetVersion { key, version } => service
            .get_version(&key, version)
            .await
            .map(ResponseBody::Version),
        RequestBody::ListVersions { key } => service
            .list_versions(&key)
            .await
            .map(ResponseBody::Versions),
        RequestBody::RemoveEdit {
            key,
            version,
            author,
        } => service
            .remove_edit(&key, version, &author)
            .await
            .map(ResponseBody::Removed),
        RequestBody::Ping => Ok(ResponseBody::Pong),
    };

    match result {
        Ok(body) => Response::new(request_id, body),
        Err(e) => {
            log::debug!("Request {request_id} failed: {e}");
            Response::error(request_id, e.code(), e.to_string())
        }
    }
}
