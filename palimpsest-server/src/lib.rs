//! # palimpsest-server: Versioned file storage service
//!
//! Stores every file as a patch history and serves version operations over
//! WebSocket. Edits to one file are serialized by a per-file lock; writes are
//! checked against the blob generation that was read.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌───────────────┐
//! │ VersionClient │ ◄────────────────► │ VersionServer │
//! └───────────────┘   bincode frames   └───────┬───────┘
//!                                              │
//!                                      ┌───────┴────────┐
//!                                      │ VersionService │── FileHistory ── PatchCorrector
//!                                      └───────┬────────┘
//!                                              │ with_read_file / with_write_file
//!                                  ┌───────────┴────────────┐
//!                                  │ VersionedFileMediator  │
//!                                  │ (sharded per-key locks)│
//!                                  └───────────┬────────────┘
//!                                              │ get / put(precondition)
//!                                      ┌───────┴───────┐
//!                                      │ BlobStore     │ Memory | RocksDB
//!                                      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`key`]: `FileKey`
//! - [`storage`]: `BlobStore` trait, in-memory and RocksDB backends
//! - [`mediator`]: per-file locking and generation-checked writes
//! - [`history`]: per-file patch chain, edit removal, compaction
//! - [`service`]: version operations
//! - [`protocol`]: wire messages
//! - [`server`]: WebSocket server
//! - [`client`]: WebSocket client
//!
//! ## Performance Targets
//!
//! | Metric | Target |
//! |--------|--------|
//! | Uncontended write (1KB file, memory store) | <100μs |
//! | Lock lookup, existing key | <1μs |
//! | 1K concurrent writers on one key | no lost updates |

pub mod client;
pub mod history;
pub mod key;
pub mod mediator;
pub mod protocol;
pub mod server;
pub mod service;
pub mod storage;

// Re-exports for convenience
pub use client::{ConnectionState, VersionClient};
pub use history::{
    EntryKind, FileHistory, HistoryConfig, HistoryEntry, HistoryError, VersionContent, VersionInfo,
};
pub use key::FileKey;
pub use mediator::{MediatorConfig, MediatorError, VersionedFileMediator, WriteReceipt};
pub use protocol::{ErrorCode, ProtocolError, Request, RequestBody, Response, ResponseBody};
pub use server::{ConfigError, ServerConfig, ServerStats, StorageBackend, VersionServer};
pub use service::{ServiceError, VersionService};
pub use storage::{
    BlobError, BlobStore, MemoryBlobStore, Precondition, RocksBlobStore, RocksConfig, StoredBlob,
};
