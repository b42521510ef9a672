//! Blob storage with generation-checked writes.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────┐   get / put(precondition)   ┌──────────────────┐
//! │ VersionedFileMediator│ ──────────────────────────► │ dyn BlobStore    │
//! │ (per-key RwLock)     │ ◄────────────────────────── │                  │
//! └──────────────────────┘   StoredBlob { generation } └────────┬─────────┘
//!                                                               │
//!                                          ┌────────────────────┴──────────┐
//!                                          ▼                               ▼
//!                                 ┌─────────────────┐            ┌──────────────────┐
//!                                 │ MemoryBlobStore │            │ RocksBlobStore   │
//!                                 │ Mutex<HashMap>  │            │ CF "blobs" (LZ4) │
//!                                 └─────────────────┘            └──────────────────┘
//! ```
//!
//! A blob's generation is assigned by the store: 1 on first write, +1 on
//! every successful write. Absence reads as generation 0. `put` checks the
//! caller's precondition and writes atomically with respect to other `put`s.
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 7
//! (compare-and-set)

pub mod memory;
pub mod rocks;

pub use memory::MemoryBlobStore;
pub use rocks::{RocksBlobStore, RocksConfig};

use std::sync::Arc;
use thiserror::Error;

use crate::key::FileKey;

/// A stored value and the generation that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub generation: u64,
}

/// Condition a `put` must satisfy before it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The blob currently has exactly this generation.
    GenerationEquals(u64),
    /// The blob does not exist yet.
    MustNotExist,
}

impl Precondition {
    /// Precondition for overwriting what was read at `generation` (0 = absent).
    pub fn for_generation(generation: u64) -> Self {
        if generation == 0 {
            Precondition::MustNotExist
        } else {
            Precondition::GenerationEquals(generation)
        }
    }

    /// Generation this precondition expects to find.
    pub fn expected(&self) -> u64 {
        match self {
            Precondition::GenerationEquals(g) => *g,
            Precondition::MustNotExist => 0,
        }
    }

    /// Check against the generation currently stored.
    pub fn check(&self, actual: u64) -> Result<(), BlobError> {
        if self.expected() == actual {
            Ok(())
        } else {
            Err(BlobError::PreconditionFailed {
                expected: self.expected(),
                actual,
            })
        }
    }
}

/// Blob store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// Stored generation differs from the write's precondition.
    #[error("precondition failed: expected generation {expected}, found {actual}")]
    PreconditionFailed { expected: u64, actual: u64 },

    /// Backend failure (RocksDB, poisoned lock).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded.
    #[error("corrupt blob for {key}: {reason}")]
    Corrupt { key: FileKey, reason: String },
}

impl From<rocksdb::Error> for BlobError {
    fn from(e: rocksdb::Error) -> Self {
        BlobError::Backend(e.to_string())
    }
}

/// Key → blob storage with optimistic-concurrency writes.
///
/// Calls are synchronous; the mediator invokes them while holding the
/// key's async lock.
pub trait BlobStore: Send + Sync {
    /// Current blob for `key`, or `None` if it was never written.
    fn get(&self, key: &FileKey) -> Result<Option<StoredBlob>, BlobError>;

    /// Write `bytes` if `precondition` holds. Returns the new generation.
    fn put(&self, key: &FileKey, bytes: &[u8], precondition: Precondition) -> Result<u64, BlobError>;
}

impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    fn get(&self, key: &FileKey) -> Result<Option<StoredBlob>, BlobError> {
        (**self).get(key)
    }

    fn put(&self, key: &FileKey, bytes: &[u8], precondition: Precondition) -> Result<u64, BlobError> {
        (**self).put(key, bytes, precondition)
    }
}
