//! File identity: the unit of locking and storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of [`FileKey::storage_key`].
pub const STORAGE_KEY_LEN: usize = 32;

/// Identifies one versioned file: `(project_id, file_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub project_id: Uuid,
    pub file_id: Uuid,
}

impl FileKey {
    pub fn new(project_id: Uuid, file_id: Uuid) -> Self {
        Self { project_id, file_id }
    }

    /// A fresh key with random v4 ids.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4(), Uuid::new_v4())
    }

    /// Storage key: `project_id ‖ file_id` (32 bytes).
    pub fn storage_key(&self) -> [u8; STORAGE_KEY_LEN] {
        let mut key = [0u8; STORAGE_KEY_LEN];
        key[..16].copy_from_slice(self.project_id.as_bytes());
        key[16..].copy_from_slice(self.file_id.as_bytes());
        key
    }

    /// Inverse of [`storage_key`](Self::storage_key). `None` if `bytes` is not 32 bytes long.
    pub fn from_storage_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != STORAGE_KEY_LEN {
            return None;
        }
        let project_id = Uuid::from_slice(&bytes[..16]).ok()?;
        let file_id = Uuid::from_slice(&bytes[16..]).ok()?;
        Some(Self::new(project_id, file_id))
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.file_id)
    }
}
