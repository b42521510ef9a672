//! In-process blob store for tests and `PALIMPSEST_STORAGE=memory`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{BlobError, BlobStore, Precondition, StoredBlob};
use crate::key::FileKey;

/// `Mutex<HashMap>` blob store. The mutex makes check-and-write atomic.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<FileKey, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &FileKey) -> Result<Option<StoredBlob>, BlobError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        Ok(blobs.get(key).cloned())
    }

    fn put(&self, key: &FileKey, bytes: &[u8], precondition: Precondition) -> Result<u64, BlobError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        let current = blobs.get(key).map_or(0, |b| b.generation);
        precondition.check(current)?;

        let generation = current + 1;
        blobs.insert(
            *key,
            StoredBlob {
                bytes: bytes.to_vec(),
                generation,
            },
        );
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_key() {
        let store = MemoryBlobStore::new();
        assert!(store.get(&FileKey::random()).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_generations_increment() {
        let store = MemoryBlobStore::new();
        let key = FileKey::random();

        assert_eq!(store.put(&key, b"one", Precondition::MustNotExist).unwrap(), 1);
        assert_eq!(store.put(&key, b"two", Precondition::GenerationEquals(1)).unwrap(), 2);
        assert_eq!(store.put(&key, b"three", Precondition::GenerationEquals(2)).unwrap(), 3);

        let blob = store.get(&key).unwrap().unwrap();
        assert_eq!(blob.generation, 3);
        assert_eq!(blob.bytes, b"three");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stale_write_rejected() {
        let store = MemoryBlobStore::new();
        let key = FileKey::random();
        store.put(&key, b"a", Precondition::MustNotExist).unwrap();
        store.put(&key, b"b", Precondition::GenerationEquals(1)).unwrap();

        let err = store.put(&key, b"stale", Precondition::GenerationEquals(1)).unwrap_err();
        assert_eq!(err, BlobError::PreconditionFailed { expected: 1, actual: 2 });
        assert_eq!(store.get(&key).unwrap().unwrap().bytes, b"b");
    }

    #[test]
    fn test_must_not_exist_rejected_after_create() {
        let store = MemoryBlobStore::new();
        let key = FileKey::random();
        store.put(&key, b"a", Precondition::MustNotExist).unwrap();
        assert!(matches!(
            store.put(&key, b"b", Precondition::MustNotExist),
            Err(BlobError::PreconditionFailed { expected: 0, actual: 1 })
        ));
    }

    #[test]
    fn test_keys_independent() {
        let store = MemoryBlobStore::new();
        let a = FileKey::random();
        let b = FileKey::random();
        store.put(&a, b"a", Precondition::MustNotExist).unwrap();
        assert_eq!(store.put(&b, b"b", Precondition::MustNotExist).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryBlobStore::new());
        store.put(&FileKey::random(), b"a", Precondition::MustNotExist).unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.blobs.lock().unwrap();
            panic!("poison the blob map");
        })
        .join();

        assert!(store.blobs.is_poisoned());
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
