//! RocksDB-backed blob store.
//!
//! Column families:
//! - `blobs`: one value per file key: `generation (8 bytes BE) ‖ LZ4 payload`
//!
//! Key: `FileKey::storage_key()` (project_id ‖ file_id, 32 bytes).
//!
//! Performance targets:
//! - Point read (cache hit): <100μs
//! - Conditional write (1KB): <100μs without fsync
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (LSM Trees, SSTables)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{BlobError, BlobStore, Precondition, StoredBlob};
use crate::key::FileKey;

const CF_BLOBS: &str = "blobs";

/// Bytes of generation header in front of each value.
const GENERATION_LEN: usize = 8;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for RocksConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("palimpsest_data"),
            block_cache_size: 256 * 1024 * 1024, // 256MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl RocksConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// RocksDB blob store.
///
/// Reads go straight to RocksDB. Writes take `commit` so that reading the
/// current generation and writing the next one cannot interleave with
/// another `put`.
pub struct RocksBlobStore {
    /// RocksDB instance (single-threaded mode, concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: RocksConfig,
    commit: Mutex<()>,
}

impl RocksBlobStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: RocksConfig) -> Result<Self, BlobError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf = ColumnFamilyDescriptor::new(CF_BLOBS, Self::cf_options(&config));
        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            vec![cf],
        )?;

        log::info!("Opened blob store at {}", config.path.display());
        Ok(Self {
            db,
            config,
            commit: Mutex::new(()),
        })
    }

    fn cf_options(config: &RocksConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        // Payloads are LZ4-compressed before they reach RocksDB
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    /// All file keys with a stored blob.
    pub fn keys(&self) -> Result<Vec<FileKey>, BlobError> {
        let cf = self.cf()?;
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if let Some(file_key) = FileKey::from_storage_key(&key) {
                keys.push(file_key);
            }
        }
        Ok(keys)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), BlobError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, BlobError> {
        self.db
            .cf_handle(CF_BLOBS)
            .ok_or_else(|| BlobError::Backend(format!("Column family '{CF_BLOBS}' not found")))
    }

    fn read(&self, key: &FileKey) -> Result<Option<StoredBlob>, BlobError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, key.storage_key())? {
            Some(value) => decode_value(key, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Generation of the stored value (0 if absent), without decompressing it.
    fn stored_generation(&self, key: &FileKey) -> Result<u64, BlobError> {
        let cf = self.cf()?;
        match self.db.get_pinned_cf(cf, key.storage_key())? {
            Some(value) => decode_generation(key, &value),
            None => Ok(0),
        }
    }
}

impl BlobStore for RocksBlobStore {
    fn get(&self, key: &FileKey) -> Result<Option<StoredBlob>, BlobError> {
        self.read(key)
    }

    fn put(&self, key: &FileKey, bytes: &[u8], precondition: Precondition) -> Result<u64, BlobError> {
        let _commit = self
            .commit
            .lock()
            .map_err(|e| BlobError::Backend(e.to_string()))?;

        let current = self.stored_generation(key)?;
        precondition.check(current)?;
        let generation = current + 1;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(
            self.cf()?,
            key.storage_key(),
            encode_value(generation, bytes),
            &write_opts,
        )?;

        log::trace!("Stored {key} at generation {generation} ({} bytes)", bytes.len());
        Ok(generation)
    }
}

fn encode_value(generation: u64, payload: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::compress_prepend_size(payload);
    let mut value = Vec::with_capacity(GENERATION_LEN + compressed.len());
    value.extend_from_slice(&generation.to_be_bytes());
    value.extend_from_slice(&compressed);
    value
}

fn decode_generation(key: &FileKey, value: &[u8]) -> Result<u64, BlobError> {
    let header: [u8; GENERATION_LEN] = value
        .get(..GENERATION_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| BlobError::Corrupt {
            key: *key,
            reason: format!("value too short ({} bytes)", value.len()),
        })?;
    Ok(u64::from_be_bytes(header))
}

fn decode_value(key: &FileKey, value: &[u8]) -> Result<StoredBlob, BlobError> {
    let generation = decode_generation(key, value)?;
    let bytes = lz4_flex::decompress_size_prepended(&value[GENERATION_LEN..]).map_err(|e| {
        BlobError::Corrupt {
            key: *key,
            reason: e.to_string(),
        }
    })?;
    Ok(StoredBlob { bytes, generation })
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
