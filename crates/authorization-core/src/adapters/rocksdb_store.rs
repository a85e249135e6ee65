//! Production `KeyValueStore` backed by RocksDB, gated behind the
//! `rocksdb-backend` feature. Ported from the node's block-storage adapter:
//! same compression and bloom-filter tuning, same `WriteBatch`-based atomic
//! writes, same prefix-scan-via-iterator shape.
//!
//! One divergence from that adapter: `authority_types::KeyValueStore`
//! takes `&self` throughout (the domain layer composes stores behind
//! `Arc`, never `Arc<Mutex<_>>`), so every method here locks `db` for the
//! duration of the call rather than requiring `&mut self`. A single column
//! family holds everything; the prefix scheme each domain component
//! already uses (`perm:`, `audit:e:`, `velocity:`, `nip46:`, `config:`,
//! `trust:`) keeps the keyspace disjoint without needing RocksDB column
//! families to do it.

use std::path::Path;
use std::sync::Arc;

use authority_types::{BatchOperation, KeyValueStore, KvStoreError};
use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};

#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    pub path: String,
    pub block_cache_size: usize,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    pub target_file_size_base: u64,
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/authority.rocksdb".to_string(),
            block_cache_size: 64 * 1024 * 1024,
            write_buffer_size: 16 * 1024 * 1024,
            max_write_buffer_number: 2,
            target_file_size_base: 16 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            write_buffer_size: 2 * 1024 * 1024,
            max_write_buffer_number: 1,
            target_file_size_base: 2 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

pub struct RocksDbStore {
    db: Arc<RwLock<DB>>,
    config: RocksDbConfig,
}

impl RocksDbStore {
    pub fn open(config: RocksDbConfig) -> Result<Self, KvStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_target_file_size_base(config.target_file_size_base);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path).map_err(|e| KvStoreError::Io {
            message: format!("failed to open rocksdb at {}: {e}", config.path),
        })?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            config,
        })
    }

    pub fn open_default(path: impl AsRef<Path>) -> Result<Self, KvStoreError> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        })
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError> {
        let db = self.db.read();
        db.get(key).map_err(|e| KvStoreError::Io {
            message: format!("rocksdb get failed: {e}"),
        })
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError> {
        let db = self.db.read();
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        db.put_opt(key, value, &write_opts).map_err(|e| KvStoreError::Io {
            message: format!("rocksdb put failed: {e}"),
        })
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvStoreError> {
        let db = self.db.read();
        db.delete(key).map_err(|e| KvStoreError::Io {
            message: format!("rocksdb delete failed: {e}"),
        })
    }

    fn atomic_batch_write(&self, ops: Vec<BatchOperation>) -> Result<(), KvStoreError> {
        let db = self.db.read();
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOperation::Put { key, value } => batch.put(&key, &value),
                BatchOperation::Delete { key } => batch.delete(&key),
            }
        }
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        db.write_opt(batch, &write_opts).map_err(|e| KvStoreError::Io {
            message: format!("rocksdb batch write failed: {e}"),
        })
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KvStoreError> {
        let db = self.db.read();
        db.get_pinned(key).map(|v| v.is_some()).map_err(|e| KvStoreError::Io {
            message: format!("rocksdb exists check failed: {e}"),
        })
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvStoreError> {
        let db = self.db.read();
        let mut results = Vec::new();
        let iter = db.iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| KvStoreError::Io {
                message: format!("rocksdb scan failed: {e}"),
            })?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (RocksDbStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbStore::open(RocksDbConfig::for_testing(
            dir.path().to_string_lossy().to_string(),
        ))
        .unwrap();
        (store, dir)
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (store, _dir) = open_tmp();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn atomic_batch_write_applies_all_ops() {
        let (store, _dir) = open_tmp();
        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".to_vec(), b"1".to_vec()),
                BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
            ])
            .unwrap();
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn prefix_scan_filters_by_prefix() {
        let (store, _dir) = open_tmp();
        store.put(b"perm:a", b"1").unwrap();
        store.put(b"perm:b", b"2").unwrap();
        store.put(b"audit:a", b"3").unwrap();
        assert_eq!(store.prefix_scan(b"perm:").unwrap().len(), 2);
    }

    #[test]
    fn data_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RocksDbStore::open(RocksDbConfig::for_testing(
                dir.path().to_string_lossy().to_string(),
            ))
            .unwrap();
            store.put(b"k", b"v").unwrap();
        }
        let reopened = RocksDbStore::open(RocksDbConfig::for_testing(
            dir.path().to_string_lossy().to_string(),
        ))
        .unwrap();
        assert_eq!(reopened.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
