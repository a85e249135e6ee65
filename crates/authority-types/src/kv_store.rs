//! The storage port every persistent component (Permission Store, Audit
//! Chain, Velocity Tracker, Configuration) is built on.
//!
//! Deliberately storage-engine-agnostic (§2a): confidentiality and integrity
//! of the file are delegated to the storage layer as a non-goal. This port
//! lets `authorization-core` stay storage-agnostic; the production adapter
//! is the feature-gated RocksDB store in
//! `authorization-core::adapters::rocksdb_store`.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvStoreError {
    #[error("I/O error: {message}")]
    Io { message: String },
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },
}

/// A single operation within an atomic batch write.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Abstract key-value storage. Every multi-step mutation that must be
/// atomic (grant + audit append, revoke + audit append, velocity
/// check-and-insert) goes through [`KeyValueStore::atomic_batch_write`] so a
/// single `KeyValueStore` implementation can provide the `with_transaction`
/// guarantee §5 asks for without the domain layer knowing how.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), KvStoreError>;
    fn atomic_batch_write(&self, ops: Vec<BatchOperation>) -> Result<(), KvStoreError>;
    fn exists(&self, key: &[u8]) -> Result<bool, KvStoreError> {
        Ok(self.get(key)?.is_some())
    }
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvStoreError>;
}

/// Reference / test implementation. Interior mutability via `parking_lot`
/// lets `KeyValueStore` take `&self` the way the production RocksDB adapter
/// does (RocksDB handles are internally synchronized).
#[derive(Default)]
pub struct InMemoryKvStore {
    data: parking_lot::RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvStoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&self, ops: Vec<BatchOperation>) -> Result<(), KvStoreError> {
        let mut data = self.data.write();
        for op in ops {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvStoreError> {
        Ok(self
            .data
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let store = InMemoryKvStore::new();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn atomic_batch_write_applies_all() {
        let store = InMemoryKvStore::new();
        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".to_vec(), b"1".to_vec()),
                BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
            ])
            .unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn prefix_scan_filters_by_prefix() {
        let store = InMemoryKvStore::new();
        store.put(b"perm:a", b"1").unwrap();
        store.put(b"perm:b", b"2").unwrap();
        store.put(b"audit:a", b"3").unwrap();
        assert_eq!(store.prefix_scan(b"perm:").unwrap().len(), 2);
    }
}
