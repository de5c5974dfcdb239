//! RocksDB-backed key-value layer for the economy engine.
//!
//! All domain records are serde_json values under string/byte prefix keys.
//! Multi-key atomicity comes from `WriteBatch`: an operation stages every
//! row it touches and commits them in one batch write.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

use crate::errors::{CoinvaultResult, StorageError};

#[derive(Clone)]
pub struct KvStorage {
    db: Arc<DB>,
}

impl KvStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> CoinvaultResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> CoinvaultResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> CoinvaultResult<()> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    pub fn delete(&self, key: &[u8]) -> CoinvaultResult<()> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Commit a set of puts and deletes atomically
    pub fn batch_write(&self, puts: &[(Vec<u8>, Vec<u8>)], deletes: &[Vec<u8>]) -> CoinvaultResult<()> {
        let mut batch = WriteBatch::default();
        for (key, value) in puts {
            batch.put(key, value);
        }
        for key in deletes {
            batch.delete(key);
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Scan up to `limit` rows under `prefix` in key order, resuming strictly
    /// after `after` when a cursor is supplied.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> CoinvaultResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = after.unwrap_or(prefix);
        let iter = self
            .db
            .iterator(IteratorMode::From(start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if let Some(cursor) = after {
                if key.as_ref() <= cursor {
                    continue;
                }
            }
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, KvStorage) {
        let dir = TempDir::new().unwrap();
        let storage = KvStorage::open(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, storage) = open_temp();

        storage.put(b"k1", b"v1").unwrap();
        assert_eq!(storage.get(b"k1").unwrap(), Some(b"v1".to_vec()));

        storage.delete(b"k1").unwrap();
        assert_eq!(storage.get(b"k1").unwrap(), None);
    }

    #[test]
    fn test_batch_write_is_atomic_set() {
        let (_dir, storage) = open_temp();

        storage.put(b"gone", b"x").unwrap();
        storage
            .batch_write(
                &[
                    (b"a".to_vec(), b"1".to_vec()),
                    (b"b".to_vec(), b"2".to_vec()),
                ],
                &[b"gone".to_vec()],
            )
            .unwrap();

        assert_eq!(storage.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(storage.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(storage.get(b"gone").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_with_cursor() {
        let (_dir, storage) = open_temp();

        for i in 0..5u8 {
            storage.put(format!("p:{i}").as_bytes(), &[i]).unwrap();
        }
        storage.put(b"q:0", b"other").unwrap();

        let first = storage.scan_prefix(b"p:", None, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0, b"p:0".to_vec());

        let cursor = first.last().unwrap().0.clone();
        let rest = storage.scan_prefix(b"p:", Some(&cursor), 10).unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].0, b"p:2".to_vec());
    }
}
