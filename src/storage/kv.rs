//! Transactional key/value contract used by the chain store and the UTXO index.
//!
//! Data lives in named buckets. [`KvStore::update`] runs a read-modify-write
//! closure against a private overlay and commits it as one atomic batch; if the
//! closure fails nothing is written. Writers are serialized and readers in
//! [`KvStore::view`] never observe a half-applied update.

use crate::error::{BlockchainError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A raw (key, value) pair as returned by cursors
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Storage engine primitive operations. `apply` must be atomic.
pub trait KvBackend: Send + Sync {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All pairs of a bucket in ascending key order
    fn scan(&self, bucket: &str) -> Result<Vec<KvPair>>;

    fn apply(&self, batch: WriteBatch) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Pending writes of one update transaction. `None` marks a delete.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> impl Iterator<Item = (String, Vec<u8>, Option<Vec<u8>>)> {
        self.ops
            .into_iter()
            .map(|((bucket, key), value)| (bucket, key, value))
    }
}

/// Physical key for a bucket entry: `len(bucket) ‖ bucket ‖ key`.
/// Shared by the engines so every bucket is a contiguous, ordered key range.
pub(crate) fn bucket_key(bucket: &str, key: &[u8]) -> Vec<u8> {
    let mut out = bucket_prefix(bucket);
    out.extend_from_slice(key);
    out
}

pub(crate) fn bucket_prefix(bucket: &str) -> Vec<u8> {
    let name = bucket.as_bytes();
    let mut out = Vec::with_capacity(1 + name.len());
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out
}

/// Read operations shared by view and update transactions
pub trait KvRead {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ordered iteration over a bucket
    fn cursor(&self, bucket: &str) -> Result<Vec<KvPair>>;
}

pub struct ReadTx<'a> {
    backend: &'a dyn KvBackend,
}

impl KvRead for ReadTx<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get(bucket, key)
    }

    fn cursor(&self, bucket: &str) -> Result<Vec<KvPair>> {
        self.backend.scan(bucket)
    }
}

pub struct WriteTx<'a> {
    backend: &'a dyn KvBackend,
    pending: WriteBatch,
}

impl WriteTx<'_> {
    pub fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) {
        self.pending
            .ops
            .insert((bucket.to_string(), key.to_vec()), Some(value.to_vec()));
    }

    pub fn delete(&mut self, bucket: &str, key: &[u8]) {
        self.pending
            .ops
            .insert((bucket.to_string(), key.to_vec()), None);
    }

    /// Deletes every key of `bucket`, including keys written earlier in this transaction
    pub fn clear(&mut self, bucket: &str) -> Result<()> {
        for (key, _) in self.cursor(bucket)? {
            self.delete(bucket, &key);
        }
        Ok(())
    }
}

impl KvRead for WriteTx<'_> {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.pending.ops.get(&(bucket.to_string(), key.to_vec())) {
            return Ok(value.clone());
        }
        self.backend.get(bucket, key)
    }

    fn cursor(&self, bucket: &str) -> Result<Vec<KvPair>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.backend.scan(bucket)?.into_iter().collect();
        for ((op_bucket, key), value) in &self.pending.ops {
            if op_bucket != bucket {
                continue;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

/// Handle to a transactional store. Cheap to clone; clones share the engine.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
    lock: Arc<RwLock<()>>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

impl KvStore {
    pub fn new<B: KvBackend + 'static>(backend: B) -> KvStore {
        KvStore {
            backend: Arc::new(backend),
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Runs `f` against a consistent snapshot
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTx<'_>) -> Result<T>,
    {
        let _guard = self
            .lock
            .read()
            .map_err(|_| BlockchainError::Storage("Store lock poisoned".to_string()))?;
        let tx = ReadTx {
            backend: self.backend.as_ref(),
        };
        f(&tx)
    }

    /// Runs `f` as the only writer and commits its writes atomically on success
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTx<'_>) -> Result<T>,
    {
        let _guard = self
            .lock
            .write()
            .map_err(|_| BlockchainError::Storage("Store lock poisoned".to_string()))?;
        let mut tx = WriteTx {
            backend: self.backend.as_ref(),
            pending: WriteBatch::default(),
        };
        let value = f(&mut tx)?;
        if !tx.pending.is_empty() {
            self.backend.apply(tx.pending)?;
        }
        Ok(value)
    }

    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }
}
