use crate::error::{BlockchainError, Result};
use crate::storage::kv::{bucket_key, bucket_prefix, KvBackend, KvPair, WriteBatch};
use sled::{Batch, Db};
use std::path::Path;

/// sled-backed engine. All buckets share the default tree so one
/// `apply_batch` covers an update that touches several buckets.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SledStore> {
        let db = sled::open(path.as_ref())
            .map_err(|e| BlockchainError::Storage(format!("Failed to open database: {e}")))?;
        Ok(SledStore { db })
    }
}

impl KvBackend for SledStore {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .db
            .get(bucket_key(bucket, key))
            .map_err(|e| BlockchainError::Storage(format!("Failed to read {bucket}: {e}")))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn scan(&self, bucket: &str) -> Result<Vec<KvPair>> {
        let prefix = bucket_prefix(bucket);
        let mut pairs = vec![];
        for item in self.db.scan_prefix(&prefix) {
            let (k, v) = item
                .map_err(|e| BlockchainError::Storage(format!("Failed to iterate {bucket}: {e}")))?;
            pairs.push((k[prefix.len()..].to_vec(), v.to_vec()));
        }
        Ok(pairs)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut sled_batch = Batch::default();
        for (bucket, key, value) in batch.into_ops() {
            let physical = bucket_key(&bucket, &key);
            match value {
                Some(value) => sled_batch.insert(physical, value),
                None => sled_batch.remove(physical),
            }
        }
        self.db
            .apply_batch(sled_batch)
            .map_err(|e| BlockchainError::Storage(format!("Failed to commit batch: {e}")))
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
