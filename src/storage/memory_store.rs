use crate::error::{BlockchainError, Result};
use crate::storage::kv::{bucket_key, bucket_prefix, KvBackend, KvPair, WriteBatch};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory engine with the same key layout as [`crate::storage::SledStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl KvBackend for MemoryStore {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BlockchainError::Storage("Memory store lock poisoned".to_string()))?;
        Ok(inner.get(&bucket_key(bucket, key)).cloned())
    }

    fn scan(&self, bucket: &str) -> Result<Vec<KvPair>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BlockchainError::Storage("Memory store lock poisoned".to_string()))?;
        let prefix = bucket_prefix(bucket);
        Ok(inner
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k[prefix.len()..].to_vec(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BlockchainError::Storage("Memory store lock poisoned".to_string()))?;
        for (bucket, key, value) in batch.into_ops() {
            let physical = bucket_key(&bucket, &key);
            match value {
                Some(value) => {
                    inner.insert(physical, value);
                }
                None => {
                    inner.remove(&physical);
                }
            }
        }
        Ok(())
    }
}
