//! Data storage and persistence
//!
//! The key/value contract with its two engines (sled on disk, a BTreeMap in
//! memory) and the UTXO index built on top of it.

pub mod kv;
pub mod memory_store;
pub mod sled_store;
pub mod utxo_set;

pub use kv::{KvBackend, KvPair, KvRead, KvStore, ReadTx, WriteBatch, WriteTx};
pub use memory_store::MemoryStore;
pub use sled_store::SledStore;
pub use utxo_set::{SpendableOutputs, UTXOSet, UnspentOutput, UTXO_TREE};

impl KvStore {
    /// Opens (or creates) a sled database at `path`
    pub fn open_sled<P: AsRef<std::path::Path>>(path: P) -> crate::error::Result<KvStore> {
        Ok(KvStore::new(SledStore::open(path)?))
    }

    /// A fresh, empty in-memory store
    pub fn in_memory() -> KvStore {
        KvStore::new(MemoryStore::new())
    }
}
