//! Core ledger functionality
//!
//! Transactions, blocks with their Merkle root, the proof-of-work engine and
//! the chain store.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BLOCK_VERSION};
pub use blockchain::{Blockchain, BlockchainIterator, BLOCKS_TREE};
pub use merkle::MerkleTree;
pub use proof_of_work::{ProofOfWork, MAX_NONCE};
pub use transaction::{TXInput, TXOutput, Transaction, TransactionLookup, SUBSIDY};
