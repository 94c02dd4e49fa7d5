//! # PoW Ledger
//!
//! A proof-of-work ledger with an unspent-output model, ECDSA-signed
//! transactions and a small peer protocol for block synchronization.
//!
//! ## Layout
//! - `core/`: transactions, blocks, Merkle roots, mining and the chain store
//! - `storage/`: the transactional key/value contract, its engines and the UTXO index
//! - `wallet/`: key pairs, addresses and the wallet file
//! - `network/`: wire messages, the peer registry and the node server
//! - `config/`: layered node settings
//! - `utils/`: hashing, base58 and serialization helpers
//! - `cli/`: command-line parsing for the binary
//!
//! ## Invariants worth remembering
//! - The tip always names the stored block with the greatest height.
//! - Rebuilding the UTXO index and applying blocks one at a time give the same
//!   index for the same chain.
//! - Every non-coinbase input signs a digest that commits to the output it spends.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, MerkleTree, ProofOfWork, TXInput, TXOutput, Transaction, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use network::{Message, PeerRegistry, Server};
pub use storage::{KvStore, SpendableOutputs, UTXOSet, UnspentOutput};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
