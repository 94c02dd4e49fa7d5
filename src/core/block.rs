use crate::core::proof_of_work::header_bytes;
use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::Result;
use crate::utils::{current_timestamp, deserialize, double_sha256, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header version written into every block
pub const BLOCK_VERSION: i64 = 1;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    version: i64,
    prev_block_hash: Vec<u8>, // empty only for genesis
    merkle_root: Vec<u8>,     // empty when there are no transactions
    hash: Vec<u8>,
    timestamp: i64,
    bits: i64,
    nonce: i64,
    transactions: Vec<Transaction>,
    height: usize,
}

impl Block {
    /// Builds a block on top of `prev_block_hash` and mines it at `target_bits`
    pub fn new_block(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        target_bits: u32,
    ) -> Result<Block> {
        let mut block = Block {
            version: BLOCK_VERSION,
            prev_block_hash,
            merkle_root: MerkleTree::root_of_transactions(transactions),
            hash: vec![],
            timestamp: current_timestamp()?,
            bits: i64::from(target_bits),
            nonce: 0,
            transactions: transactions.to_vec(),
            height,
        };

        info!("Starting proof-of-work for block at height {height} with {target_bits} bits");
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block)?.run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Proof-of-work completed for block {} at height {height} (nonce {nonce})",
            HEXLOWER.encode(&block.hash)
        );

        Ok(block)
    }

    /// Height-0 block holding a single coinbase. It is not mined: its hash is
    /// the double SHA-256 of its header at nonce 0 and it carries zero bits.
    pub fn generate_genesis_block(coinbase: &Transaction) -> Result<Block> {
        let transactions = vec![coinbase.clone()];
        let mut block = Block {
            version: BLOCK_VERSION,
            prev_block_hash: vec![],
            merkle_root: MerkleTree::root_of_transactions(&transactions),
            hash: vec![],
            timestamp: current_timestamp()?,
            bits: 0,
            nonce: 0,
            transactions,
            height: 0,
        };
        block.hash = double_sha256(&header_bytes(&block, 0));
        Ok(block)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_version(&self) -> i64 {
        self.version
    }

    pub fn get_prev_block_hash(&self) -> &[u8] {
        self.prev_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_bits(&self) -> i64 {
        self.bits
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        &self.merkle_root
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// Verify that the block's Merkle root matches its transactions
    pub fn verify_merkle_root(&self) -> bool {
        MerkleTree::verify_transactions(&self.transactions, &self.merkle_root)
    }

    #[cfg(test)]
    pub(crate) fn set_nonce(&mut self, nonce: i64) {
        self.nonce = nonce;
    }

    #[cfg(test)]
    pub(crate) fn set_bits(&mut self, bits: i64) {
        self.bits = bits;
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Block {} ============", self.get_hash_hex())?;
        writeln!(f, "Height: {}", self.height)?;
        writeln!(f, "Prev. block: {}", HEXLOWER.encode(&self.prev_block_hash))?;
        writeln!(f, "Merkle root: {}", HEXLOWER.encode(&self.merkle_root))?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Bits: {} Nonce: {}", self.bits, self.nonce)?;
        writeln!(f, "PoW: {}", self.is_genesis() || ProofOfWork::validate(self))?;
        for tx in &self.transactions {
            write!(f, "{tx}")?;
        }
        Ok(())
    }
}
