use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::{double_sha256, i64_to_be_bytes};
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Largest nonce tried before a search is reported as exhausted
pub const MAX_NONCE: i64 = i64::MAX;

const PROGRESS_INTERVAL: i64 = 1 << 20;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
    max_nonce: i64,
}

impl<'a> ProofOfWork<'a> {
    /// Engine for `block` with `target = 2^(256 - bits)`
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        Self::with_max_nonce(block, MAX_NONCE)
    }

    /// Same as [`ProofOfWork::new_proof_of_work`] with a bounded nonce search
    pub fn with_max_nonce(block: &'a Block, max_nonce: i64) -> Result<ProofOfWork<'a>> {
        let bits = block.get_bits();
        if !(1..=256).contains(&bits) {
            return Err(BlockchainError::Validation(format!(
                "Target bits {bits} out of range"
            )));
        }
        let mut target = BigInt::from(1);
        target.shl_assign(256 - bits as usize);
        Ok(ProofOfWork {
            block,
            target,
            max_nonce,
        })
    }

    /// Checks the block's stored nonce against the target its own bits name
    pub fn validate(block: &Block) -> bool {
        match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow.meets_target(&pow.hash_at(block.get_nonce())),
            Err(_) => false,
        }
    }

    /// Checks the block against the difficulty this node requires.
    ///
    /// I never trust the bits a peer writes into its own header: a block mined
    /// at any other difficulty fails even if its hash meets that easier target.
    pub fn validate_at(block: &Block, target_bits: u32) -> bool {
        if block.get_bits() != i64::from(target_bits) {
            return false;
        }
        ProofOfWork::validate(block)
    }

    /// Header bytes hashed for `nonce`: version, previous hash, Merkle root,
    /// time, bits and nonce. Integers are 8-byte big-endian; hashes are raw.
    pub fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        header_bytes(self.block, nonce)
    }

    /// Sequential nonce search from 0
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        let mut nonce = 0;
        while nonce < self.max_nonce {
            let hash = self.hash_at(nonce);
            if self.meets_target(&hash) {
                debug!(
                    "Found nonce {nonce} for block at height {}: {}",
                    self.block.get_height(),
                    HEXLOWER.encode(&hash)
                );
                return Ok((nonce, hash));
            }
            if nonce > 0 && nonce % PROGRESS_INTERVAL == 0 {
                debug!("Mining block at height {}: {nonce} nonces tried", self.block.get_height());
            }
            nonce += 1;
        }
        Err(BlockchainError::MiningExhausted {
            max_nonce: self.max_nonce,
        })
    }

    fn hash_at(&self, nonce: i64) -> Vec<u8> {
        double_sha256(&self.prepare_data(nonce))
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }
}

pub(crate) fn header_bytes(block: &Block, nonce: i64) -> Vec<u8> {
    let mut data_bytes = vec![];
    data_bytes.extend(i64_to_be_bytes(block.get_version()));
    data_bytes.extend(block.get_prev_block_hash());
    data_bytes.extend(block.get_merkle_root());
    data_bytes.extend(i64_to_be_bytes(block.get_timestamp()));
    data_bytes.extend(i64_to_be_bytes(block.get_bits()));
    data_bytes.extend(i64_to_be_bytes(nonce));
    data_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    const TEST_BITS: u32 = 8;

    fn mined_block(bits: u32) -> Block {
        let coinbase_tx = Transaction::new_coinbase_tx_to_hash(&[7u8; 20]).unwrap();
        Block::new_block(vec![1u8; 32], &[coinbase_tx], 1, bits).unwrap()
    }

    #[test]
    fn test_mined_block_validates() {
        let block = mined_block(TEST_BITS);
        assert!(ProofOfWork::validate(&block));

        let pow = ProofOfWork::new_proof_of_work(&block).unwrap();
        assert_eq!(pow.hash_at(block.get_nonce()), block.get_hash());
    }

    #[test]
    fn test_mined_hash_has_leading_zero_bits() {
        let block = mined_block(TEST_BITS);
        assert_eq!(block.get_hash()[0], 0);
    }

    #[test]
    fn test_wrong_nonce_fails_validation() {
        let block = mined_block(16);
        let mut tampered = block.clone();
        // A neighbouring nonce meets a 16-bit target with probability 2^-16.
        tampered.set_nonce(block.get_nonce() + 1);
        assert!(!ProofOfWork::validate(&tampered));
    }

    #[test]
    fn test_higher_bits_give_smaller_target() {
        let easy_block = mined_block(4);
        let hard_block = mined_block(TEST_BITS);

        let easy_pow = ProofOfWork::new_proof_of_work(&easy_block).unwrap();
        let hard_pow = ProofOfWork::new_proof_of_work(&hard_block).unwrap();
        assert!(hard_pow.target < easy_pow.target);
        assert_eq!(hard_pow.target, BigInt::from(1) << 248);
    }

    #[test]
    fn test_exhausted_search_is_an_error() {
        let mut block = mined_block(TEST_BITS);
        block.set_bits(255);
        let pow = ProofOfWork::with_max_nonce(&block, 16).unwrap();
        assert_eq!(
            pow.run(),
            Err(BlockchainError::MiningExhausted { max_nonce: 16 })
        );
    }

    #[test]
    fn test_out_of_range_bits_rejected() {
        let mut block = mined_block(TEST_BITS);
        block.set_bits(0);
        assert!(ProofOfWork::new_proof_of_work(&block).is_err());
        assert!(!ProofOfWork::validate(&block));

        block.set_bits(300);
        assert!(ProofOfWork::new_proof_of_work(&block).is_err());
    }

    #[test]
    fn test_validate_at_requires_node_difficulty() {
        let easy_block = mined_block(1);
        assert!(ProofOfWork::validate(&easy_block));
        assert!(ProofOfWork::validate_at(&easy_block, 1));
        assert!(!ProofOfWork::validate_at(&easy_block, TEST_BITS));

        let block = mined_block(TEST_BITS);
        assert!(ProofOfWork::validate_at(&block, TEST_BITS));
        assert!(!ProofOfWork::validate_at(&block, 4));
    }

    #[test]
    fn test_prepare_data_layout() {
        let block = mined_block(TEST_BITS);
        let pow = ProofOfWork::new_proof_of_work(&block).unwrap();
        let data = pow.prepare_data(0x0102);

        assert_eq!(data.len(), 8 + 32 + 32 + 8 + 8 + 8);
        assert_eq!(&data[..8], &1i64.to_be_bytes());
        assert_eq!(&data[8..40], block.get_prev_block_hash());
        assert_eq!(&data[40..72], block.get_merkle_root());
        assert_eq!(&data[80..88], &(TEST_BITS as i64).to_be_bytes());
        assert_eq!(&data[88..], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_ne!(pow.prepare_data(1), pow.prepare_data(2));
    }
}
