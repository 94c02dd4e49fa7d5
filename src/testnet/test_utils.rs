//! Test utilities for ledger testing

use crate::core::{Block, Blockchain, Transaction};
use crate::error::Result;
use crate::storage::{KvStore, UTXOSet};
use crate::wallet::{Wallet, Wallets};

/// Low difficulty so mining in tests stays fast
pub const TEST_TARGET_BITS: u32 = 8;

/// In-memory chain whose genesis reward goes to a fresh wallet
pub fn test_chain() -> (Blockchain, Wallet) {
    let wallet = Wallet::new().unwrap();
    let chain =
        Blockchain::create_blockchain(KvStore::in_memory(), &wallet.get_address(), TEST_TARGET_BITS)
            .unwrap();
    (chain, wallet)
}

/// In-memory wallet collection with `count` fresh wallets
pub fn create_test_wallets(count: usize) -> Result<(Wallets, Vec<String>)> {
    let mut wallets = Wallets::default();
    let mut addresses = Vec::new();
    for _ in 0..count {
        addresses.push(wallets.create_wallet()?);
    }
    Ok((wallets, addresses))
}

/// Sends `amount` from `from` to `to` the way the `send` command does: a block
/// with a coinbase to `from` plus the transfer, followed by an index update.
pub fn transfer(
    utxo_set: &UTXOSet,
    wallets: &Wallets,
    from: &str,
    to: &str,
    amount: u64,
) -> Result<Block> {
    let tx = Transaction::new_utxo_transaction(from, to, amount, wallets, utxo_set)?;
    let coinbase_tx = Transaction::new_coinbase_tx(from)?;
    let block = utxo_set.get_blockchain().mine_block(&[coinbase_tx, tx])?;
    utxo_set.update(&block)?;
    Ok(block)
}

/// Checks hash linkage, proof-of-work and Merkle roots from tip to genesis
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash = blockchain.get_tip_hash()?;
    for block in blockchain.iterator()? {
        let block = block?;
        if block.get_hash() != expected_hash.as_slice() {
            return Ok(false);
        }
        if !block.is_genesis()
            && !crate::core::ProofOfWork::validate_at(&block, blockchain.get_target_bits())
        {
            return Ok(false);
        }
        if !block.verify_merkle_root() {
            return Ok(false);
        }
        expected_hash = block.get_prev_block_hash().to_vec();
    }
    Ok(expected_hash.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_chain_starts_at_genesis() {
        let (chain, _) = test_chain();
        assert_eq!(chain.get_best_height().unwrap(), 0);
        assert!(validate_blockchain_integrity(&chain).unwrap());
    }

    #[test]
    fn test_create_test_wallets() {
        let (_wallets, addresses) = create_test_wallets(5).unwrap();
        assert_eq!(addresses.len(), 5);
        for i in 0..addresses.len() {
            for j in i + 1..addresses.len() {
                assert_ne!(addresses[i], addresses[j]);
            }
        }
    }

    #[test]
    fn test_integrity_after_transfers() {
        let (chain, wallet) = test_chain();
        let (mut wallets, addresses) = create_test_wallets(1).unwrap();
        let from = wallets.add_wallet(wallet);
        let utxo_set = UTXOSet::new(chain.clone());
        utxo_set.reindex().unwrap();

        transfer(&utxo_set, &wallets, &from, &addresses[0], 10).unwrap();
        transfer(&utxo_set, &wallets, &addresses[0], &from, 5).unwrap();
        assert_eq!(chain.get_best_height().unwrap(), 2);
        assert!(validate_blockchain_integrity(&chain).unwrap());
    }
}
