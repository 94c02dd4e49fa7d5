// Chain store: blocks keyed by hash in the "blocks" bucket plus a "latest"
// pointer to the tip. Every multi-step change runs inside one store update so
// concurrent handlers never lose a tip move.

use crate::core::proof_of_work::header_bytes;
use crate::core::transaction::TransactionLookup;
use crate::core::{Block, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{KvRead, KvStore, UnspentOutput, WriteTx};
use crate::utils::double_sha256;
use data_encoding::HEXLOWER;
use log::{info, warn};
use std::collections::{HashMap, HashSet};

pub const BLOCKS_TREE: &str = "blocks";
const TIP_BLOCK_HASH_KEY: &[u8] = b"latest";

#[derive(Clone, Debug)]
pub struct Blockchain {
    store: KvStore,
    target_bits: u32,
}

impl Blockchain {
    /// Opens the chain in `store`, creating a genesis block paying
    /// `genesis_address` if none exists yet. Repeated calls are harmless.
    pub fn create_blockchain(
        store: KvStore,
        genesis_address: &str,
        target_bits: u32,
    ) -> Result<Blockchain> {
        let address = genesis_address.to_string();
        store.update(|tx| {
            if let Some(tip) = tx.get(BLOCKS_TREE, TIP_BLOCK_HASH_KEY)? {
                info!("Blockchain already exists with tip {}", HEXLOWER.encode(&tip));
                return Ok(());
            }
            info!("Creating genesis block for address: {address}");
            let coinbase_tx = Transaction::new_coinbase_tx(&address)?;
            let genesis = Block::generate_genesis_block(&coinbase_tx)?;
            Self::put_block(tx, &genesis)?;
            tx.put(BLOCKS_TREE, TIP_BLOCK_HASH_KEY, genesis.get_hash());
            Ok(())
        })?;
        Ok(Blockchain { store, target_bits })
    }

    /// Like [`Blockchain::create_blockchain`] with a caller-supplied genesis,
    /// so independent nodes can start from the same first block.
    pub fn create_with_genesis(
        store: KvStore,
        genesis: &Block,
        target_bits: u32,
    ) -> Result<Blockchain> {
        if genesis.get_height() != 0 || !genesis.is_genesis() {
            return Err(BlockchainError::Validation(
                "Genesis block must have height 0 and no previous hash".to_string(),
            ));
        }
        store.update(|tx| {
            if tx.get(BLOCKS_TREE, TIP_BLOCK_HASH_KEY)?.is_none() {
                Self::put_block(tx, genesis)?;
                tx.put(BLOCKS_TREE, TIP_BLOCK_HASH_KEY, genesis.get_hash());
            }
            Ok(())
        })?;
        Ok(Blockchain { store, target_bits })
    }

    /// Opens an existing chain; fails with `NotFound` on an empty store
    pub fn open_blockchain(store: KvStore, target_bits: u32) -> Result<Blockchain> {
        let tip = store.view(|tx| tx.get(BLOCKS_TREE, TIP_BLOCK_HASH_KEY))?;
        if tip.is_none() {
            return Err(BlockchainError::NotFound(
                "No existing blockchain found. Create one first.".to_string(),
            ));
        }
        Ok(Blockchain { store, target_bits })
    }

    fn put_block(tx: &mut WriteTx<'_>, block: &Block) -> Result<()> {
        tx.put(BLOCKS_TREE, block.get_hash(), &block.serialize()?);
        Ok(())
    }

    fn read_block<R: KvRead + ?Sized>(tx: &R, block_hash: &[u8]) -> Result<Option<Block>> {
        match tx.get(BLOCKS_TREE, block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_tip_height<R: KvRead + ?Sized>(tx: &R) -> Result<Option<usize>> {
        let Some(tip_hash) = tx.get(BLOCKS_TREE, TIP_BLOCK_HASH_KEY)? else {
            return Ok(None);
        };
        let tip_block = Self::read_block(tx, &tip_hash)?.ok_or_else(|| {
            BlockchainError::Storage(format!(
                "Tip block {} missing from store",
                HEXLOWER.encode(&tip_hash)
            ))
        })?;
        Ok(Some(tip_block.get_height()))
    }

    /// Persists `block` and moves the tip to it when its height exceeds the
    /// current tip's. Returns false if the block was already stored.
    fn store_block(&self, block: &Block) -> Result<bool> {
        self.store.update(|tx| {
            if tx.get(BLOCKS_TREE, block.get_hash())?.is_some() {
                return Ok(false);
            }
            Self::put_block(tx, block)?;

            // Blocks from peers can arrive out of order, so I only move the tip
            // forward. A lower or equal block is stored but never becomes the tip.
            let moves_tip = match Self::read_tip_height(&*tx)? {
                Some(tip_height) => block.get_height() > tip_height,
                None => true,
            };
            if moves_tip {
                tx.put(BLOCKS_TREE, TIP_BLOCK_HASH_KEY, block.get_hash());
                info!(
                    "Tip moved to {} at height {}",
                    block.get_hash_hex(),
                    block.get_height()
                );
            }
            Ok(true)
        })
    }

    pub fn get_store(&self) -> &KvStore {
        &self.store
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_tip_hash(&self) -> Result<Vec<u8>> {
        self.store
            .view(|tx| tx.get(BLOCKS_TREE, TIP_BLOCK_HASH_KEY))?
            .ok_or_else(|| BlockchainError::NotFound("Tip hash".to_string()))
    }

    /// Validates `transactions`, mines them into a block on `prev_hash` at
    /// `height + 1` and persists the result.
    pub fn append(
        &self,
        prev_hash: &[u8],
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        for transaction in transactions {
            if !transaction.verify(self)? {
                return Err(BlockchainError::Validation(format!(
                    "Invalid transaction {}",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
        }
        // Signatures alone are not enough: the same output must not be spent
        // twice in this block or spent again after an earlier block took it.
        Self::check_for_double_spending(transactions)?;
        for transaction in transactions {
            self.validate_transaction_inputs(transaction)?;
        }

        info!(
            "Mining block at height {} with {} transactions",
            height + 1,
            transactions.len()
        );
        let block = Block::new_block(
            prev_hash.to_vec(),
            transactions,
            height + 1,
            self.target_bits,
        )?;
        self.store_block(&block)?;
        info!(
            "Successfully mined block {} (nonce {})",
            block.get_hash_hex(),
            block.get_nonce()
        );
        Ok(block)
    }

    /// Appends `transactions` on top of the current tip
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        let (tip_hash, best_height) = self.store.view(|tx| {
            let tip_hash = tx
                .get(BLOCKS_TREE, TIP_BLOCK_HASH_KEY)?
                .ok_or_else(|| BlockchainError::NotFound("Tip hash".to_string()))?;
            let height = Self::read_tip_height(tx)?.unwrap_or_default();
            Ok((tip_hash, height))
        })?;
        self.append(&tip_hash, transactions, best_height)
    }

    /// Stores a block mined elsewhere. Non-genesis blocks must carry valid
    /// proof-of-work and a matching Merkle root. Returns false when the block
    /// was already known.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        // Height and previous hash must agree on whether this is a genesis block,
        // otherwise a peer could dodge the work check by claiming height 0.
        match (block.get_height() == 0, block.is_genesis()) {
            (true, true) => {}
            (true, false) => {
                return Err(BlockchainError::Validation(format!(
                    "Block {} claims height 0 but has a previous hash",
                    block.get_hash_hex()
                )));
            }
            (false, true) => {
                return Err(BlockchainError::Validation(format!(
                    "Block {} at height {} has no previous hash",
                    block.get_hash_hex(),
                    block.get_height()
                )));
            }
            (false, false) => {
                if block.get_bits() != i64::from(self.target_bits) {
                    return Err(BlockchainError::Validation(format!(
                        "Block {} was mined at {} bits, this node requires {}",
                        block.get_hash_hex(),
                        block.get_bits(),
                        self.target_bits
                    )));
                }
                if !ProofOfWork::validate_at(block, self.target_bits) {
                    return Err(BlockchainError::Validation(format!(
                        "Block {} fails proof-of-work",
                        block.get_hash_hex()
                    )));
                }
            }
        }
        if double_sha256(&header_bytes(block, block.get_nonce())) != block.get_hash() {
            return Err(BlockchainError::Validation(format!(
                "Block {} does not hash to its header",
                block.get_hash_hex()
            )));
        }
        if !block.verify_merkle_root() {
            return Err(BlockchainError::Validation(format!(
                "Block {} has a mismatched Merkle root",
                block.get_hash_hex()
            )));
        }

        let stored = self.store_block(block)?;
        if stored {
            info!(
                "Added block {} at height {}",
                block.get_hash_hex(),
                block.get_height()
            );
        } else {
            info!("Ignoring known block {}", block.get_hash_hex());
        }
        Ok(stored)
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator::new(self.get_tip_hash()?, self.store.clone()))
    }

    pub fn get_best_height(&self) -> Result<usize> {
        self.store
            .view(|tx| Self::read_tip_height(tx))?
            .ok_or_else(|| BlockchainError::NotFound("Tip hash".to_string()))
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        self.store.view(|tx| Self::read_block(tx, block_hash))
    }

    pub fn block_exists(&self, block_hash: &[u8]) -> Result<bool> {
        Ok(self
            .store
            .view(|tx| tx.get(BLOCKS_TREE, block_hash))?
            .is_some())
    }

    /// Block hashes from tip to genesis
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut blocks = vec![];
        for block in self.iterator()? {
            blocks.push(block?.get_hash().to_vec());
        }
        Ok(blocks)
    }

    /// Full rebuild of the unspent-output map from the chain.
    ///
    /// Walks tip to genesis once. Within a block transactions are visited last
    /// to first so an output spent later in the same block is never recorded.
    pub fn find_utxo(&self) -> Result<HashMap<Vec<u8>, Vec<UnspentOutput>>> {
        let mut utxo: HashMap<Vec<u8>, Vec<UnspentOutput>> = HashMap::new();
        let mut spent_txos: HashSet<(Vec<u8>, i64)> = HashSet::new();

        for block in self.iterator()? {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    let outpoint = (tx.get_id().to_vec(), idx as i64);
                    if spent_txos.contains(&outpoint) {
                        continue;
                    }
                    utxo.entry(tx.get_id().to_vec())
                        .or_default()
                        .push(UnspentOutput::new(idx, out.clone()));
                }
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos.insert((txin.get_txid().to_vec(), txin.get_vout()));
                }
            }
        }
        Ok(utxo)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iterator()? {
            for transaction in block?.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Ok(Some(transaction.clone()));
                }
            }
        }
        Ok(None)
    }

    // The same output may not be spent twice within one block
    fn check_for_double_spending(transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(Vec<u8>, i64)> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let output_reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent_outputs.insert(output_reference) {
                    return Err(BlockchainError::Validation(format!(
                        "Double-spending detected in transaction {}: output {}:{} already spent in this block",
                        tx_index,
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// True if some input on the chain already references `txid:vout`
    pub fn is_output_spent(&self, txid: &[u8], vout: i64) -> Result<bool> {
        for block in self.iterator()? {
            for transaction in block?.get_transactions() {
                if transaction.is_coinbase() {
                    continue;
                }
                if transaction
                    .get_vin()
                    .iter()
                    .any(|input| input.get_txid() == txid && input.get_vout() == vout)
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn validate_transaction_inputs(&self, transaction: &Transaction) -> Result<()> {
        if transaction.is_coinbase() {
            return Ok(());
        }
        for input in transaction.get_vin() {
            if self.is_output_spent(input.get_txid(), input.get_vout())? {
                warn!(
                    "Rejecting transaction {}: input {}:{} already spent",
                    HEXLOWER.encode(transaction.get_id()),
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                );
                return Err(BlockchainError::Validation(format!(
                    "Input already spent: {}:{}",
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                )));
            }
        }
        Ok(())
    }
}

impl TransactionLookup for Blockchain {
    fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        Blockchain::find_transaction(self, txid)
    }
}

/// Backward walk from a starting hash to genesis. Finite and restartable; a
/// missing block ends the walk with an error item.
pub struct BlockchainIterator {
    store: KvStore,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, store: KvStore) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            store,
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        let current = std::mem::take(&mut self.current_hash);
        match self.store.view(|tx| Blockchain::read_block(tx, &current)) {
            Ok(Some(block)) => {
                self.current_hash = block.get_prev_block_hash().to_vec();
                Some(Ok(block))
            }
            Ok(None) => Some(Err(BlockchainError::NotFound(format!(
                "Block {}",
                HEXLOWER.encode(&current)
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
