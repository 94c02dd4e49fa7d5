use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::storage::{KvRead, WriteTx};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket holding txid -> unspent outputs of that transaction
pub const UTXO_TREE: &str = "chainstate";

/// An unspent output together with its position in the creating transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    pub index: usize,
    pub output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }
}

/// Result of a spendable-output selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendableOutputs {
    /// Sum of the selected outputs; below the requested amount when funds run short
    pub accumulated: u64,
    /// Selected (txid, output index) pairs in index order
    pub outputs: Vec<(Vec<u8>, usize)>,
}

/// Index of unspent outputs derived from the chain held by a [`Blockchain`]
#[derive(Clone)]
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Picks outputs locked to `pub_key_hash` until their sum reaches `amount`
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<SpendableOutputs> {
        let entries = self.entries()?;
        let mut selection = SpendableOutputs::default();

        // I stop as soon as I have enough; the caller turns a short sum into
        // InsufficientFunds, so I never build a partial transaction here.
        'select: for (txid, outs) in entries {
            for unspent in outs {
                if selection.accumulated >= amount {
                    break 'select;
                }
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    selection.accumulated += unspent.output.get_value();
                    selection.outputs.push((txid.clone(), unspent.index));
                }
            }
        }
        Ok(selection)
    }

    /// All unspent outputs locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for (_, outs) in self.entries()? {
            for unspent in outs {
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    utxos.push(unspent.output)
                }
            }
        }
        Ok(utxos)
    }

    pub fn balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Number of transactions that still have unspent outputs
    pub fn count_transactions(&self) -> Result<usize> {
        let store = self.blockchain.get_store();
        Ok(store.view(|tx| tx.cursor(UTXO_TREE))?.len())
    }

    /// The whole index, ordered by txid
    pub fn entries(&self) -> Result<BTreeMap<Vec<u8>, Vec<UnspentOutput>>> {
        let store = self.blockchain.get_store();
        let pairs = store.view(|tx| tx.cursor(UTXO_TREE))?;
        let mut entries = BTreeMap::new();
        for (txid, bytes) in pairs {
            let outs: Vec<UnspentOutput> = deserialize(&bytes)?;
            entries.insert(txid, outs);
        }
        Ok(entries)
    }

    /// Rebuilds the index from a full chain scan, replacing the previous
    /// contents in a single store transaction.
    pub fn reindex(&self) -> Result<()> {
        // I scan the chain first, outside the write transaction, then swap the
        // whole bucket in one go so readers never see a half-built index.
        let utxo_map = self.blockchain.find_utxo()?;
        let count = utxo_map.len();
        self.blockchain.get_store().update(|tx| {
            tx.clear(UTXO_TREE)?;
            for (txid, outs) in &utxo_map {
                tx.put(UTXO_TREE, txid, &serialize(outs)?);
            }
            Ok(())
        })?;
        info!("Reindexed UTXO set: {count} transactions with unspent outputs");
        Ok(())
    }

    /// Applies one newly appended block. Inputs remove the outputs they spend,
    /// then each transaction's outputs are written as a fresh entry. All
    /// changes commit together or not at all.
    pub fn update(&self, block: &Block) -> Result<()> {
        self.blockchain.get_store().update(|tx| {
            for transaction in block.get_transactions() {
                // Coinbase inputs point at nothing, so only real inputs spend
                if !transaction.is_coinbase() {
                    for vin in transaction.get_vin() {
                        Self::spend(tx, vin.get_txid(), vin.get_vout())?;
                    }
                }

                let new_outputs: Vec<UnspentOutput> = transaction
                    .get_vout()
                    .iter()
                    .enumerate()
                    .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                    .collect();
                tx.put(UTXO_TREE, transaction.get_id(), &serialize(&new_outputs)?);
            }
            Ok(())
        })?;
        info!(
            "Updated UTXO set with block {} ({} transactions)",
            block.get_hash_hex(),
            block.get_transactions().len()
        );
        Ok(())
    }

    fn spend(tx: &mut WriteTx<'_>, txid: &[u8], vout: i64) -> Result<()> {
        let outs_bytes = tx.get(UTXO_TREE, txid)?.ok_or_else(|| {
            BlockchainError::Validation(format!(
                "Spent transaction {} has no unspent outputs",
                HEXLOWER.encode(txid)
            ))
        })?;
        let outs: Vec<UnspentOutput> = deserialize(&outs_bytes)?;

        // I keep the original indices of the survivors; renumbering them would
        // break every later input that points at them.
        let before = outs.len();
        let updated_outs: Vec<UnspentOutput> = outs
            .into_iter()
            .filter(|unspent| unspent.index as i64 != vout)
            .collect();
        if updated_outs.len() == before {
            return Err(BlockchainError::Validation(format!(
                "Output {}:{vout} is not unspent",
                HEXLOWER.encode(txid)
            )));
        }

        if updated_outs.is_empty() {
            debug!("All outputs of {} spent", HEXLOWER.encode(txid));
            tx.delete(UTXO_TREE, txid);
        } else {
            tx.put(UTXO_TREE, txid, &serialize(&updated_outs)?);
        }
        Ok(())
    }
}
