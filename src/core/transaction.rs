// Transactions move value between public-key hashes using the UTXO model.
// Each input points at an output of an earlier transaction; each output locks
// a value to the hash of the key that may spend it.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest, split_halves,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, validate_address, Wallets};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Reward paid by every coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Output index carried by the coinbase input
pub const COINBASE_VOUT: i64 = -1;

/// Resolves previously recorded transactions by id
pub trait TransactionLookup {
    fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>>;
}

impl TransactionLookup for HashMap<Vec<u8>, Transaction> {
    fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        Ok(self.get(txid).cloned())
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // id of the transaction holding the spent output
    vout: i64,          // index of that output, -1 for coinbase
    signature: Vec<u8>, // raw r‖s
    pub_key: Vec<u8>,   // spender's raw X‖Y public key
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, `None` for the coinbase marker
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Output of `value` locked to the key behind `address`
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn with_pub_key_hash(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        self.pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Coinbase paying [`SUBSIDY`] to `to`
    pub fn new_coinbase_tx(to: &str) -> Result<Transaction> {
        let pub_key_hash = address_to_pub_key_hash(to)?;
        Self::new_coinbase_tx_to_hash(&pub_key_hash)
    }

    pub fn new_coinbase_tx_to_hash(pub_key_hash: &[u8]) -> Result<Transaction> {
        // The random signature only keeps coinbase ids unique; it is never verified.
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: Uuid::new_v4().as_bytes().to_vec(),
            pub_key: vec![],
        };
        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::with_pub_key_hash(SUBSIDY, pub_key_hash)],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds and signs a transfer of `amount` from `from` to `to`.
    ///
    /// Spendable outputs of `from` are taken from the UTXO index until they
    /// cover `amount`; any surplus is returned to `from` as a change output.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        wallets: &Wallets,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        if !validate_address(from) {
            return Err(BlockchainError::InvalidAddress(format!(
                "Invalid from address: {from}"
            )));
        }
        if !validate_address(to) {
            return Err(BlockchainError::InvalidAddress(format!(
                "Invalid to address: {to}"
            )));
        }

        let wallet = wallets
            .get_wallet(from)
            .ok_or_else(|| BlockchainError::NotFound(format!("Wallet for address {from}")))?;
        let public_key_hash = hash_pub_key(wallet.get_public_key());

        // I ask the UTXO index for just enough of my outputs to cover the amount
        let spendable = utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if spendable.accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: spendable.accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid, vout) in &spendable.outputs {
            let vout = i64::try_from(*vout)
                .map_err(|_| BlockchainError::Validation("Output index overflow".to_string()))?;
            inputs.push(TXInput {
                txid: txid.clone(),
                vout,
                signature: vec![],
                pub_key: wallet.get_public_key().to_vec(),
            });
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        // Whatever I picked beyond the amount comes back to me as change
        let change = spendable.accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::with_pub_key_hash(change, &public_key_hash));
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        tx.sign(wallet.get_pkcs8(), utxo_set.get_blockchain())?;
        Ok(tx)
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Digest signed for input `idx`: the trimmed copy's hash with that input's
    /// key field holding the public-key hash of the output it spends.
    pub fn signing_digest(&self, idx: usize, prev_tx: &Transaction) -> Result<Vec<u8>> {
        let input = self
            .vin
            .get(idx)
            .ok_or_else(|| BlockchainError::Validation(format!("No input at index {idx}")))?;
        let prev_output = input
            .output_index()
            .and_then(|vout| prev_tx.vout.get(vout))
            .ok_or_else(|| {
                BlockchainError::Validation(format!(
                    "Input {idx} references missing output {} of {}",
                    input.get_vout(),
                    HEXLOWER.encode(input.get_txid())
                ))
            })?;

        let mut tx_copy = self.trimmed_copy();
        tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
        tx_copy.hash()
    }

    /// Resolves every transaction referenced by an input
    pub fn previous_transactions<L: TransactionLookup + ?Sized>(
        &self,
        lookup: &L,
    ) -> Result<HashMap<Vec<u8>, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &self.vin {
            if prev_txs.contains_key(input.get_txid()) {
                continue;
            }
            let prev_tx = lookup.find_transaction(input.get_txid())?.ok_or_else(|| {
                BlockchainError::NotFound(format!(
                    "Previous transaction {}",
                    HEXLOWER.encode(input.get_txid())
                ))
            })?;
            prev_txs.insert(input.get_txid().to_vec(), prev_tx);
        }
        Ok(prev_txs)
    }

    /// One `r‖s` signature per input, in input order. Does not touch `self`.
    pub fn signatures(
        &self,
        pkcs8: &[u8],
        prev_txs: &HashMap<Vec<u8>, Transaction>,
    ) -> Result<Vec<Vec<u8>>> {
        let mut signatures = Vec::with_capacity(self.vin.len());
        for (idx, input) in self.vin.iter().enumerate() {
            let prev_tx = prev_txs.get(input.get_txid()).ok_or_else(|| {
                BlockchainError::NotFound(format!(
                    "Previous transaction {}",
                    HEXLOWER.encode(input.get_txid())
                ))
            })?;
            let digest = self.signing_digest(idx, prev_tx)?;
            signatures.push(ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?);
        }
        Ok(signatures)
    }

    /// Signs every input. Coinbase transactions are left untouched.
    pub fn sign<L: TransactionLookup + ?Sized>(&mut self, pkcs8: &[u8], lookup: &L) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.previous_transactions(lookup)?;
        let signatures = self.signatures(pkcs8, &prev_txs)?;
        for (input, signature) in self.vin.iter_mut().zip(signatures) {
            input.signature = signature;
        }
        Ok(())
    }

    /// Checks every input signature against the digest rebuilt from `lookup`.
    ///
    /// Missing previous transactions are an error. A bad signature, a key that
    /// does not own the spent output, a bad output reference or inputs that do
    /// not add up to the outputs yield `Ok(false)`.
    pub fn verify<L: TransactionLookup + ?Sized>(&self, lookup: &L) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let prev_txs = self.previous_transactions(lookup)?;
        let mut input_value: u64 = 0;
        for (idx, input) in self.vin.iter().enumerate() {
            let prev_tx = prev_txs.get(input.get_txid()).ok_or_else(|| {
                BlockchainError::NotFound(format!(
                    "Previous transaction {}",
                    HEXLOWER.encode(input.get_txid())
                ))
            })?;
            let digest = match self.signing_digest(idx, prev_tx) {
                Ok(digest) => digest,
                Err(e) => {
                    warn!("Rejecting transaction {}: {e}", HEXLOWER.encode(&self.id));
                    return Ok(false);
                }
            };
            // signing_digest already resolved this output, so the index is in range
            let Some(prev_output) = input.output_index().and_then(|vout| prev_tx.vout.get(vout))
            else {
                return Ok(false);
            };

            // Only the key whose hash locked the output may unlock it. Without this
            // check anybody could sign with their own key and take my coins.
            if !input.uses_key(prev_output.get_pub_key_hash()) {
                warn!(
                    "Rejecting transaction {}: input {idx} key does not own output {} of {}",
                    HEXLOWER.encode(&self.id),
                    input.get_vout(),
                    HEXLOWER.encode(input.get_txid())
                );
                return Ok(false);
            }

            let (r, s) = split_halves(input.get_signature());
            // The key bytes are taken as stored on the input and split into X/Y.
            let (x, y) = split_halves(input.get_pub_key());
            if !ecdsa_p256_sha256_sign_verify(x, y, r, s, &digest) {
                debug!(
                    "Signature check failed for input {idx} of {}",
                    HEXLOWER.encode(&self.id)
                );
                return Ok(false);
            }

            input_value = match input_value.checked_add(prev_output.get_value()) {
                Some(sum) => sum,
                None => {
                    warn!("Input value overflow in transaction {}", HEXLOWER.encode(&self.id));
                    return Ok(false);
                }
            };
        }

        Ok(self.verify_balance(input_value))
    }

    // There are no fees, so what comes in must be exactly what goes out.
    // If this doesn't balance, someone is trying to create or destroy value.
    fn verify_balance(&self, input_value: u64) -> bool {
        let output_value = self
            .vout
            .iter()
            .try_fold(0u64, |sum, out| sum.checked_add(out.get_value()));
        match output_value {
            Some(output_value) if output_value == input_value => true,
            Some(output_value) => {
                warn!(
                    "Transaction {} is unbalanced: inputs={input_value}, outputs={output_value}",
                    HEXLOWER.encode(&self.id)
                );
                false
            }
            None => {
                warn!("Output value overflow in transaction {}", HEXLOWER.encode(&self.id));
                false
            }
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the serialized transaction with its id cleared
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    #[cfg(test)]
    pub(crate) fn vin_mut(&mut self) -> &mut Vec<TXInput> {
        &mut self.vin
    }
}

impl TXInput {
    #[cfg(test)]
    pub(crate) fn set_pub_key(&mut self, pub_key: &[u8]) {
        self.pub_key = pub_key.to_vec();
    }

    #[cfg(test)]
    pub(crate) fn signature_mut(&mut self) -> &mut Vec<u8> {
        &mut self.signature
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "  Input {i}:")?;
            writeln!(f, "    TXID:      {}", HEXLOWER.encode(&input.txid))?;
            writeln!(f, "    Out:       {}", input.vout)?;
            writeln!(f, "    Signature: {}", HEXLOWER.encode(&input.signature))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "  Output {i}:")?;
            writeln!(f, "    Value:  {}", output.value)?;
            writeln!(f, "    Script: {}", HEXLOWER.encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}
