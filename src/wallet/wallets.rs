use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::info;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Wallets keyed by address, optionally backed by a file
#[derive(Default)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: Option<PathBuf>,
}

impl Wallets {
    /// Loads `WALLET_FILE` from `data_dir`; a missing file gives an empty collection
    pub fn load(data_dir: &Path) -> Result<Wallets> {
        let path = data_dir.join(WALLET_FILE);
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            path: Some(path.clone()),
        };
        if !path.exists() {
            return Ok(wallets);
        }

        let mut file = File::open(&path)?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)?;
        wallets.wallets = deserialize(&buf[..]).map_err(|e| {
            BlockchainError::Wallet(format!("Corrupt wallet file {}: {e}", path.display()))
        })?;
        info!("Loaded {} wallets from {}", wallets.wallets.len(), path.display());
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = self.add_wallet(wallet);
        self.save()?;
        Ok(address)
    }

    /// Inserts `wallet` without persisting; returns its address
    pub fn add_wallet(&mut self, wallet: Wallet) -> String {
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    /// Addresses in lexical order
    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    /// Writes the collection to its file. In-memory collections are left alone.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_empty_collection() {
        let temp_dir = tempdir().unwrap();
        let wallets = Wallets::load(temp_dir.path()).unwrap();
        assert!(wallets.get_addresses().is_empty());
    }

    #[test]
    fn test_created_wallets_survive_reload() {
        let temp_dir = tempdir().unwrap();
        let mut wallets = Wallets::load(temp_dir.path()).unwrap();
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();

        let reloaded = Wallets::load(temp_dir.path()).unwrap();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(reloaded.get_addresses(), expected);
        assert_eq!(
            reloaded.get_wallet(&first).unwrap().get_public_key(),
            wallets.get_wallet(&first).unwrap().get_public_key()
        );
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(WALLET_FILE), [0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(
            Wallets::load(temp_dir.path()),
            Err(BlockchainError::Wallet(_))
        ));
    }

    #[test]
    fn test_in_memory_collection() {
        let mut wallets = Wallets::default();
        let address = wallets.create_wallet().unwrap();
        assert!(wallets.get_wallet(&address).is_some());
        assert!(wallets.get_wallet("unknown").is_none());
    }
}
