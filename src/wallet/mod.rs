//! Wallet management
//!
//! Key pairs, address derivation and validation, and the wallet collection
//! persisted in the data directory.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, NetworkVersion,
    Wallet, ADDRESS_CHECK_SUM_LEN, PUB_KEY_HASH_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
