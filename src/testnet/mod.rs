//! Shared fixtures for unit tests: in-memory chains, wallets and low-difficulty mining.

pub mod test_utils;

pub use test_utils::*;
