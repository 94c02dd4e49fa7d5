//! Error handling for the ledger
//!
//! Every fallible operation returns [`Result`]. Consensus and storage failures
//! are always propagated to the caller; peer connectivity failures are reported
//! as [`BlockchainError::PeerUnreachable`] and handled locally by the network layer.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// A transaction or block failed a consensus check
    Validation(String),
    /// Missing block, transaction, wallet or index entry
    NotFound(String),
    /// Spendable outputs do not cover the requested amount
    InsufficientFunds { required: u64, available: u64 },
    /// Connecting or sending to a peer failed
    PeerUnreachable(String),
    /// The underlying key/value store reported an error
    Storage(String),
    /// The nonce space was exhausted without meeting the target
    MiningExhausted { max_nonce: i64 },
    /// Key handling or signing errors
    Crypto(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Malformed wire frame or unknown command
    Protocol(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format or checksum
    InvalidAddress(String),
    /// Configuration errors
    Config(String),
    /// Wallet operation errors
    Wallet(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::Validation(msg) => write!(f, "Validation failure: {msg}"),
            BlockchainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::PeerUnreachable(addr) => write!(f, "Peer unreachable: {addr}"),
            BlockchainError::Storage(msg) => write!(f, "Storage error: {msg}"),
            BlockchainError::MiningExhausted { max_nonce } => {
                write!(f, "Mining exhausted: no nonce below {max_nonce} meets the target")
            }
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_insufficient_funds() {
        let err = BlockchainError::InsufficientFunds {
            required: 10,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 10, available 4"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BlockchainError = io.into();
        assert!(matches!(err, BlockchainError::Io(_)));
    }
}
