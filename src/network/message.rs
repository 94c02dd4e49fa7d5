//! Wire messages: a zero-padded command name followed by a bincode payload.

use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

/// Width of the command prefix on every message
pub const COMMAND_LENGTH: usize = 12;

pub const NODE_VERSION: i64 = 1;

/// Inventory item kind for blocks
pub const ITEM_BLOCK: &str = "block";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Version {
    pub version: i64,
    pub best_height: usize,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetBlocks {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Inv {
    pub addr_from: String,
    pub kind: String,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetData {
    pub addr_from: String,
    pub kind: String,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockData {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(Version),
    GetBlocks(GetBlocks),
    Inv(Inv),
    GetData(GetData),
    Block(BlockData),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
        }
    }

    pub fn addr_from(&self) -> &str {
        match self {
            Message::Version(m) => &m.addr_from,
            Message::GetBlocks(m) => &m.addr_from,
            Message::Inv(m) => &m.addr_from,
            Message::GetData(m) => &m.addr_from,
            Message::Block(m) => &m.addr_from,
        }
    }

    /// Command prefix followed by the payload bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::Version(m) => serialize(m)?,
            Message::GetBlocks(m) => serialize(m)?,
            Message::Inv(m) => serialize(m)?,
            Message::GetData(m) => serialize(m)?,
            Message::Block(m) => serialize(m)?,
        };
        let mut bytes = command_to_bytes(self.command())?.to_vec();
        bytes.extend(payload);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Message> {
        if bytes.len() < COMMAND_LENGTH {
            return Err(BlockchainError::Protocol(format!(
                "Frame of {} bytes is shorter than the command prefix",
                bytes.len()
            )));
        }
        let (prefix, payload) = bytes.split_at(COMMAND_LENGTH);
        let command = bytes_to_command(prefix)?;
        match command.as_str() {
            "version" => Ok(Message::Version(deserialize(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(deserialize(payload)?)),
            "inv" => Ok(Message::Inv(deserialize(payload)?)),
            "getdata" => Ok(Message::GetData(deserialize(payload)?)),
            "block" => Ok(Message::Block(deserialize(payload)?)),
            other => Err(BlockchainError::Protocol(format!("Unknown command {other:?}"))),
        }
    }
}

/// Zero-pads `command` to [`COMMAND_LENGTH`] bytes
pub fn command_to_bytes(command: &str) -> Result<[u8; COMMAND_LENGTH]> {
    let raw = command.as_bytes();
    if raw.len() > COMMAND_LENGTH {
        return Err(BlockchainError::Protocol(format!(
            "Command {command:?} exceeds {COMMAND_LENGTH} bytes"
        )));
    }
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..raw.len()].copy_from_slice(raw);
    Ok(bytes)
}

/// Recovers a command name by dropping the zero padding
pub fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| BlockchainError::Protocol(format!("Command is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_padding() {
        let bytes = command_to_bytes("inv").unwrap();
        assert_eq!(&bytes[..3], b"inv");
        assert!(bytes[3..].iter().all(|b| *b == 0));
        assert_eq!(bytes_to_command(&bytes).unwrap(), "inv");
    }

    #[test]
    fn test_full_width_command() {
        let bytes = command_to_bytes("abcdefghijkl").unwrap();
        assert_eq!(bytes_to_command(&bytes).unwrap(), "abcdefghijkl");
        assert!(command_to_bytes("abcdefghijklm").is_err());
    }

    #[test]
    fn test_frame_layout() {
        let msg = Message::GetBlocks(GetBlocks {
            addr_from: "127.0.0.1:3001".to_string(),
        });
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes_to_command(&bytes[..COMMAND_LENGTH]).unwrap(), "getblocks");
        let payload: GetBlocks = deserialize(&bytes[COMMAND_LENGTH..]).unwrap();
        assert_eq!(payload.addr_from, "127.0.0.1:3001");
    }

    #[test]
    fn test_decode_every_command() {
        let messages = vec![
            Message::Version(Version {
                version: NODE_VERSION,
                best_height: 7,
                addr_from: "a".to_string(),
            }),
            Message::Inv(Inv {
                addr_from: "b".to_string(),
                kind: ITEM_BLOCK.to_string(),
                items: vec![vec![1; 32], vec![2; 32]],
            }),
            Message::GetData(GetData {
                addr_from: "c".to_string(),
                kind: ITEM_BLOCK.to_string(),
                id: vec![3; 32],
            }),
            Message::Block(BlockData {
                addr_from: "d".to_string(),
                block: vec![4; 10],
            }),
        ];
        for msg in messages {
            let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded.command(), msg.command());
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut bytes = command_to_bytes("tx").unwrap().to_vec();
        bytes.extend([0u8; 4]);
        assert!(matches!(
            Message::decode(&bytes),
            Err(BlockchainError::Protocol(_))
        ));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(matches!(
            Message::decode(b"ver"),
            Err(BlockchainError::Protocol(_))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let msg = Message::Version(Version {
            version: NODE_VERSION,
            best_height: 1,
            addr_from: "127.0.0.1:3000".to_string(),
        });
        let bytes = msg.encode().unwrap();
        assert!(Message::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
