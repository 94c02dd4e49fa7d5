use crate::error::{BlockchainError, Result};
use crate::utils::{
    base58_decode, base58_encode, double_sha256, new_key_pair, public_key_from_pkcs8,
    ripemd160_digest, sha256_digest,
};
use serde::{Deserialize, Serialize};

pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
pub const PUB_KEY_HASH_LEN: usize = 20;

/// Address version byte distinguishing the networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkVersion {
    #[default]
    Main,
    Test,
}

impl NetworkVersion {
    pub fn byte(self) -> u8 {
        match self {
            NetworkVersion::Main => 0x00,
            NetworkVersion::Test => 0x6f,
        }
    }

    pub fn from_byte(byte: u8) -> Option<NetworkVersion> {
        match byte {
            0x00 => Some(NetworkVersion::Main),
            0x6f => Some(NetworkVersion::Test),
            _ => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>, // raw X‖Y
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// Main-network address
    pub fn get_address(&self) -> String {
        self.get_address_for(NetworkVersion::Main)
    }

    pub fn get_address_for(&self, network: NetworkVersion) -> String {
        encode_address(network, &hash_pub_key(self.public_key.as_slice()))
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// RIPEMD160(SHA256(pub_key))
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256(payload)[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

fn encode_address(network: NetworkVersion, pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![network.byte()];
    payload.extend(pub_key_hash);
    let checksum = checksum(payload.as_slice());
    // version + pub_key_hash + checksum
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

/// True when `address` decodes and its checksum matches the recomputed one
pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    actual_checksum.eq(checksum(body).as_slice())
}

/// Main-network address for a public-key hash
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    encode_address(NetworkVersion::Main, pub_key_hash)
}

/// Recovers the public-key hash behind an address
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(BlockchainError::InvalidAddress(address.to_string()));
    }
    let payload = base58_decode(address)?;
    if payload.len() != 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unexpected payload length {}",
            payload.len()
        )));
    }
    if NetworkVersion::from_byte(payload[0]).is_none() {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unknown version byte {:#04x}",
            payload[0]
        )));
    }
    Ok(payload[1..1 + PUB_KEY_HASH_LEN].to_vec())
}
