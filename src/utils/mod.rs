//! Codec utilities
//!
//! Hashing, base58, fixed-width integer encoding, ECDSA helpers and the
//! bincode layer shared by the rest of the crate.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, double_sha256,
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, new_key_pair,
    public_key_from_pkcs8, ripemd160_digest, sha256_digest, split_halves, P256_SCALAR_LEN,
};

pub use serialization::{deserialize, serialize, i64_to_be_bytes};
