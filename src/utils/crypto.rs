use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Byte width of one P-256 field element (a coordinate, or `r`/`s`)
pub const P256_SCALAR_LEN: usize = 32;

/// SEC1 tag for an uncompressed curve point
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// Seconds since the Unix epoch
pub fn current_timestamp() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    i64::try_from(secs).map_err(|_| BlockchainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256_digest(sha256_digest(data).as_slice())
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Leading zero bytes become leading `1` symbols and vice versa.
pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generates a fresh P-256 key pair as a PKCS#8 document.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Raw `X‖Y` public key for a PKCS#8 private key.
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let sec1 = key_pair.public_key().as_ref();
    match sec1.split_first() {
        Some((&SEC1_UNCOMPRESSED_TAG, xy)) => Ok(xy.to_vec()),
        _ => Err(BlockchainError::Crypto(
            "Unexpected public key encoding".to_string(),
        )),
    }
}

/// Signs `message` and returns the raw fixed-width `r‖s` signature.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Splits a byte string into two halves the way `r‖s` and `X‖Y` are stored.
/// The first half gets the shorter share when the length is odd.
pub fn split_halves(data: &[u8]) -> (&[u8], &[u8]) {
    data.split_at(data.len() / 2)
}

/// Interprets `data` as a big-endian unsigned integer and renders it as a
/// fixed-width field element. `None` if the value does not fit.
fn to_field_element(data: &[u8]) -> Option<[u8; P256_SCALAR_LEN]> {
    let first_non_zero = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    let significant = &data[first_non_zero..];
    if significant.len() > P256_SCALAR_LEN {
        return None;
    }
    let mut out = [0u8; P256_SCALAR_LEN];
    out[P256_SCALAR_LEN - significant.len()..].copy_from_slice(significant);
    Some(out)
}

/// Reconstructs the curve point from `x`/`y` and the signature from `r`/`s`,
/// then runs ECDSA verification of `message`.
pub fn ecdsa_p256_sha256_sign_verify(
    x: &[u8],
    y: &[u8],
    r: &[u8],
    s: &[u8],
    message: &[u8],
) -> bool {
    let (Some(x), Some(y), Some(r), Some(s)) = (
        to_field_element(x),
        to_field_element(y),
        to_field_element(r),
        to_field_element(s),
    ) else {
        return false;
    };

    let mut point = Vec::with_capacity(1 + 2 * P256_SCALAR_LEN);
    point.push(SEC1_UNCOMPRESSED_TAG);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);

    let mut signature = Vec::with_capacity(2 * P256_SCALAR_LEN);
    signature.extend_from_slice(&r);
    signature.extend_from_slice(&s);

    let public_key = ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point);
    public_key.verify(message, signature.as_slice()).is_ok()
}
