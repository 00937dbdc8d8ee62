//! Keys, addresses and signatures
//!
//! An address is the SHA-256 of a compressed secp256k1 public key. Inputs
//! carry the public key, so "may this input spend for owner O" reduces to
//! hashing the key and comparing. Signatures are compact ECDSA over the
//! SHA-256 of the signed bytes.

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub type Address = [u8; 32];

fn crypto_err(what: impl std::fmt::Display) -> ChainError {
    ChainError::CryptoError(what.to_string())
}

/// Fails unless `bytes` is exactly `expected` long.
fn require_len(what: &str, bytes: &[u8], expected: usize) -> Result<(), ChainError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(crypto_err(format!(
            "{} must be {} bytes, got {}",
            what,
            expected,
            bytes.len()
        )))
    }
}

fn digest_message(bytes: &[u8]) -> Result<Message, ChainError> {
    let digest: [u8; 32] = Sha256::digest(bytes).into();
    Message::from_digest_slice(&digest).map_err(|e| crypto_err(format!("bad digest: {}", e)))
}

pub fn address_from_public_key(public_key: &[u8]) -> Address {
    Sha256::digest(public_key).into()
}

pub fn address_to_hex(addr: &Address) -> String {
    hex::encode(addr)
}

/// Parses a 64-character hex address.
pub fn address_from_hex(hex_str: &str) -> Result<Address, ChainError> {
    let mut addr = [0u8; 32];
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| crypto_err(format!("address {:?} is not hex: {}", hex_str, e)))?;
    require_len("Address", &bytes, addr.len())?;
    addr.copy_from_slice(&bytes);
    Ok(addr)
}

/// A secp256k1 key pair. The address is derived, never stored.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::new(&mut OsRng))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        KeyPair {
            public_key: secret_key.public_key(&SECP),
            secret_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        require_len("Secret key", bytes, SECRET_KEY_SIZE)?;
        SecretKey::from_slice(bytes)
            .map(Self::from_secret_key)
            .map_err(|e| crypto_err(format!("secret key out of range: {}", e)))
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| crypto_err(format!("secret key is not hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key_bytes())
    }

    /// Compressed (33-byte) public key, the form inputs carry.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], ChainError> {
        let digest = digest_message(message)?;
        Ok(SECP.sign_ecdsa(&digest, &self.secret_key).serialize_compact())
    }
}

/// Checks a compact signature over `message` against a compressed public key.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    require_len("Public key", public_key_bytes, PUBLIC_KEY_SIZE)?;
    require_len("Signature", signature_bytes, COMPACT_SIGNATURE_SIZE)?;

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| crypto_err(format!("not a curve point: {}", e)))?;
    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| crypto_err(format!("malformed signature: {}", e)))?;

    SECP.verify_ecdsa(&digest_message(message)?, &signature, &public_key)
        .map_err(|_| crypto_err("Signature verification failed"))
}
