//! ECDSA key management
//!
//! Key pair generation, address derivation and signing using the secp256k1
//! curve. Addresses follow the Bitcoin P2PKH layout:
//! Base58Check(0x00 || RIPEMD160(SHA256(pubkey))).

use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::hash::sha256;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Public key as hex (compressed SEC1)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign arbitrary data; the data is hashed with SHA-256 first.
    /// Returns the compact signature.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(&sha256(data))?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    /// Verify a compact signature produced by [`KeyPair::sign`]
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(&sha256(data))?;
        let sig = secp256k1::ecdsa::Signature::from_compact(signature)
            .map_err(|_| KeyError::InvalidSignature)?;
        Ok(secp.verify_ecdsa(&message, &sig, &self.public_key).is_ok())
    }
}

/// Convert a public key to an address
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let sha256_hash = sha256(&public_key.serialize());

    let mut ripemd = Ripemd160::new();
    ripemd.update(&sha256_hash);
    let ripemd_hash = ripemd.finalize();

    // Version byte (0x00 for mainnet)
    let mut address_bytes = vec![0x00];
    address_bytes.extend_from_slice(&ripemd_hash);

    // Checksum is the first 4 bytes of double SHA256
    let checksum = {
        let first_hash = Sha256::digest(&address_bytes);
        Sha256::digest(first_hash)
    };
    address_bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(address_bytes).into_string()
}

/// Derive the address that owns outputs paid to the holder of `private_key_hex`
pub fn address_from_private_key(private_key_hex: &str) -> Result<String, KeyError> {
    Ok(KeyPair::from_private_key_hex(private_key_hex)?.address())
}
