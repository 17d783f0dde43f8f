//! Cryptographic utilities for the node
//!
//! This module provides:
//! - SHA-256 hashing and the proof-of-work difficulty predicate
//! - secp256k1 key handling and address derivation

pub mod hash;
pub mod keys;

pub use hash::{hex_meets_difficulty, meets_difficulty, sha256, sha256_hex};
pub use keys::{address_from_private_key, public_key_to_address, KeyError, KeyPair};
