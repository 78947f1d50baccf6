//! 32-byte hash newtype used for transaction and block ids.
//!
//! Ids are double-SHA256 of the raw payload. Nodes render them as
//! byte-reversed hex, so `Display`/`from_hex` reverse accordingly.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid hash hex: {0}")]
    InvalidHex(String),
    #[error("invalid hash length {0}, expected 32 bytes")]
    InvalidLength(usize),
}

/// Raw 32-byte hash, stored in wire (little-endian) byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

/// Transaction id (double-SHA256 of the raw transaction)
pub type Txid = Hash256;

/// Block hash (double-SHA256 of the 80-byte header)
pub type BlockHash = Hash256;

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Hash256(out))
    }

    /// Parse the node-facing (byte-reversed) hex representation.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let mut bytes = hex::decode(s).map_err(|_| HashError::InvalidHex(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        bytes.reverse();
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

/// Double SHA-256 over arbitrary bytes.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash256(out)
}
