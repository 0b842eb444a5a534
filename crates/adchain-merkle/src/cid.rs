//! Content identifiers for advertisements.
//!
//! Uses SHA-256 over a canonical encoding of the node. The string form is
//! 64 lowercase hex characters.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a content identifier in bytes.
pub const CID_LEN: usize = 32;

/// Errors produced when decoding a content identifier.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CidParseError {
    #[error("invalid cid length: expected {expected}, got {got}")]
    Length { expected: usize, got: usize },

    #[error("invalid hex digit in cid: {0:?}")]
    Hex(String),

    #[error("empty cid")]
    Empty,
}

/// A 32-byte SHA-256 content identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    /// Create a cid from raw digest bytes.
    pub fn from_digest(bytes: [u8; CID_LEN]) -> Self {
        Cid(bytes)
    }

    /// Decode a cid from a byte slice, as stored in the latest-pointer record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidParseError> {
        if bytes.len() != CID_LEN {
            return Err(CidParseError::Length {
                expected: CID_LEN,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; CID_LEN];
        out.copy_from_slice(bytes);
        Ok(Cid(out))
    }

    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse from the hex string form.
    pub fn from_hex(s: &str) -> Result<Self, CidParseError> {
        if s.is_empty() {
            return Err(CidParseError::Empty);
        }
        if s.len() != CID_LEN * 2 {
            return Err(CidParseError::Length {
                expected: CID_LEN * 2,
                got: s.len(),
            });
        }
        // from_str_radix tolerates a leading sign, so check the digits first.
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CidParseError::Hex(s.to_string()));
        }
        let mut bytes = [0u8; CID_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| CidParseError::Hex(s.to_string()))?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| CidParseError::Hex(pair.to_string()))?;
        }
        Ok(Cid(bytes))
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}...)", self.short())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Cid {
    type Err = CidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::from_hex(s.trim())
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cid::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher producing a [`Cid`].
pub struct CidHasher {
    inner: Sha256,
}

impl CidHasher {
    pub fn new() -> Self {
        CidHasher {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Write a length-prefixed field so adjacent fields cannot alias.
    pub fn update_field(&mut self, data: &[u8]) {
        self.inner.update((data.len() as u64).to_le_bytes());
        self.inner.update(data);
    }

    pub fn finalize(self) -> Cid {
        let result = self.inner.finalize();
        let mut bytes = [0u8; CID_LEN];
        bytes.copy_from_slice(&result);
        Cid(bytes)
    }

    /// Hash data directly.
    pub fn hash(data: &[u8]) -> Cid {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl Default for CidHasher {
    fn default() -> Self {
        Self::new()
    }
}
