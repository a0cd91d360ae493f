//! Content hashing for upload deduplication.
//!
//! Duplicate detection is content-addressed: two uploads are the same file
//! when the SHA-256 of their raw bytes matches, whatever their filename or
//! declared category.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest of upload bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a complete buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Self::hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Parse from a 64-character hex string (either case).
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(pair).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex. This is the form persisted in upload records.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}
