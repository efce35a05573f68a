//! Strong type definitions for the breadcrumb ledger.
//!
//! Hash-valued identifiers are newtypes to prevent mixing them up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte block hash: SHA-256 over `<canonical pre-image>:<signature hex>`.
///
/// This is the value the next block references as its `previous_hash`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Create a new BlockHash from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl TryFrom<&[u8]> for BlockHash {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// Digest binding a block's cell, timestamp, and optional motion snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextDigest(pub [u8; 32]);

impl ContextDigest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextDigest({})", &self.to_hex()[..16])
    }
}

impl TryFrom<&[u8]> for ContextDigest {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_hex_is_lowercase_full_width() {
        let h = BlockHash::from_bytes([0xc4; 32]);
        assert_eq!(h.to_hex(), "c4".repeat(32));
    }

    #[test]
    fn test_block_hash_display() {
        let h = BlockHash::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", h), "abababababababab");
        assert!(format!("{:?}", h).starts_with("BlockHash("));
    }

    #[test]
    fn test_try_from_slice_length() {
        assert!(BlockHash::try_from(&[0u8; 31][..]).is_err());
        assert!(ContextDigest::try_from(&[0u8; 32][..]).is_ok());
    }
}
