//! Checksum utilities for checkpoint integrity verification

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TableError};

/// SHA256 checksum of a serialized record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum of a value's JSON encoding.
    ///
    /// Maps in the table model are ordered, so the encoding is stable.
    pub fn of<T: Serialize>(value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&encoded))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fail with [`TableError::ChecksumMismatch`] unless `value` hashes to this checksum
    pub fn verify<T: Serialize>(&self, value: &T) -> Result<()> {
        let actual = Self::of(value)?;
        if actual == *self {
            Ok(())
        } else {
            Err(TableError::ChecksumMismatch {
                expected: self.0.clone(),
                actual: actual.0,
            })
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let value = serde_json::json!({"name": "events", "version": 3});
        assert_eq!(Checksum::of(&value).unwrap(), Checksum::of(&value).unwrap());
    }

    #[test]
    fn test_checksum_different_content() {
        let a = Checksum::of(&serde_json::json!({"version": 1})).unwrap();
        let b = Checksum::of(&serde_json::json!({"version": 2})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_checksum_verification() {
        let value = serde_json::json!({"name": "events"});
        let checksum = Checksum::of(&value).unwrap();
        assert!(checksum.verify(&value).is_ok());
        assert!(matches!(
            checksum.verify(&serde_json::json!({"name": "other"})),
            Err(TableError::ChecksumMismatch { .. })
        ));
    }
}
