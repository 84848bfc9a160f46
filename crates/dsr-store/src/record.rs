use chrono::{DateTime, Utc};
use dsr_types::ContentHash;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A physically stored value, shared by every reference that targets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub hash: ContentHash,
    pub value: Vec<u8>,
    /// Number of live references targeting this block.
    pub ref_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentBlock {
    /// A fresh block with a single reference.
    pub fn new(hash: ContentHash, value: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            hash,
            value,
            ref_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn retain(&mut self) {
        self.ref_count += 1;
        self.updated_at = Utc::now();
    }

    /// Drop one reference and return the remaining count.
    pub fn release(&mut self) -> u64 {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.updated_at = Utc::now();
        self.ref_count
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        decode(bytes, "content block")
    }
}

/// Binding of a logical key to a content block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub key: String,
    pub target: ContentHash,
    /// Cached byte length of the target's value.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reference {
    pub fn new(key: impl Into<String>, target: ContentHash, size: u64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            target,
            size,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        decode(bytes, "reference")
    }
}

fn encode<T: Serialize>(record: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| StoreError::Internal(format!("encode failed: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Internal(format!("corrupt {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_digest([byte; 32])
    }

    #[test]
    fn block_encoding_preserves_fields() {
        let mut block = ContentBlock::new(hash(1), b"payload".to_vec());
        block.retain();
        let decoded = ContentBlock::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.ref_count, 2);
    }

    #[test]
    fn release_counts_down_and_saturates() {
        let mut block = ContentBlock::new(hash(2), vec![]);
        block.retain();
        assert_eq!(block.release(), 1);
        assert_eq!(block.release(), 0);
        assert_eq!(block.release(), 0);
    }

    #[test]
    fn reference_encoding_preserves_fields() {
        let reference = Reference::new("a/1", hash(3), 42);
        let decoded = Reference::decode(&reference.encode().unwrap()).unwrap();
        assert_eq!(decoded, reference);
    }

    #[test]
    fn garbage_is_internal_error() {
        let err = Reference::decode(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));
    }
}
