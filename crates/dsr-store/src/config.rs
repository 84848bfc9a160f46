use std::sync::Arc;

use dsr_backend::Backend;
use dsr_crypto::DigestAlgorithm;
use serde::{Deserialize, Serialize};

use crate::dedup::DedupStore;
use crate::passthrough::PassThroughStore;
use crate::traits::KvStore;

/// Which store variant to put in front of the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Content-addressed blocks with reference counting.
    #[default]
    Dedup,
    /// Values stored directly under their keys.
    PassThrough,
}

/// What `put` does when the key is already bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingKeyPolicy {
    /// Leave the existing binding in place; the first write wins.
    #[default]
    Keep,
    /// Unbind the old value and bind the new one under the same write lock.
    Replace,
}

/// Store configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub mode: StoreMode,
    pub digest: DigestAlgorithm,
    /// Namespace shared by both collections.
    pub database: String,
    pub blocks_collection: String,
    pub refs_collection: String,
    pub existing_key: ExistingKeyPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            digest: DigestAlgorithm::default(),
            database: "datastore".to_string(),
            blocks_collection: "blocks".to_string(),
            refs_collection: "block_refs".to_string(),
            existing_key: ExistingKeyPolicy::default(),
        }
    }
}

/// Build the store variant selected by `config` over `backend`.
pub fn open_store(backend: Arc<dyn Backend>, config: &StoreConfig) -> Arc<dyn KvStore> {
    match config.mode {
        StoreMode::Dedup => Arc::new(DedupStore::new(backend, config)),
        StoreMode::PassThrough => Arc::new(PassThroughStore::new(backend)),
    }
}

#[cfg(test)]
mod tests {
    use dsr_backend::MemoryBackend;

    use super::*;

    #[test]
    fn defaults_match_document_store_layout() {
        let config = StoreConfig::default();
        assert_eq!(config.mode, StoreMode::Dedup);
        assert_eq!(config.digest, DigestAlgorithm::Sha256);
        assert_eq!(config.database, "datastore");
        assert_eq!(config.blocks_collection, "blocks");
        assert_eq!(config.refs_collection, "block_refs");
        assert_eq!(config.existing_key, ExistingKeyPolicy::Keep);
    }

    #[test]
    fn parses_partial_toml() {
        let config: StoreConfig = toml::from_str(
            r#"
            mode = "pass_through"
            digest = "blake3"
            existing_key = "replace"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, StoreMode::PassThrough);
        assert_eq!(config.digest, DigestAlgorithm::Blake3);
        assert_eq!(config.existing_key, ExistingKeyPolicy::Replace);
        assert_eq!(config.database, "datastore");
    }

    #[tokio::test]
    async fn open_store_selects_variant() {
        let backend = MemoryBackend::new();
        let config = StoreConfig {
            mode: StoreMode::PassThrough,
            ..StoreConfig::default()
        };
        let store = open_store(Arc::new(backend.clone()), &config);
        store.put("k", b"v").await.unwrap();
        assert!(backend.has(b"k").await.unwrap());

        let dedup = open_store(Arc::new(backend.clone()), &StoreConfig::default());
        dedup.put("d", b"v").await.unwrap();
        assert!(backend.has(b"datastore/block_refs/d").await.unwrap());
    }
}
