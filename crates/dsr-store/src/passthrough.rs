use std::sync::Arc;

use async_trait::async_trait;
use dsr_backend::{Backend, ScanItem, ScanOptions};
use dsr_types::{Entry, QuerySpec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::query::{entry_stream, EntryResolver};
use crate::traits::{EntryStream, KvStore};

/// Store that writes values directly under their keys.
///
/// No deduplication and no reference records: `put` overwrites and `delete`
/// removes the value. Each operation is a single backend call, so no store
/// lock is needed.
#[derive(Clone)]
pub struct PassThroughStore {
    backend: Arc<dyn Backend>,
}

impl PassThroughStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        debug!(backend = backend.kind(), "pass-through store ready");
        Self { backend }
    }
}

#[async_trait]
impl KvStore for PassThroughStore {
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.backend.put(key.as_bytes(), value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.backend
            .get(key.as_bytes())
            .await?
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.backend.has(key.as_bytes()).await?)
    }

    async fn get_size(&self, key: &str) -> StoreResult<u64> {
        self.backend
            .size(key.as_bytes())
            .await?
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.backend.delete(key.as_bytes()).await?)
    }

    async fn query(&self, spec: QuerySpec, cancel: CancellationToken) -> StoreResult<EntryStream> {
        spec.validate()?;
        let opts = ScanOptions {
            prefix: spec.prefix.clone().into_bytes(),
            case_insensitive: spec.case_insensitive,
            keys_only: spec.keys_only,
        };
        let cursor = self.backend.scan(opts).await?;
        Ok(entry_stream(cursor, &spec, RawEntries, cancel))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(self.backend.flush().await?)
    }
}

struct RawEntries;

#[async_trait]
impl EntryResolver for RawEntries {
    async fn resolve(&self, item: ScanItem, keys_only: bool) -> StoreResult<Option<Entry>> {
        let key = String::from_utf8(item.key)
            .map_err(|e| StoreError::Internal(format!("non-UTF-8 key: {e}")))?;
        Ok(Some(match item.value {
            Some(value) if !keys_only => Entry::with_value(key, value),
            _ => Entry::key_only(key, item.size),
        }))
    }
}

#[cfg(test)]
mod tests {
    use dsr_backend::MemoryBackend;
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn put_overwrites() {
        let store = PassThroughStore::new(Arc::new(MemoryBackend::new()));
        store.put("k", b"first").await.unwrap();
        store.put("k", b"second!").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"second!".to_vec());
        assert_eq!(store.get_size("k").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn missing_keys() {
        let store = PassThroughStore::new(Arc::new(MemoryBackend::new()));
        assert!(store.get("nope").await.unwrap_err().is_not_found());
        assert!(store.get_size("nope").await.unwrap_err().is_not_found());
        assert!(!store.has("nope").await.unwrap());
        assert!(!store.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn query_streams_in_key_order() {
        let backend = MemoryBackend::new();
        let store = PassThroughStore::new(Arc::new(backend.clone()));
        for key in ["a/3", "a/1", "b/1", "a/2"] {
            store.put(key, key.as_bytes()).await.unwrap();
        }

        let entries: Vec<Entry> = store
            .query(QuerySpec::with_prefix("a/").limit(2).keys_only(), CancellationToken::new())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(entries, vec![Entry::key_only("a/1", 3), Entry::key_only("a/2", 3)]);
        assert_eq!(backend.open_cursors(), 0);
    }
}
