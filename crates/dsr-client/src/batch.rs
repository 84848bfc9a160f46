use dsr_store::{KvStore, StoreResult};
use tracing::{debug, warn};

use crate::RemoteStore;

#[derive(Clone, Debug, PartialEq, Eq)]
enum BatchOp {
    Put(Vec<u8>),
    Delete,
}

/// Buffered writes applied to a store on [`Batch::commit`].
///
/// Operations are held client-side and replayed in the order they were
/// staged. A later operation on a key replaces any earlier one staged for
/// that key. Commit is not atomic: it stops at the first failing call and
/// the calls made before it stay applied.
pub struct Batch<'a, S: KvStore + ?Sized> {
    store: &'a S,
    ops: Vec<(String, BatchOp)>,
}

impl<'a, S: KvStore + ?Sized> Batch<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.stage(key.into(), BatchOp::Put(value.into()))
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.stage(key.into(), BatchOp::Delete)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn stage(&mut self, key: String, op: BatchOp) -> &mut Self {
        self.ops.retain(|(staged, _)| *staged != key);
        self.ops.push((key, op));
        self
    }

    /// Apply the staged operations. Returns how many were applied.
    pub async fn commit(self) -> StoreResult<usize> {
        let total = self.ops.len();
        for (applied, (key, op)) in self.ops.into_iter().enumerate() {
            let result = match &op {
                BatchOp::Put(value) => self.store.put(&key, value).await,
                BatchOp::Delete => self.store.delete(&key).await.map(|_| ()),
            };
            if let Err(err) = result {
                warn!(key = %key, applied, total, error = %err, "batch commit stopped");
                return Err(err);
            }
        }
        debug!(ops = total, "batch committed");
        Ok(total)
    }
}

impl RemoteStore {
    /// Start a batch of writes against this server.
    pub fn batch(&self) -> Batch<'_, Self> {
        Batch::new(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dsr_backend::MemoryBackend;
    use dsr_store::{DedupStore, StoreConfig, StoreError};

    use super::*;

    fn store() -> DedupStore {
        DedupStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default())
    }

    #[tokio::test]
    async fn nothing_is_written_before_commit() {
        let store = store();
        let mut batch = Batch::new(&store);
        batch.put("a", b"1".to_vec()).put("b", b"2".to_vec());

        assert_eq!(batch.len(), 2);
        assert!(!store.has("a").await.unwrap());

        assert_eq!(batch.commit().await.unwrap(), 2);
        assert_eq!(store.get("a").await.unwrap(), b"1".to_vec());
        assert_eq!(store.get("b").await.unwrap(), b"2".to_vec());
    }

    #[tokio::test]
    async fn later_op_on_same_key_wins() {
        let store = store();
        store.put("gone", b"old").await.unwrap();

        let mut batch = Batch::new(&store);
        batch
            .put("k", b"first".to_vec())
            .delete("k")
            .put("gone", b"back".to_vec())
            .delete("gone");
        assert_eq!(batch.len(), 2);
        batch.commit().await.unwrap();

        assert!(!store.has("k").await.unwrap());
        assert!(!store.has("gone").await.unwrap());
        assert!(store.verify().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn commit_shares_blocks_like_single_puts() {
        let store = store();
        let mut batch = Batch::new(&store);
        batch.put("x", vec![1u8, 2, 3]).put("y", vec![1u8, 2, 3]);
        batch.commit().await.unwrap();

        let block = store.block(&store.hash_of(&[1, 2, 3])).await.unwrap().unwrap();
        assert_eq!(block.ref_count, 2);
    }

    #[tokio::test]
    async fn commit_stops_at_first_failure() {
        let store = RemoteStore::new("http://127.0.0.1:1");
        let mut batch = store.batch();
        batch.put("a", b"v".to_vec());
        assert!(!batch.is_empty());

        let err = batch.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
    }
}
