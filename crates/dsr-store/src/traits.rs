use std::pin::Pin;

use async_trait::async_trait;
use dsr_types::{Entry, QuerySpec};
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;

/// Lazy, finite stream of query results.
pub type EntryStream = Pin<Box<dyn Stream<Item = StoreResult<Entry>> + Send>>;

/// Key-value store contract shared by local stores and the remote client.
///
/// Implementations must satisfy:
/// - `delete` of an absent key succeeds and returns `false`.
/// - `get` and `get_size` of an absent key return `StoreError::NotFound`.
/// - `query` yields entries in ascending key order and stops producing as
///   soon as the cancellation token fires.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Bind `key` to `value`.
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    async fn has(&self, key: &str) -> StoreResult<bool>;

    /// Byte length of the value bound to `key`.
    async fn get_size(&self, key: &str) -> StoreResult<u64>;

    /// Unbind `key`. Returns `true` if it was bound.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Stream entries matching `spec`.
    async fn query(&self, spec: QuerySpec, cancel: CancellationToken) -> StoreResult<EntryStream>;

    /// Flush pending writes and release resources.
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
