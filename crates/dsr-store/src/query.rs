//! Cursor-to-stream bridge shared by every store variant.
//!
//! A query turns into a lazy [`EntryStream`]: each poll advances the backend
//! cursor until one matching entry is resolved, so nothing is produced ahead
//! of the consumer. The cursor is closed when the scan is exhausted, the
//! limit is reached, the token is cancelled or an error is yielded. Dropping
//! the stream drops the cursor, which releases it as well.

use async_trait::async_trait;
use dsr_backend::{Cursor, ScanItem};
use dsr_types::{Entry, QuerySpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::traits::EntryStream;

/// Turns raw scan items into caller-visible entries.
#[async_trait]
pub trait EntryResolver: Send + Sync + 'static {
    /// Resolve one scan item. `Ok(None)` skips it, e.g. when the key was
    /// removed after the cursor passed it.
    async fn resolve(&self, item: ScanItem, keys_only: bool) -> StoreResult<Option<Entry>>;
}

/// Wrap `cursor` into a stream of entries shaped by `spec`.
///
/// `spec.prefix` must already be applied to the cursor; the bridge applies
/// `offset`, `limit` and `keys_only`.
pub fn entry_stream<R: EntryResolver>(
    cursor: Box<dyn Cursor>,
    spec: &QuerySpec,
    resolver: R,
    cancel: CancellationToken,
) -> EntryStream {
    let state = Bridge {
        id: Uuid::now_v7(),
        cursor: Some(cursor),
        resolver,
        keys_only: spec.keys_only,
        skip: spec.offset,
        remaining: spec.effective_limit(),
        yielded: 0,
        cancel,
    };
    debug!(
        query_id = %state.id,
        prefix = %spec.prefix,
        offset = spec.offset,
        limit = spec.limit,
        keys_only = spec.keys_only,
        "query started"
    );

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        let item = state.step().await?;
        Some((item, state))
    }))
}

struct Bridge<R> {
    id: Uuid,
    /// `None` once the stream has finished.
    cursor: Option<Box<dyn Cursor>>,
    resolver: R,
    keys_only: bool,
    skip: u64,
    remaining: Option<u64>,
    yielded: u64,
    cancel: CancellationToken,
}

impl<R: EntryResolver> Bridge<R> {
    async fn step(&mut self) -> Option<StoreResult<Entry>> {
        loop {
            let cursor = self.cursor.as_mut()?;
            let advanced = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = cursor.next() => Some(next),
            };

            let item = match advanced {
                None => {
                    self.finish("cancelled").await;
                    return None;
                }
                Some(Err(err)) => {
                    self.finish("cursor error").await;
                    return Some(Err(err.into()));
                }
                Some(Ok(None)) => {
                    self.finish("exhausted").await;
                    return None;
                }
                Some(Ok(Some(item))) => item,
            };

            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }

            let entry = match self.resolver.resolve(item, self.keys_only).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    self.finish("resolve error").await;
                    return Some(Err(err));
                }
            };

            if self.cancel.is_cancelled() {
                self.finish("cancelled").await;
                return None;
            }

            self.yielded += 1;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
                if *remaining == 0 {
                    self.finish("limit reached").await;
                }
            }
            return Some(Ok(entry));
        }
    }

    async fn finish(&mut self, reason: &'static str) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(err) = cursor.close().await {
                warn!(query_id = %self.id, error = %err, "failed to close query cursor");
            }
            debug!(query_id = %self.id, yielded = self.yielded, reason, "query finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dsr_backend::{Backend, BackendError, BackendResult, MemoryBackend, ScanOptions};
    use futures::StreamExt;

    use super::*;
    use crate::error::StoreError;

    struct Utf8Keys;

    #[async_trait]
    impl EntryResolver for Utf8Keys {
        async fn resolve(&self, item: ScanItem, keys_only: bool) -> StoreResult<Option<Entry>> {
            let key = String::from_utf8(item.key).map_err(|e| StoreError::Internal(e.to_string()))?;
            if key.ends_with("skip") {
                return Ok(None);
            }
            if key.ends_with("poison") {
                return Err(StoreError::Internal("poisoned entry".into()));
            }
            Ok(Some(match (keys_only, item.value) {
                (false, Some(value)) => Entry::with_value(key, value),
                _ => Entry::key_only(key, item.size),
            }))
        }
    }

    async fn backend(keys: &[&str]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        for key in keys {
            backend.put(key.as_bytes(), key.as_bytes()).await.unwrap();
        }
        backend
    }

    async fn run(backend: &MemoryBackend, spec: QuerySpec) -> Vec<String> {
        let cursor = backend.scan(ScanOptions::prefix(spec.prefix.clone())).await.unwrap();
        entry_stream(cursor, &spec, Utf8Keys, CancellationToken::new())
            .map(|r| r.unwrap().key)
            .collect()
            .await
    }

    #[tokio::test]
    async fn applies_offset_and_limit() {
        let b = backend(&["a/1", "a/2", "a/3", "a/4", "b/1"]).await;
        assert_eq!(run(&b, QuerySpec::with_prefix("a/").limit(2)).await, vec!["a/1", "a/2"]);
        assert_eq!(
            run(&b, QuerySpec::with_prefix("a/").offset(1).limit(2)).await,
            vec!["a/2", "a/3"]
        );
        assert_eq!(run(&b, QuerySpec::with_prefix("a/").offset(10)).await, Vec::<String>::new());
        assert_eq!(b.open_cursors(), 0);
    }

    #[tokio::test]
    async fn skipped_items_do_not_count_toward_limit() {
        let b = backend(&["a/1", "a/2skip", "a/3"]).await;
        assert_eq!(run(&b, QuerySpec::with_prefix("a/").limit(2)).await, vec!["a/1", "a/3"]);
    }

    #[tokio::test]
    async fn keys_only_omits_values() {
        let b = backend(&["k1", "k2"]).await;
        let spec = QuerySpec::default().keys_only();
        let cursor = b.scan(ScanOptions::default()).await.unwrap();
        let entries: Vec<_> = entry_stream(cursor, &spec, Utf8Keys, CancellationToken::new())
            .collect()
            .await;
        for entry in entries {
            let entry = entry.unwrap();
            assert!(entry.value.is_none());
            assert_eq!(entry.size, 2);
        }
    }

    #[tokio::test]
    async fn limit_releases_cursor_before_next_poll() {
        let b = backend(&["a/1", "a/2", "a/3"]).await;
        let spec = QuerySpec::default().limit(1);
        let cursor = b.scan(ScanOptions::default()).await.unwrap();
        let mut stream = entry_stream(cursor, &spec, Utf8Keys, CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap().key, "a/1");
        assert_eq!(b.open_cursors(), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_after_current_item() {
        let b = backend(&["a/1", "a/2", "a/3"]).await;
        let token = CancellationToken::new();
        let cursor = b.scan(ScanOptions::default()).await.unwrap();
        let mut stream = entry_stream(cursor, &QuerySpec::default(), Utf8Keys, token.clone());

        assert_eq!(stream.next().await.unwrap().unwrap().key, "a/1");
        token.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
        assert_eq!(b.open_cursors(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_first_poll_yields_nothing() {
        let b = backend(&["a/1"]).await;
        let token = CancellationToken::new();
        token.cancel();
        let cursor = b.scan(ScanOptions::default()).await.unwrap();
        let mut stream = entry_stream(cursor, &QuerySpec::default(), Utf8Keys, token);
        assert!(stream.next().await.is_none());
        assert_eq!(b.open_cursors(), 0);
    }

    #[tokio::test]
    async fn resolve_error_is_yielded_once_then_ends() {
        let b = backend(&["a/1", "a/2poison", "a/3"]).await;
        let cursor = b.scan(ScanOptions::default()).await.unwrap();
        let mut stream = entry_stream(cursor, &QuerySpec::default(), Utf8Keys, CancellationToken::new());

        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(stream.next().await, Some(Err(StoreError::Internal(_)))));
        assert!(stream.next().await.is_none());
        assert_eq!(b.open_cursors(), 0);
    }

    #[tokio::test]
    async fn dropping_stream_releases_cursor() {
        let b = backend(&["a/1", "a/2"]).await;
        let cursor = b.scan(ScanOptions::default()).await.unwrap();
        let mut stream = entry_stream(cursor, &QuerySpec::default(), Utf8Keys, CancellationToken::new());
        assert!(stream.next().await.is_some());
        assert_eq!(b.open_cursors(), 1);
        drop(stream);
        assert_eq!(b.open_cursors(), 0);
    }

    struct FailingCursor {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Cursor for FailingCursor {
        async fn next(&mut self) -> BackendResult<Option<ScanItem>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(BackendError::Unavailable("engine offline".into()))
        }

        async fn close(&mut self) -> BackendResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cursor_error_maps_to_backend_unavailable() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let cursor = Box::new(FailingCursor { calls: Arc::clone(&calls) });
        let mut stream = entry_stream(cursor, &QuerySpec::default(), Utf8Keys, CancellationToken::new());
        assert!(matches!(stream.next().await, Some(Err(StoreError::BackendUnavailable(_)))));
        assert!(stream.next().await.is_none());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
