use std::sync::Arc;

use async_trait::async_trait;
use dsr_types::prefix_matches;

use crate::error::BackendResult;
use crate::traits::{Backend, Cursor, ScanItem, ScanOptions};

/// A named key namespace inside a shared backend.
///
/// Keys are stored under `"{database}/{collection}/"`. Scans see only this
/// namespace and return keys with the namespace stripped.
#[derive(Clone)]
pub struct Collection {
    backend: Arc<dyn Backend>,
    name: String,
    prefix: Vec<u8>,
}

impl Collection {
    pub fn new(backend: Arc<dyn Backend>, database: &str, name: &str) -> Self {
        Self {
            backend,
            name: name.to_string(),
            prefix: format!("{database}/{name}/").into_bytes(),
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared backend this collection lives in.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn raw_key(&self, key: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.prefix.len() + key.len());
        raw.extend_from_slice(&self.prefix);
        raw.extend_from_slice(key);
        raw
    }
}

#[async_trait]
impl Backend for Collection {
    fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    async fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.backend.get(&self.raw_key(key)).await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.backend.put(&self.raw_key(key), value).await
    }

    async fn has(&self, key: &[u8]) -> BackendResult<bool> {
        self.backend.has(&self.raw_key(key)).await
    }

    async fn delete(&self, key: &[u8]) -> BackendResult<bool> {
        self.backend.delete(&self.raw_key(key)).await
    }

    async fn size(&self, key: &[u8]) -> BackendResult<Option<u64>> {
        self.backend.size(&self.raw_key(key)).await
    }

    async fn scan(&self, opts: ScanOptions) -> BackendResult<Box<dyn Cursor>> {
        // The namespace itself is always matched exactly; only the caller's
        // part of the prefix may be case-folded.
        let (inner_opts, filter) = if opts.case_insensitive && !opts.prefix.is_empty() {
            let inner = ScanOptions {
                prefix: self.prefix.clone(),
                case_insensitive: false,
                keys_only: opts.keys_only,
            };
            (inner, Some(opts.prefix))
        } else {
            let inner = ScanOptions {
                prefix: self.raw_key(&opts.prefix),
                case_insensitive: false,
                keys_only: opts.keys_only,
            };
            (inner, None)
        };

        let inner = self.backend.scan(inner_opts).await?;
        Ok(Box::new(CollectionCursor {
            inner,
            strip: self.prefix.len(),
            filter,
        }))
    }

    async fn flush(&self) -> BackendResult<()> {
        self.backend.flush().await
    }
}

/// Cursor that strips the namespace from keys and applies any
/// case-insensitive filter the inner scan could not.
struct CollectionCursor {
    inner: Box<dyn Cursor>,
    strip: usize,
    filter: Option<Vec<u8>>,
}

#[async_trait]
impl Cursor for CollectionCursor {
    async fn next(&mut self) -> BackendResult<Option<ScanItem>> {
        while let Some(mut item) = self.inner.next().await? {
            item.key.drain(..self.strip.min(item.key.len()));
            if let Some(prefix) = &self.filter {
                if !prefix_matches(&item.key, prefix, true) {
                    continue;
                }
            }
            return Ok(Some(item));
        }
        Ok(None)
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.inner.close().await
    }
}
