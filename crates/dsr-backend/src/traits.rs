use async_trait::async_trait;
use dsr_types::prefix_matches;

use crate::error::BackendResult;

/// Parameters of an ordered prefix scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Raw key prefix. Empty scans everything.
    pub prefix: Vec<u8>,
    /// Compare the prefix ignoring ASCII case.
    pub case_insensitive: bool,
    /// Skip loading values.
    pub keys_only: bool,
}

impl ScanOptions {
    /// Scan every key starting with `prefix`.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if `key` falls inside this scan.
    pub fn matches(&self, key: &[u8]) -> bool {
        prefix_matches(key, &self.prefix, self.case_insensitive)
    }
}

/// One record produced by a [`Cursor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanItem {
    pub key: Vec<u8>,
    /// Length of the stored value in bytes.
    pub size: u64,
    /// `None` when the scan was keys-only.
    pub value: Option<Vec<u8>>,
}

/// Forward-only iterator over a prefix scan.
///
/// Items arrive in ascending key order. A cursor holds engine resources
/// until [`Cursor::close`] is called or it is dropped; implementations must
/// release on both paths and tolerate `close` being called more than once.
#[async_trait]
pub trait Cursor: Send {
    /// Advance to the next matching record, or `None` when exhausted.
    async fn next(&mut self) -> BackendResult<Option<ScanItem>>;

    /// Release the cursor. Further calls to `next` return `None`.
    async fn close(&mut self) -> BackendResult<()>;
}

/// Capability set every storage engine provides.
///
/// Keys and values are opaque bytes. Writes are individually atomic; no
/// multi-key transactions are offered.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short engine name for logs.
    fn kind(&self) -> &'static str;

    async fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>>;

    /// Insert or overwrite `key`.
    async fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()>;

    async fn has(&self, key: &[u8]) -> BackendResult<bool>;

    /// Remove `key`. Returns `true` if it was present.
    async fn delete(&self, key: &[u8]) -> BackendResult<bool>;

    /// Length of the value under `key`, without copying it out.
    async fn size(&self, key: &[u8]) -> BackendResult<Option<u64>>;

    /// Open an ordered scan.
    async fn scan(&self, opts: ScanOptions) -> BackendResult<Box<dyn Cursor>>;

    /// Make previously acknowledged writes durable.
    async fn flush(&self) -> BackendResult<()> {
        Ok(())
    }
}
