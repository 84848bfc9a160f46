use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{BackendError, BackendResult};
use crate::traits::{Backend, Cursor, ScanItem, ScanOptions};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory storage engine.
///
/// Cloning is cheap and yields a handle onto the same map. Cursors do not
/// snapshot: each `next` resumes strictly after the last key returned, so
/// writes that land ahead of a cursor are observed and keys never repeat.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Map>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursors opened and not yet closed or dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Copy of every stored pair in key order.
    pub fn snapshot(&self) -> BackendResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .read()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub(crate) fn insert(&self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.write()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    pub(crate) fn remove(&self, key: &[u8]) -> BackendResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    pub(crate) fn lookup(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.read()?.get(key).cloned())
    }

    pub(crate) fn contains(&self, key: &[u8]) -> BackendResult<bool> {
        Ok(self.read()?.contains_key(key))
    }

    pub(crate) fn open_cursor(&self, opts: ScanOptions) -> MemoryCursor {
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        MemoryCursor {
            entries: Arc::clone(&self.entries),
            opts,
            last: None,
            open: Some(Arc::clone(&self.open_cursors)),
        }
    }

    fn read(&self) -> BackendResult<RwLockReadGuard<'_, Map>> {
        self.entries.read().map_err(|_| BackendError::Poisoned)
    }

    fn write(&self) -> BackendResult<RwLockWriteGuard<'_, Map>> {
        self.entries.write().map_err(|_| BackendError::Poisoned)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.lookup(key)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.insert(key, value)
    }

    async fn has(&self, key: &[u8]) -> BackendResult<bool> {
        self.contains(key)
    }

    async fn delete(&self, key: &[u8]) -> BackendResult<bool> {
        self.remove(key)
    }

    async fn size(&self, key: &[u8]) -> BackendResult<Option<u64>> {
        Ok(self.read()?.get(key).map(|v| v.len() as u64))
    }

    async fn scan(&self, opts: ScanOptions) -> BackendResult<Box<dyn Cursor>> {
        Ok(Box::new(self.open_cursor(opts)))
    }
}

/// Cursor over a [`MemoryBackend`].
pub struct MemoryCursor {
    entries: Arc<RwLock<Map>>,
    opts: ScanOptions,
    /// Last key returned; the next lookup starts strictly after it.
    last: Option<Vec<u8>>,
    /// Present while the cursor is open.
    open: Option<Arc<AtomicUsize>>,
}

impl MemoryCursor {
    fn release(&mut self) {
        if let Some(counter) = self.open.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn advance(&mut self) -> BackendResult<Option<ScanItem>> {
        let map = self.entries.read().map_err(|_| BackendError::Poisoned)?;

        // Case-sensitive scans can seek to the prefix and stop once keys
        // leave it. Case folding breaks the ordering, so those scan all keys.
        let ordered = !self.opts.case_insensitive;
        let start = match (&self.last, ordered) {
            (Some(last), _) => Bound::Excluded(last.clone()),
            (None, true) => Bound::Included(self.opts.prefix.clone()),
            (None, false) => Bound::Unbounded,
        };

        let mut found = None;
        for (key, value) in map.range::<Vec<u8>, _>((start, Bound::Unbounded)) {
            if self.opts.matches(key) {
                found = Some(ScanItem {
                    key: key.clone(),
                    size: value.len() as u64,
                    value: (!self.opts.keys_only).then(|| value.clone()),
                });
                break;
            }
            if ordered {
                break;
            }
        }
        drop(map);

        if let Some(item) = &found {
            self.last = Some(item.key.clone());
        }
        Ok(found)
    }
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn next(&mut self) -> BackendResult<Option<ScanItem>> {
        if self.open.is_none() {
            return Ok(None);
        }
        self.advance()
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.release();
    }
}
