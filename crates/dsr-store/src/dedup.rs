use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dsr_backend::{Backend, Collection, Cursor, ScanItem, ScanOptions};
use dsr_crypto::ContentHasher;
use dsr_types::{ContentHash, Entry, QuerySpec};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ExistingKeyPolicy, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::query::{entry_stream, EntryResolver};
use crate::record::{ContentBlock, Reference};
use crate::traits::{EntryStream, KvStore};

/// Deduplicating, reference-counted store.
///
/// Blocks live in one collection keyed by the hex digest of their value;
/// references live in another keyed by the logical key. A single
/// readers-writer lock serializes `put` and `delete` against each other and
/// against value lookups, which keeps every block's `ref_count` equal to the
/// number of references targeting it.
///
/// Cloning yields another handle onto the same store.
#[derive(Clone)]
pub struct DedupStore {
    inner: Arc<Inner>,
}

struct Inner {
    blocks: Collection,
    refs: Collection,
    hasher: ContentHasher,
    existing_key: ExistingKeyPolicy,
    lock: RwLock<()>,
}

/// Result of [`DedupStore::verify`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub references: u64,
    pub blocks: u64,
    /// Keys whose target block does not exist.
    pub dangling: Vec<String>,
    /// Blocks no reference targets.
    pub orphans: Vec<ContentHash>,
    /// Blocks whose stored count disagrees with the references found.
    pub mismatches: Vec<RefCountMismatch>,
    /// Blocks whose value no longer hashes to their address.
    pub corrupt: Vec<ContentHash>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefCountMismatch {
    pub hash: ContentHash,
    pub stored: u64,
    pub actual: u64,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
            && self.orphans.is_empty()
            && self.mismatches.is_empty()
            && self.corrupt.is_empty()
    }
}

impl DedupStore {
    /// Build a store over `backend` using the collections named in `config`.
    pub fn new(backend: Arc<dyn Backend>, config: &StoreConfig) -> Self {
        let blocks = Collection::new(Arc::clone(&backend), &config.database, &config.blocks_collection);
        let refs = Collection::new(backend, &config.database, &config.refs_collection);
        info!(
            backend = blocks.kind(),
            database = %config.database,
            digest = %config.digest,
            existing_key = ?config.existing_key,
            "dedup store ready"
        );
        Self {
            inner: Arc::new(Inner {
                blocks,
                refs,
                hasher: ContentHasher::new(config.digest),
                existing_key: config.existing_key,
                lock: RwLock::new(()),
            }),
        }
    }

    /// Digest of `value` under the configured algorithm.
    pub fn hash_of(&self, value: &[u8]) -> ContentHash {
        self.inner.hasher.hash(value)
    }

    /// Look up a content block directly by hash.
    pub async fn block(&self, hash: &ContentHash) -> StoreResult<Option<ContentBlock>> {
        let _guard = self.inner.lock.read().await;
        self.load_block(hash).await
    }

    pub async fn has_block(&self, hash: &ContentHash) -> StoreResult<bool> {
        let _guard = self.inner.lock.read().await;
        Ok(self.inner.blocks.has(hash.to_hex().as_bytes()).await?)
    }

    /// Scan both collections and check every block's reference count.
    pub async fn verify(&self) -> StoreResult<ConsistencyReport> {
        let _guard = self.inner.lock.read().await;
        let mut report = ConsistencyReport::default();

        let mut targets: BTreeMap<ContentHash, u64> = BTreeMap::new();
        let mut refs = self.inner.refs.scan(ScanOptions::default()).await?;
        let scanned = drain(&mut refs).await;
        refs.close().await?;
        for item in scanned? {
            let reference = Reference::decode(item.value.as_deref().unwrap_or_default())?;
            report.references += 1;
            *targets.entry(reference.target).or_default() += 1;
            if !self.inner.blocks.has(reference.target.to_hex().as_bytes()).await? {
                report.dangling.push(reference.key);
            }
        }

        let mut blocks = self.inner.blocks.scan(ScanOptions::default()).await?;
        let scanned = drain(&mut blocks).await;
        blocks.close().await?;
        for item in scanned? {
            let block = ContentBlock::decode(item.value.as_deref().unwrap_or_default())?;
            report.blocks += 1;
            if !self.inner.hasher.verify(&block.value, &block.hash) {
                report.corrupt.push(block.hash);
            }
            match targets.get(&block.hash).copied().unwrap_or(0) {
                0 => report.orphans.push(block.hash),
                actual if actual != block.ref_count => report.mismatches.push(RefCountMismatch {
                    hash: block.hash,
                    stored: block.ref_count,
                    actual,
                }),
                _ => {}
            }
        }

        info!(
            references = report.references,
            blocks = report.blocks,
            clean = report.is_clean(),
            "consistency check complete"
        );
        Ok(report)
    }

    async fn load_ref(&self, key: &str) -> StoreResult<Option<Reference>> {
        match self.inner.refs.get(key.as_bytes()).await? {
            Some(bytes) => Ok(Some(Reference::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_block(&self, hash: &ContentHash) -> StoreResult<Option<ContentBlock>> {
        match self.inner.blocks.get(hash.to_hex().as_bytes()).await? {
            Some(bytes) => Ok(Some(ContentBlock::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn store_block(&self, block: &ContentBlock) -> StoreResult<()> {
        let bytes = block.encode()?;
        self.inner.blocks.put(block.hash.to_hex().as_bytes(), &bytes).await?;
        Ok(())
    }

    /// Add one reference to the block for `hash`, creating it if absent.
    /// Caller holds the write guard.
    async fn retain_block(&self, hash: ContentHash, value: &[u8]) -> StoreResult<u64> {
        let block = match self.load_block(&hash).await? {
            Some(mut block) => {
                block.retain();
                block
            }
            None => ContentBlock::new(hash, value.to_vec()),
        };
        self.store_block(&block).await?;
        Ok(block.ref_count)
    }

    /// Drop one reference from the block for `hash`, deleting it at zero.
    /// Returns the remaining count, or `None` if the block was missing.
    /// Caller holds the write guard.
    async fn release_block(&self, hash: &ContentHash) -> StoreResult<Option<u64>> {
        match self.load_block(hash).await? {
            Some(block) => Ok(Some(self.write_released(block).await?)),
            None => Ok(None),
        }
    }

    /// Persist `block` with one reference fewer. A single backend write, so
    /// on error the stored block is unchanged.
    async fn write_released(&self, mut block: ContentBlock) -> StoreResult<u64> {
        let remaining = block.release();
        if remaining == 0 {
            self.inner.blocks.delete(block.hash.to_hex().as_bytes()).await?;
            debug!(hash = %block.hash.short_hex(), "block removed");
        } else {
            self.store_block(&block).await?;
        }
        Ok(remaining)
    }

    /// Remove the reference for `key` and release its block.
    ///
    /// The block is released first; if the reference delete then fails the
    /// block is written back as it was. Caller holds the write guard.
    async fn unbind(&self, reference: &Reference) -> StoreResult<()> {
        let hash = &reference.target;
        let block = self.load_block(hash).await?;
        let remaining = match &block {
            Some(block) => Some(self.write_released(block.clone()).await?),
            None => None,
        };

        if let Err(err) = self.inner.refs.delete(reference.key.as_bytes()).await {
            warn!(key = %reference.key, error = %err, "reference delete failed; restoring block");
            if let Some(block) = &block {
                if let Err(undo) = self.store_block(block).await {
                    error!(hash = %hash.short_hex(), error = %undo, "failed to restore block after reference delete failure");
                }
            }
            return Err(err.into());
        }

        match remaining {
            Some(remaining) => debug!(
                key = %reference.key,
                hash = %hash.short_hex(),
                remaining,
                "reference removed"
            ),
            None => warn!(
                key = %reference.key,
                hash = %hash.short_hex(),
                "removed reference to missing block"
            ),
        }
        Ok(())
    }

    /// Undo a rebinding whose old block could not be released: point `key`
    /// back at its previous target and drop the new block's reference.
    async fn restore_binding(&self, previous: &Reference, new_hash: &ContentHash) {
        let restored = match previous.encode() {
            Ok(bytes) => self.inner.refs.put(previous.key.as_bytes(), &bytes).await.map_err(StoreError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = restored {
            error!(key = %previous.key, error = %err, "failed to restore previous reference");
            return;
        }
        if let Err(err) = self.release_block(new_hash).await {
            error!(hash = %new_hash.short_hex(), error = %err, "failed to release block after restoring reference");
        }
    }
}

#[async_trait]
impl KvStore for DedupStore {
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let hash = self.inner.hasher.hash(value);
        let _guard = self.inner.lock.write().await;

        // With `Replace`, the old binding stays in place until the new
        // reference has overwritten it.
        let previous = match self.load_ref(key).await? {
            None => None,
            Some(existing) => match self.inner.existing_key {
                ExistingKeyPolicy::Keep => {
                    debug!(key = %key, "key already bound; keeping existing value");
                    return Ok(());
                }
                ExistingKeyPolicy::Replace if existing.target == hash => return Ok(()),
                ExistingKeyPolicy::Replace => Some(existing),
            },
        };

        let ref_count = self.retain_block(hash, value).await?;
        let reference = Reference::new(key, hash, value.len() as u64);
        let written = match reference.encode() {
            Ok(bytes) => self.inner.refs.put(key.as_bytes(), &bytes).await.map_err(StoreError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(key = %key, hash = %hash.short_hex(), error = %err, "reference write failed; releasing block");
            if let Err(undo) = self.release_block(&hash).await {
                error!(hash = %hash.short_hex(), error = %undo, "failed to release block after reference write failure");
            }
            return Err(err);
        }

        if let Some(previous) = previous {
            match self.release_block(&previous.target).await {
                Ok(Some(remaining)) => debug!(
                    key = %key,
                    hash = %previous.target.short_hex(),
                    remaining,
                    "previous block released"
                ),
                Ok(None) => warn!(
                    key = %key,
                    hash = %previous.target.short_hex(),
                    "replaced reference to missing block"
                ),
                Err(err) => {
                    warn!(key = %key, error = %err, "releasing previous block failed; restoring binding");
                    self.restore_binding(&previous, &hash).await;
                    return Err(err);
                }
            }
        }

        debug!(key = %key, hash = %hash.short_hex(), ref_count, size = value.len(), "put");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let _guard = self.inner.lock.read().await;
        let reference = self.load_ref(key).await?.ok_or_else(|| StoreError::not_found(key))?;
        let block = self.load_block(&reference.target).await?.ok_or_else(|| {
            StoreError::Internal(format!(
                "block {} missing for key {key}",
                reference.target.short_hex()
            ))
        })?;
        Ok(block.value)
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.inner.lock.read().await;
        Ok(self.inner.refs.has(key.as_bytes()).await?)
    }

    async fn get_size(&self, key: &str) -> StoreResult<u64> {
        let _guard = self.inner.lock.read().await;
        let reference = self.load_ref(key).await?.ok_or_else(|| StoreError::not_found(key))?;
        Ok(reference.size)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.inner.lock.write().await;
        let Some(reference) = self.load_ref(key).await? else {
            debug!(key = %key, "delete of unbound key");
            return Ok(false);
        };
        self.unbind(&reference).await?;
        Ok(true)
    }

    async fn query(&self, spec: QuerySpec, cancel: CancellationToken) -> StoreResult<EntryStream> {
        spec.validate()?;
        // Reference records are small; always read them so key-only
        // results can report sizes without touching blocks.
        let opts = ScanOptions {
            prefix: spec.prefix.clone().into_bytes(),
            case_insensitive: spec.case_insensitive,
            keys_only: false,
        };
        let cursor = self.inner.refs.scan(opts).await?;
        Ok(entry_stream(cursor, &spec, DedupResolver { store: self.clone() }, cancel))
    }

    async fn close(&self) -> StoreResult<()> {
        let _guard = self.inner.lock.write().await;
        self.inner.refs.flush().await?;
        Ok(())
    }
}

struct DedupResolver {
    store: DedupStore,
}

#[async_trait]
impl EntryResolver for DedupResolver {
    async fn resolve(&self, item: ScanItem, keys_only: bool) -> StoreResult<Option<Entry>> {
        let key = String::from_utf8(item.key)
            .map_err(|e| StoreError::Internal(format!("non-UTF-8 reference key: {e}")))?;

        if keys_only {
            let reference = Reference::decode(item.value.as_deref().unwrap_or_default())?;
            return Ok(Some(Entry::key_only(key, reference.size)));
        }

        let _guard = self.store.inner.lock.read().await;
        let Some(reference) = self.store.load_ref(&key).await? else {
            debug!(key = %key, "reference removed during query; skipping");
            return Ok(None);
        };
        let block = self.store.load_block(&reference.target).await?.ok_or_else(|| {
            StoreError::Internal(format!(
                "block {} missing for key {key}",
                reference.target.short_hex()
            ))
        })?;
        Ok(Some(Entry::with_value(key, block.value)))
    }
}

async fn drain(cursor: &mut Box<dyn Cursor>) -> StoreResult<Vec<ScanItem>> {
    let mut items = Vec::new();
    while let Some(item) = cursor.next().await? {
        items.push(item);
    }
    Ok(items)
}
