//! Deduplicating key-value store for dsrpc.
//!
//! Callers bind logical keys to values. Physically identical values are
//! stored once as a [`ContentBlock`] addressed by the digest of its bytes,
//! and every logical key becomes a [`Reference`] pointing at a block. A
//! block's `ref_count` always equals the number of references that target
//! it; the block is deleted when the count reaches zero.
//!
//! # Stores
//!
//! Both variants implement [`KvStore`]:
//!
//! - [`DedupStore`]: content-addressed blocks plus reference records
//! - [`PassThroughStore`]: values stored directly under their keys
//!
//! # Queries
//!
//! [`KvStore::query`] returns a lazy [`EntryStream`] that advances a
//! backend cursor one step per poll. The stream honors a
//! `CancellationToken` and releases its cursor on every exit path.

pub mod config;
pub mod dedup;
pub mod error;
pub mod passthrough;
pub mod query;
pub mod record;
pub mod traits;

pub use config::{open_store, ExistingKeyPolicy, StoreConfig, StoreMode};
pub use dedup::{ConsistencyReport, DedupStore, RefCountMismatch};
pub use error::{StoreError, StoreResult};
pub use passthrough::PassThroughStore;
pub use query::{entry_stream, EntryResolver};
pub use record::{ContentBlock, Reference};
pub use traits::{EntryStream, KvStore};
