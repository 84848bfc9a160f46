//! Storage engine adapters for dsrpc.
//!
//! Every engine exposes the same small capability set through the
//! [`Backend`] trait: point reads and writes over raw byte keys plus an
//! ordered prefix scan returning a [`Cursor`]. Higher layers never see the
//! engine type; they hold an `Arc<dyn Backend>`.
//!
//! # Engines
//!
//! - [`MemoryBackend`]: ordered in-memory map, used by tests and ephemeral servers
//! - [`LogBackend`]: append-only CRC-framed log replayed into an in-memory index
//!
//! [`Collection`] narrows any backend to a single `database/collection/`
//! namespace so the block and reference records of a store can share one
//! engine.

pub mod collection;
pub mod error;
pub mod log;
pub mod memory;
pub mod traits;

pub use collection::Collection;
pub use error::{BackendError, BackendResult};
pub use log::{CompactionStats, LogBackend, LogConfig, SyncMode};
pub use memory::MemoryBackend;
pub use traits::{Backend, Cursor, ScanItem, ScanOptions};
