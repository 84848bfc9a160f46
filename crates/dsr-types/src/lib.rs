//! Foundation types for dsrpc.
//!
//! This crate provides the small set of value types shared by every layer of
//! the system: the storage backends, the deduplicating store, the wire
//! protocol, the server and the remote client.
//!
//! # Key Types
//!
//! - [`ContentHash`]: 32-byte digest addressing a stored content block
//! - [`Entry`]: one result produced by a query stream
//! - [`QuerySpec`]: declarative description of a prefix query

pub mod entry;
pub mod error;
pub mod hash;
pub mod query;

pub use entry::Entry;
pub use error::TypeError;
pub use hash::ContentHash;
pub use query::{prefix_matches, QuerySpec};
