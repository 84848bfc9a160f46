//! Content hashing for dsrpc.
//!
//! The deduplicating store addresses every content block by a digest of its
//! bytes. [`ContentHasher`] wraps the supported digest algorithms behind one
//! type so the store can be configured without caring which one is in use.
//!
//! All digests come from established libraries.

pub mod hasher;

pub use hasher::{ContentHasher, DigestAlgorithm, HasherError};
