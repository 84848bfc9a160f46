use std::io;

/// Errors produced by storage engines.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The engine cannot serve requests right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// I/O error against the underlying files.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Record encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data failed an integrity check.
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// A lock guarding engine state was poisoned by a panicking writer.
    #[error("backend state poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the backend crate.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
