use dsr_backend::BackendError;
use dsr_types::TypeError;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No reference is bound to the key.
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// The request itself is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage engine could not be reached or failed I/O.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored state violates an invariant, or a record failed to decode.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(_) | BackendError::Io(_) => {
                Self::BackendUnavailable(err.to_string())
            }
            BackendError::Serialization(_) | BackendError::Corrupt { .. } | BackendError::Poisoned => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
