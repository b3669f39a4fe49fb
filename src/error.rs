//! Error types for hotswap-relay.

/// Result type alias for hotswap-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while propagating configuration changes.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The backing store rejected or failed an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The request was malformed and was rejected without being parked.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The namespace a write or lookup referred to does not exist.
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// The namespace is locked by another editor.
    #[error("Namespace {namespace} is modified by {owner}")]
    LockHeld {
        /// Namespace that is locked
        namespace: String,
        /// Identity currently holding the lock
        owner: String,
    },

    /// The lock row vanished between the failed insert and the re-read.
    #[error("Check lock for {0} failed, please retry")]
    LockCheckFailed(String),

    /// Every tier of the client resolver chain came up empty.
    #[error("No configuration available for namespace {namespace}")]
    NoConfigAvailable {
        /// Namespace that could not be resolved
        namespace: String,
    },

    /// A remote call (discovery, fetch, long poll) failed.
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// Failed to load settings.
    #[error("Failed to load settings: {0}")]
    Settings(String),

    /// Failed to deserialize a payload.
    #[error("Failed to deserialize: {0}")]
    Deserialization(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases.
    #[error("Relay error: {0}")]
    Other(String),
}

impl RelayError {
    /// Whether the error is a transient infrastructure failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Remote(_) | Self::Io(_) | Self::Store(StoreError::Unavailable(_))
        )
    }
}

/// Errors raised by change-log and lock storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The backend is temporarily unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("Store backend failure: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Deserialization(err.to_string())
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Settings(err.to_string())
    }
}
