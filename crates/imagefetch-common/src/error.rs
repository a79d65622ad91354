//! Common error types used throughout imagefetch.
//!
//! The variants mirror how far a failure is allowed to propagate: only
//! [`Error::Configuration`] aborts a batch. Every other kind is contained at
//! item or provider granularity and ends up in the item's outcome record.

/// Common error type for imagefetch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid credentials or policy. Fatal at run start.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Quota or rate budget exhausted for a provider.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Network failure that survived local retries.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// A candidate failed quality or deduplication checks.
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    /// The storage collaborator failed to persist an accepted image.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The requested item was not found.
    #[error("Item not found: {0}")]
    NotFound(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new ProviderUnavailable error.
    pub fn provider_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    /// Create a new TransientNetwork error.
    pub fn transient_network<S: Into<String>>(msg: S) -> Self {
        Self::TransientNetwork(msg.into())
    }

    /// Create a new ValidationRejected error.
    pub fn validation_rejected<S: Into<String>>(msg: S) -> Self {
        Self::ValidationRejected(msg.into())
    }

    /// Create a new Persistence error.
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error must abort the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
