//! Error types for the ChatRecall domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all ChatRecall operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// An embedding request that failed permanently or exhausted its retries.
    #[error("Embedding request failed after {attempts} attempt(s): {source}")]
    EmbeddingRequest {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    // --- Exchange store errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Accounting errors ---
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a retry may succeed: rate limits, timeouts, transport errors
    /// and server-side (5xx) failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::MalformedResponse(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The store is pinned to another embedding model; mixing embedding
    /// spaces would corrupt similarity scoring.
    #[error(
        "Database already contains a different embedding model: {pinned} (configured: {configured}). Cannot continue."
    )]
    EmbeddingModelMismatch { pinned: String, configured: String },

    #[error("Record is immutable: {0}")]
    ImmutableRecord(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unknown model '{0}': no pricing configured")]
    UnknownModel(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record is immutable: {0}")]
    ImmutableRecord(String),
}
