//! Global error types for Parley.
//!
//! All error categories across the workspace are unified into a single
//! `PlError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using PlError.
pub type PlResult<T> = Result<T, PlError>;

/// Unified error type covering all error categories in Parley.
#[derive(Error, Debug)]
pub enum PlError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // -- Database errors --
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),

    /// Database migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Database integrity check failed.
    #[error("database integrity check failed: {0}")]
    IntegrityCheck(String),

    // -- Model errors --
    /// Conversation not found.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// Message not found.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// User not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The operation does not apply to the message in its current state.
    #[error("invalid message state: {0}")]
    InvalidMessageState(String),

    /// A category filter expression could not be parsed.
    #[error("invalid category: {0}")]
    InvalidCategory(String),

    // -- Execution context errors --
    /// The execution context has shut down and no longer accepts work.
    #[error("context closed: {0}")]
    ContextClosed(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Service errors --
    /// A service failed to initialize.
    #[error("service init error: {0}")]
    ServiceInit(String),

    /// A service is not yet initialized.
    #[error("service not initialized: {0}")]
    ServiceNotInitialized(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for PlError {
    fn from(e: serde_json::Error) -> Self {
        PlError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PlError {
    fn from(e: toml::de::Error) -> Self {
        PlError::Config(e.to_string())
    }
}
