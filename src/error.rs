//! Error types for the conversational ledger

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {

    // =============================
    // Gateway Errors
    // =============================

    #[error("Gateway error: {0}")]
    GatewayError(String),

    #[error("Gateway timed out after {0:?}")]
    GatewayTimeout(std::time::Duration),

    // =============================
    // Persistence Errors
    // =============================

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Timeline storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // Configuration Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
