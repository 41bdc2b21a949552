//! Error taxonomy for the secret store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}
