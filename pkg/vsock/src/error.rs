//! Error taxonomy for vsock transport failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VsockError {
    #[error("vsock not configured")]
    NotConfigured,
    #[error("vsock connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("vsock CONNECT handshake failed: {0}")]
    Handshake(String),
    #[error("vsock bind failed: {0}")]
    Bind(std::io::Error),
    #[error("vsock operation timed out")]
    Timeout,
}
