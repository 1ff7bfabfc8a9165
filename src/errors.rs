use std::time::Duration;

use thiserror::Error;

/// Every way a backup session can fail. Only `ChecksumMismatch` is
/// recoverable (the upload loop retries it internally up to the bound);
/// everything else unwinds the session.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("session key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("server rejected the request: {0}")]
    Rejected(&'static str),

    #[error("checksum mismatch persisted after {0} attempts, upload aborted")]
    ChecksumMismatch(u32),
}
