//! Error types for the SPV session.

use std::io;
use thiserror::Error;

/// Main error type for the SPV session crate.
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Network-related errors.
///
/// The session treats sends as best-effort: a failed send is logged and the
/// stall heartbeat recovers the request. These variants exist so peer-manager
/// implementations can report what went wrong.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Header-store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Data not found: {0}")]
    NotFound(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Synchronization errors surfaced by session handlers.
///
/// None of these escape the dispatcher; they are logged and absorbed there.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid sync state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Type alias for Result with SpvError.
pub type Result<T> = std::result::Result<T, SpvError>;

/// Type alias for network operation results.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Type alias for header-store operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for logging setup results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
