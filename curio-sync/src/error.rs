//! Error types for curio-sync
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Topic broker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Operation needs a live connection; call `connect` first
    #[error("Broker not connected")]
    NotConnected,

    /// Transport refused or failed the operation
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// The dispatcher task has stopped
    #[error("Broker closed")]
    Closed,
}

/// Notification channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel is not open; the frame was not sent
    #[error("Channel closed")]
    Closed,

    #[error("Channel connect failed: {0}")]
    Connect(String),

    #[error("Frame encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Main error type for curio-sync
#[derive(Error, Debug)]
pub enum SyncError {
    /// Server answered with a failure status or an unsuccessful envelope
    #[error("Store error ({status}): {message}")]
    Store { status: u16, message: String },

    /// Request could not be sent or its body not read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Criterion not in the current snapshot
    #[error("Criterion not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the criterion's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Common(#[from] curio_common::Error),
}

/// Convenience Result type using curio-sync SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
