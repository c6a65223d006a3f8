//! Error types for RECALL operations

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Request model errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Wrapper depth exceeded maximum of {max}")]
    WrapDepthExceeded { max: usize },

    #[error("Malformed raw query: {reason}")]
    MalformedRawQuery { reason: String },

    #[error("Request could not be serialized for key derivation: {reason}")]
    KeySerialization { reason: String },
}

/// Cache entry store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Insert failed for key {key}: {reason}")]
    InsertFailed { key: String, reason: String },

    #[error("Unknown store region: {region}")]
    UnknownRegion { region: String },
}

/// Backend call errors, propagated unmodified to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend call failed with code {code}: {message}")]
    CallFailed { code: i32, message: String },

    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Backend response did not match request kind: {reason}")]
    ResponseMismatch { reason: String },
}

/// Distributed invalidation transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed for message {message_id}: {reason}")]
    SendFailed { message_id: Uuid, reason: String },

    #[error("Message {message_id} acknowledged by {received} of {expected} instances")]
    NotAcknowledged {
        message_id: Uuid,
        expected: usize,
        received: usize,
    },

    #[error("Transport closed")]
    Closed,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Lock timeout {timeout:?} must be shorter than refresh lease {lease:?}")]
    TimeoutExceedsLease { timeout: Duration, lease: Duration },
}

/// Master error type for all RECALL errors.
#[derive(Debug, Clone, Error)]
pub enum RecallError {
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for RECALL operations.
pub type RecallResult<T> = Result<T, RecallError>;
