//! The error taxonomy carried on the wire (`ResponseEnvelope::Failure`) and
//! used locally by the dispatcher.
//!
//! `BleuError` is deliberately flat: every variant maps to exactly one
//! `ResponseEnvelope` failure kind, so encoding and decoding a failure never
//! loses information a caller might need to branch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Taxonomy of failures the core can report, locally or across the wire.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum BleuError {
    #[error("actor not found: {0}")]
    ActorNotFound(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("execution failed: {message}")]
    ExecutionFailed {
        message: String,
        underlying: Option<String>,
    },

    #[error("rpc timeout")]
    Timeout,

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("cancelled")]
    Cancelled,
}

impl BleuError {
    pub fn execution_failed(message: impl Into<String>) -> Self {
        BleuError::ExecutionFailed {
            message: message.into(),
            underlying: None,
        }
    }

    pub fn execution_failed_with(message: impl Into<String>, underlying: impl Into<String>) -> Self {
        BleuError::ExecutionFailed {
            message: message.into(),
            underlying: Some(underlying.into()),
        }
    }

    /// Stable tag used on the wire so a peer running a different build can
    /// still branch on the kind of failure without parsing `Display` text.
    pub fn kind(&self) -> &'static str {
        match self {
            BleuError::ActorNotFound(_) => "actor_not_found",
            BleuError::MethodNotFound(_) => "method_not_found",
            BleuError::InvalidEnvelope(_) => "invalid_envelope",
            BleuError::ExecutionFailed { .. } => "execution_failed",
            BleuError::Timeout => "timeout",
            BleuError::TransportFailed(_) => "transport_failed",
            BleuError::Disconnected => "disconnected",
            BleuError::Cancelled => "cancelled",
        }
    }
}

pub type BleuResult<T> = Result<T, BleuError>;
