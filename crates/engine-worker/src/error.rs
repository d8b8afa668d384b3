//! Engine error types

use std::time::Duration;

use chess_core::PositionError;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] PositionError),

    #[error("Engine executable not found: {0}")]
    EngineNotFound(String),

    #[error("Permission denied launching engine: {0}")]
    PermissionDenied(String),

    #[error("Engine did not complete handshake within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Engine did not answer within {0:?}")]
    ComputeTimeout(Duration),

    #[error("Engine process exited unexpectedly ({0})")]
    ProcessDied(String),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Engine I/O failure: {0}")]
    Io(#[source] std::io::Error),

    #[error("Engine session is not ready (state: {0})")]
    NotReady(SessionState),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How the fallback policy should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient: retry within the same tier, then fall through.
    Retryable,
    /// The tier cannot succeed: skip straight to the next tier.
    Fatal,
    /// The request itself is bad: no tier can succeed.
    Caller,
}

impl EngineError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            EngineError::HandshakeTimeout(_)
            | EngineError::ComputeTimeout(_)
            | EngineError::ProcessDied(_)
            | EngineError::Io(_) => RetryClass::Retryable,
            EngineError::EngineNotFound(_)
            | EngineError::PermissionDenied(_)
            | EngineError::Protocol(_)
            | EngineError::NotReady(_)
            | EngineError::Config(_) => RetryClass::Fatal,
            EngineError::InvalidPosition(_) => RetryClass::Caller,
        }
    }

    /// Map a spawn failure onto the taxonomy.
    pub(crate) fn from_spawn(program: &str, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::EngineNotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                EngineError::PermissionDenied(format!("{program}: {e}"))
            }
            _ => EngineError::Io(e),
        }
    }
}
