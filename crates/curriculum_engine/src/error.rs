//! Error types for the commit engine.

use curriculum_model::{EntityKind, Id, TempId};
use thiserror::Error;

/// Result type for persistence service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for immediate, non-queued engine calls.
pub type EngineResult<T> = Result<T, OperationError>;

/// Errors raised by a persistence service transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Server returned an internal error.
    #[error("server error: {0}")]
    Server(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Timeout.
    #[error("request timed out")]
    Timeout,
}

impl ServiceError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport { retryable, .. } => *retryable,
            ServiceError::Timeout => true,
            ServiceError::Server(_) => true,
            ServiceError::Unauthorized(_) => false,
        }
    }
}

/// Why a single operation failed.
///
/// Failures are captured per operation and never abort sibling operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    /// The remote call itself failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The service answered with `success: false`.
    #[error("rejected by service: {message}")]
    Rejected {
        /// Message returned by the service.
        message: String,
    },

    /// A create succeeded but no server id came back.
    #[error("service did not return an id for created {kind}")]
    MissingServerId {
        /// Kind of the created entity.
        kind: EntityKind,
    },

    /// A temporary id this operation depends on was never resolved,
    /// usually because its create failed in the same batch.
    #[error("unresolved {kind} {temp_id}: its create has not succeeded")]
    Orphaned {
        /// Kind of the unresolved entity.
        kind: EntityKind,
        /// The unresolved temporary id.
        temp_id: TempId,
    },

    /// The document no longer contains the entity.
    #[error("{kind} {id} is not in the document")]
    NotInDocument {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Id the operation carries.
        id: Id,
    },

    /// The commit was aborted before this operation completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl OperationError {
    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OperationError::Service(err) => err.is_retryable(),
            OperationError::Cancelled => true,
            _ => false,
        }
    }
}
