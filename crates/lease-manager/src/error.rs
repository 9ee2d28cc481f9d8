//! Error types for lease admission and release.

use thiserror::Error;

use crate::response::ErrorReason;

/// Failures reported by a [`LeaseStore`](crate::store::LeaseStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The write or delete precondition did not hold.
    #[error("conditional check failed")]
    ConditionFailed,

    /// The store rejected the request for a reason other than the precondition.
    #[error("{operation} rejected by store ({code}): {message}")]
    Client {
        operation: &'static str,
        code: String,
        message: String,
    },

    /// Connectivity, timeout or service availability failure.
    #[error("{operation} failed to reach the store: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// Anything the store adapter could not classify.
    #[error("{0}")]
    Unexpected(String),
}

impl StoreError {
    pub fn client(operation: &'static str, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Client {
            operation,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }
}

/// Failures of the admission policy, each mapping to one wire reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    /// Counting live leases failed.
    #[error("{0}")]
    QueryFailed(#[source] StoreError),

    /// Creating or deleting a lease failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Release was requested without a lease id.
    #[error("lease_id is required")]
    MissingLeaseId,
}

impl LeaseError {
    /// Wire reason reported to the caller.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            Self::QueryFailed(_) => ErrorReason::QueryFailed,
            Self::Store(StoreError::Client { .. }) => ErrorReason::ClientError,
            Self::Store(StoreError::Transport { .. }) => ErrorReason::TransportError,
            Self::Store(StoreError::ConditionFailed | StoreError::Unexpected(_)) => {
                ErrorReason::Unexpected
            }
            Self::MissingLeaseId => ErrorReason::MissingLeaseId,
        }
    }

    /// Diagnostic text reported alongside the reason, if any.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::MissingLeaseId => None,
            other => Some(other.to_string()),
        }
    }
}
