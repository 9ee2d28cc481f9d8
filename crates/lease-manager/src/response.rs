//! Request and response shapes exchanged with callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LeaseError;
use crate::policy::{AcquireOutcome, ReleaseOutcome};

/// Note attached to a release of a lease that no longer exists.
pub const NOTE_ALREADY_GONE: &str = "already expired or missing";

/// Incoming request event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseEvent {
    /// `acquire` or `release`, matched case-insensitively.
    pub action: Option<String>,
    /// Caller correlation token for acquire.
    pub reference_id: Option<String>,
    /// Lease to release.
    pub lease_id: Option<String>,
}

impl LeaseEvent {
    #[must_use]
    pub fn acquire(reference_id: Option<&str>) -> Self {
        Self {
            action: Some("acquire".to_string()),
            reference_id: reference_id.map(str::to_string),
            lease_id: None,
        }
    }

    #[must_use]
    pub fn release(lease_id: &str) -> Self {
        Self {
            action: Some("release".to_string()),
            reference_id: None,
            lease_id: Some(lease_id.to_string()),
        }
    }

    /// Read an event from arbitrary JSON.
    ///
    /// Each field is read on its own: a field that is absent or not a string
    /// is treated as missing without affecting the others.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);

        Self {
            action: field("action"),
            reference_id: field("reference_id"),
            lease_id: field("lease_id"),
        }
    }

    /// Normalised action name.
    #[must_use]
    pub fn normalized_action(&self) -> String {
        self.action
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }
}

/// Error reasons reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Counting live leases failed.
    #[serde(rename = "dynamodb_query_failed")]
    QueryFailed,
    /// The store rejected the request.
    ClientError,
    /// The store could not be reached.
    #[serde(rename = "boto_error")]
    TransportError,
    /// Unclassified failure inside the policy layer.
    Unexpected,
    MissingLeaseId,
    UnknownAction,
    /// Panic caught at the request boundary.
    UnhandledException,
}

impl ErrorReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QueryFailed => "dynamodb_query_failed",
            Self::ClientError => "client_error",
            Self::TransportError => "boto_error",
            Self::Unexpected => "unexpected",
            Self::MissingLeaseId => "missing_lease_id",
            Self::UnknownAction => "unknown_action",
            Self::UnhandledException => "unhandled_exception",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response returned for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeaseResponse {
    Acquired {
        lease_id: String,
        lease_expires_at: i64,
    },
    Wait {
        current_running: u32,
    },
    Released {
        lease_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Error {
        reason: ErrorReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lease_id: Option<String>,
    },
}

impl LeaseResponse {
    #[must_use]
    pub fn error(reason: ErrorReason, details: Option<String>) -> Self {
        Self::Error {
            reason,
            details,
            lease_id: None,
        }
    }

    #[must_use]
    pub fn from_acquire(result: Result<AcquireOutcome, LeaseError>) -> Self {
        match result {
            Ok(AcquireOutcome::Acquired {
                lease_id,
                expires_at,
            }) => Self::Acquired {
                lease_id,
                lease_expires_at: expires_at,
            },
            Ok(AcquireOutcome::Wait { current_running }) => Self::Wait { current_running },
            Err(e) => Self::error(e.reason(), e.details()),
        }
    }

    #[must_use]
    pub fn from_release(lease_id: &str, result: Result<ReleaseOutcome, LeaseError>) -> Self {
        match result {
            Ok(ReleaseOutcome::Released) => Self::Released {
                lease_id: lease_id.to_string(),
                note: None,
            },
            Ok(ReleaseOutcome::AlreadyGone) => Self::Released {
                lease_id: lease_id.to_string(),
                note: Some(NOTE_ALREADY_GONE.to_string()),
            },
            Err(LeaseError::MissingLeaseId) => {
                Self::error(ErrorReason::MissingLeaseId, None)
            }
            Err(e) => Self::Error {
                reason: e.reason(),
                details: e.details(),
                lease_id: Some(lease_id.to_string()),
            },
        }
    }

    /// The response's `status` field.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Acquired { .. } => "acquired",
            Self::Wait { .. } => "wait",
            Self::Released { .. } => "released",
            Self::Error { .. } => "error",
        }
    }

    /// The error reason, when this is an error response.
    #[must_use]
    pub const fn reason(&self) -> Option<ErrorReason> {
        match self {
            Self::Error { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
