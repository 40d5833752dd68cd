//! # Engine Error Types
//!
//! Error types for every operation the engine exposes.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Courier Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Upstream     │  │      Print Jobs         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  PrintRejected          │ │
//! │  │  InvalidUrl     │  │  Rejected       │  │  PollTimeout            │ │
//! │  │  ConfigLoad/Save│  │  AuthExpired    │  │                         │ │
//! │  └─────────────────┘  │  NotFound       │  └─────────────────────────┘ │
//! │                       │  Malformed      │                              │
//! │  ┌─────────────────┐  └─────────────────┘  ┌─────────────────────────┐ │
//! │  │     Caller      │                       │        Local            │ │
//! │  │                 │                       │                         │ │
//! │  │  InvalidRequest │                       │  Persistence, Storage   │ │
//! │  └─────────────────┘                       └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use courier_core::{CoreError, PrintStatus, ValidationError};
use courier_db::DbError;
use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for engine operations.
pub type CourierResult<T> = Result<T, CourierError>;

/// Engine error type.
///
/// Callers can tell "will never succeed" (`PrintRejected`, `UpstreamRejected`)
/// apart from "try again later" (`UpstreamUnavailable`, `PollTimeout`).
#[derive(Debug, Error)]
pub enum CourierError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// The request was rejected before any I/O happened.
    ///
    /// ## When This Occurs
    /// - Print request with no references or more than 100
    /// - Order lookup without a tracking number
    /// - Radius query with a non-positive radius
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    /// The courier platform could not be reached in time.
    ///
    /// ## When This Occurs
    /// - Connection refused, DNS failure, request timeout
    /// - Gateway errors (502, 503, 504)
    /// - Token acquisition failed
    #[error("Courier platform unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The courier platform answered with a structured error.
    #[error("Courier platform rejected the request with status {status}")]
    UpstreamRejected { status: u16, payload: Value },

    /// Authorization failed again after a fresh credential was issued.
    #[error("Authorization rejected after credential renewal")]
    AuthorizationExpired,

    /// Remote or local entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A response could not be interpreted.
    ///
    /// ## When This Occurs
    /// - Print submission without `entity.uuid`
    /// - Non-JSON body where JSON was expected
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Print Job Errors
    // =========================================================================
    /// The print job reached INVALID or REMOVED.
    #[error("Print job {uuid} ended in state {status}")]
    PrintRejected { uuid: String, status: PrintStatus },

    /// The print job did not become ready within the polling budget.
    #[error("Print job {uuid} not ready after {attempts} status checks")]
    PollTimeout { uuid: String, attempts: u32 },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Database write or read failed; transactional writes were rolled back.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Print artifact could not be written to disk.
    #[error("Artifact storage failed: {0}")]
    Storage(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for CourierError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CourierError::NotFound(format!("{entity} {id}")),
            other => CourierError::Persistence(other.to_string()),
        }
    }
}

impl From<ValidationError> for CourierError {
    fn from(err: ValidationError) -> Self {
        CourierError::InvalidRequest(err.to_string())
    }
}

impl From<CoreError> for CourierError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => v.into(),
            other => CourierError::MalformedResponse(other.to_string()),
        }
    }
}

impl From<TransportError> for CourierError {
    fn from(err: TransportError) -> Self {
        CourierError::UpstreamUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for CourierError {
    fn from(err: url::ParseError) -> Self {
        CourierError::InvalidUrl(err.to_string())
    }
}

impl From<toml::de::Error> for CourierError {
    fn from(err: toml::de::Error) -> Self {
        CourierError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for CourierError {
    fn from(err: toml::ser::Error) -> Self {
        CourierError::ConfigSaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::Storage(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl CourierError {
    /// Returns true if the same call may succeed when repeated later.
    ///
    /// ## Retryable Errors
    /// - Upstream unavailable (network, timeouts, gateway errors)
    /// - Print poll timeout (the job may still complete)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CourierError::UpstreamUnavailable(_) | CourierError::PollTimeout { .. }
        )
    }

    /// Returns true if the courier platform could not be reached.
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, CourierError::UpstreamUnavailable(_))
    }

    /// Returns true if repeating the call can never succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CourierError::PrintRejected { .. }
                | CourierError::UpstreamRejected { .. }
                | CourierError::InvalidRequest(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CourierError::InvalidConfig(_)
                | CourierError::InvalidUrl(_)
                | CourierError::ConfigLoadFailed(_)
                | CourierError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_errors() {
        assert!(CourierError::UpstreamUnavailable("timeout".into()).is_retryable());
        assert!(CourierError::PollTimeout {
            uuid: "job".into(),
            attempts: 30
        }
        .is_retryable());

        assert!(!CourierError::AuthorizationExpired.is_retryable());
        assert!(!CourierError::InvalidRequest("orders".into()).is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        let rejected = CourierError::PrintRejected {
            uuid: "job".into(),
            status: PrintStatus::Invalid,
        };
        assert!(rejected.is_terminal());
        assert!(!rejected.is_retryable());
        assert!(rejected.to_string().contains("INVALID"));

        let timeout = CourierError::PollTimeout {
            uuid: "job".into(),
            attempts: 30,
        };
        assert!(!timeout.is_terminal());
    }

    #[test]
    fn test_db_not_found_stays_not_found() {
        let err: CourierError = DbError::not_found("Order", "7").into();
        assert!(matches!(err, CourierError::NotFound(ref m) if m == "Order 7"));

        let err: CourierError = DbError::QueryFailed("disk I/O error".into()).into();
        assert!(matches!(err, CourierError::Persistence(_)));
    }

    #[test]
    fn test_validation_maps_to_invalid_request() {
        let err: CourierError = ValidationError::Required {
            field: "orders".into(),
        }
        .into();
        assert!(matches!(err, CourierError::InvalidRequest(_)));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_upstream_rejected_keeps_payload() {
        let err = CourierError::UpstreamRejected {
            status: 400,
            payload: json!({ "errors": [{ "code": "v2_field_is_empty" }] }),
        };
        assert!(err.to_string().contains("400"));
        if let CourierError::UpstreamRejected { payload, .. } = err {
            assert_eq!(payload["errors"][0]["code"], "v2_field_is_empty");
        }
    }

    #[test]
    fn test_config_errors() {
        assert!(CourierError::InvalidConfig("page_size".into()).is_config_error());
        assert!(!CourierError::NotFound("x".into()).is_config_error());
    }
}
