//! # Error Types
//!
//! Domain-specific error types for courier-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  courier-core errors (this file)                                       │
//! │  ├── CoreError        - Malformed remote data, domain rule failures    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  courier-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  courier-sync errors (separate crate)                                  │
//! │  └── CourierError     - What callers of the engine see                 │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → CourierError → caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A remote response lacked a field the domain cannot do without.
    ///
    /// ## When This Occurs
    /// - Token response without `access_token`
    /// - Print submission response without `entity.uuid`
    #[error("Remote response is missing {field}")]
    MissingField { field: String },

    /// A status code the domain does not know how to interpret.
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: String, value: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a MissingField error.
    pub fn missing(field: impl Into<String>) -> Self {
        CoreError::MissingField {
            field: field.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any remote call or database write happens.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Collection holds more entries than allowed.
    #[error("{field} must contain at most {max} entries, got {actual}")]
    TooMany {
        field: String,
        max: usize,
        actual: usize,
    },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: f64, max: f64 },

    /// Invalid format (e.g., unparseable date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::TooMany {
            field: "orders".to_string(),
            max: 100,
            actual: 101,
        };
        assert_eq!(
            err.to_string(),
            "orders must contain at most 100 entries, got 101"
        );

        let err = ValidationError::Required {
            field: "orders[3]".to_string(),
        };
        assert_eq!(err.to_string(), "orders[3] is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::Required {
            field: "orders".to_string(),
        }
        .into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }

    #[test]
    fn test_missing_field_message() {
        assert_eq!(
            CoreError::missing("entity.uuid").to_string(),
            "Remote response is missing entity.uuid"
        );
    }
}
