//! # Validation Module
//!
//! Request validation that runs before any remote call or database write.
//!
//! ## Usage
//! ```rust
//! use courier_core::types::PrintOrderRef;
//! use courier_core::validation::validate_print_refs;
//!
//! let refs = vec![PrintOrderRef::by_number("1106394409")];
//! assert!(validate_print_refs(&refs).is_ok());
//! assert!(validate_print_refs(&[]).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::PrintOrderRef;
use crate::{
    DEFAULT_LISTING_LIMIT, DEFAULT_ORDER_LIST_LIMIT, MAX_LISTING_LIMIT, MAX_ORDER_LIST_LIMIT,
    MAX_PRINT_REFS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Print References
// =============================================================================

/// Validates the order references of a print request.
///
/// ## Rules
/// - At least one reference
/// - At most [`MAX_PRINT_REFS`] references
/// - Each reference carries a non-blank order UUID or tracking number
pub fn validate_print_refs(refs: &[PrintOrderRef]) -> ValidationResult<()> {
    if refs.is_empty() {
        return Err(ValidationError::Required {
            field: "orders".to_string(),
        });
    }

    if refs.len() > MAX_PRINT_REFS {
        return Err(ValidationError::TooMany {
            field: "orders".to_string(),
            max: MAX_PRINT_REFS,
            actual: refs.len(),
        });
    }

    for (index, r) in refs.iter().enumerate() {
        let has_uuid = r.order_uuid.as_deref().is_some_and(|s| !s.trim().is_empty());
        let has_number = r.cdek_number.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !has_uuid && !has_number {
            return Err(ValidationError::Required {
                field: format!("orders[{index}].order_uuid or orders[{index}].cdek_number"),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Listing Windows
// =============================================================================

/// Clamps a delivery point listing window to `(limit, offset)`.
///
/// Missing or zero limit falls back to the default; larger limits are capped.
pub fn listing_window(limit: Option<u32>, offset: Option<u32>) -> (u32, u32) {
    clamp_window(limit, offset, DEFAULT_LISTING_LIMIT, MAX_LISTING_LIMIT)
}

/// Clamps a local order listing window to `(limit, offset)`.
pub fn order_list_window(limit: Option<u32>, offset: Option<u32>) -> (u32, u32) {
    clamp_window(limit, offset, DEFAULT_ORDER_LIST_LIMIT, MAX_ORDER_LIST_LIMIT)
}

fn clamp_window(limit: Option<u32>, offset: Option<u32>, default: u32, max: u32) -> (u32, u32) {
    let limit = match limit {
        Some(0) | None => default,
        Some(l) => l.min(max),
    };
    (limit, offset.unwrap_or(0))
}

/// Validates a search radius in kilometres.
pub fn validate_radius(radius_km: f64) -> ValidationResult<()> {
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(ValidationError::OutOfRange {
            field: "radius_km".to_string(),
            min: 0.0,
            max: f64::MAX,
        });
    }
    Ok(())
}

/// Validates the radius of a filtered listing's `near` clause (0.1..=200 km).
pub fn validate_narrowing_radius(radius_km: f64) -> ValidationResult<()> {
    if !(0.1..=200.0).contains(&radius_km) {
        return Err(ValidationError::OutOfRange {
            field: "radius_km".to_string(),
            min: 0.1,
            max: 200.0,
        });
    }
    Ok(())
}

/// Validates a tracking number used for an order lookup.
pub fn validate_tracking_number(number: &str) -> ValidationResult<()> {
    let number = number.trim();
    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "cdek_number".to_string(),
        });
    }
    if !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "cdek_number".to_string(),
            reason: "must contain digits only".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_refs_bounds() {
        let refs: Vec<PrintOrderRef> = (0..100)
            .map(|i| PrintOrderRef::by_number(i.to_string()))
            .collect();
        assert!(validate_print_refs(&refs).is_ok());

        let too_many: Vec<PrintOrderRef> =
            (0..101).map(|i| PrintOrderRef::by_number(i.to_string())).collect();
        assert_eq!(
            validate_print_refs(&too_many),
            Err(ValidationError::TooMany {
                field: "orders".to_string(),
                max: 100,
                actual: 101
            })
        );
    }

    #[test]
    fn test_print_refs_need_an_identifier() {
        let refs = vec![
            PrintOrderRef::by_uuid("72753031-0000-0000-0000-000000000000"),
            PrintOrderRef {
                order_uuid: Some("  ".to_string()),
                cdek_number: None,
            },
        ];
        let err = validate_print_refs(&refs).unwrap_err();
        assert!(err.to_string().contains("orders[1]"));
    }

    #[test]
    fn test_listing_windows() {
        assert_eq!(listing_window(None, None), (100, 0));
        assert_eq!(listing_window(Some(5000), Some(20)), (1000, 20));
        assert_eq!(listing_window(Some(0), None), (100, 0));
        assert_eq!(order_list_window(None, None), (50, 0));
        assert_eq!(order_list_window(Some(500), None), (100, 0));
    }

    #[test]
    fn test_radius_and_tracking_number() {
        assert!(validate_radius(5.0).is_ok());
        assert!(validate_radius(0.0).is_err());
        assert!(validate_radius(f64::INFINITY).is_err());
        assert!(validate_narrowing_radius(0.05).is_err());
        assert!(validate_narrowing_radius(200.0).is_ok());
        assert!(validate_tracking_number("1106394409").is_ok());
        assert!(validate_tracking_number(" ").is_err());
        assert!(validate_tracking_number("ABC").is_err());
    }
}
