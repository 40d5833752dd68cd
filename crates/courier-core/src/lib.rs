//! # courier-core: Pure Domain Logic for Courier Bridge
//!
//! This crate holds the rules of the courier integration as pure functions
//! and plain data. Nothing in here touches the network, the database, or the
//! file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   courier-worker ──► courier-sync ──► courier-db ──► courier-core      │
//! │                            │                              ▲             │
//! │                            └──────────────────────────────┘             │
//! │                                                                         │
//! │   courier-core: types, geo math, payload shaping, record mapping       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (credential, delivery point, order graph, print job)
//! - [`geo`] - Great-circle distances and bounding boxes
//! - [`payload`] - Outbound payload sanitizing and loose JSON value coercion
//! - [`mapping`] - Remote delivery point record → local rows
//! - [`validation`] - Request validation (print references, listing windows)
//! - [`fingerprint`] - Deterministic print request fingerprints
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use courier_core::geo::{haversine_km, GeoPoint};
//!
//! let moscow = GeoPoint::new(55.7558, 37.6173);
//! let spb = GeoPoint::new(59.9343, 30.3351);
//! let km = haversine_km(moscow, spb);
//! assert!((630.0..640.0).contains(&km));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fingerprint;
pub mod geo;
pub mod mapping;
pub mod payload;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use geo::{BoundingBox, GeoPoint};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Mean Earth radius in kilometres, shared by every distance formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Maximum number of order references in a single print request.
pub const MAX_PRINT_REFS: usize = 100;

/// Default and maximum page sizes for delivery point listings.
pub const DEFAULT_LISTING_LIMIT: u32 = 100;
pub const MAX_LISTING_LIMIT: u32 = 1000;

/// Default and maximum page sizes for local order listings.
pub const DEFAULT_ORDER_LIST_LIMIT: u32 = 50;
pub const MAX_ORDER_LIST_LIMIT: u32 = 100;

/// Placeholder the courier platform accepts for a package without a comment.
pub const EMPTY_PACKAGE_COMMENT: &str = "-";
