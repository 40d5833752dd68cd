//! # Geo Math
//!
//! Distances and bounding boxes on a spherical Earth of radius
//! [`EARTH_RADIUS_KM`].
//!
//! ## Radius Query Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   max_lat ┌───────────────────────────┐                                │
//! │           │        .  ─ ─ ─  .        │   1. coarse: bounding box      │
//! │           │    .               .      │      (index or range scan)     │
//! │           │  .        ●          .    │                                │
//! │           │    .    center     .      │   2. exact: great-circle       │
//! │           │        .  ─ ─ ─  .        │      distance <= radius        │
//! │   min_lat └───────────────────────────┘                                │
//! │        min_lon                     max_lon                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The box always contains the whole circle, so the exact filter alone
//! decides membership. Boxes crossing the antimeridian are not split; near
//! ±180° longitude the box is clamped and a few edge points may be missed.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::validation::ValidationResult;
use crate::EARTH_RADIUS_KM;

/// A coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }

    /// Rejects coordinates outside the valid ranges.
    pub fn validate(&self) -> ValidationResult<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::OutOfRange {
                field: "latitude".to_string(),
                min: -90.0,
                max: 90.0,
            });
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ValidationError::OutOfRange {
                field: "longitude".to_string(),
                min: -180.0,
                max: 180.0,
            });
        }
        Ok(())
    }
}

/// Axis-aligned latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        BoundingBox {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Returns the same box with inverted bounds swapped.
    ///
    /// ```rust
    /// use courier_core::geo::BoundingBox;
    ///
    /// let inverted = BoundingBox::new(56.0, 55.0, 38.0, 37.0);
    /// assert_eq!(inverted.normalized(), BoundingBox::new(55.0, 56.0, 37.0, 38.0));
    /// ```
    pub fn normalized(self) -> Self {
        BoundingBox {
            min_lat: self.min_lat.min(self.max_lat),
            max_lat: self.min_lat.max(self.max_lat),
            min_lon: self.min_lon.min(self.max_lon),
            max_lon: self.min_lon.max(self.max_lon),
        }
    }

    /// Smallest box containing every point within `radius_km` of `center`.
    ///
    /// Latitude spans `radius / R` radians. Longitude spans
    /// `asin(sin(radius / R) / cos(lat))`, which is the exact tangent
    /// meridian offset; when the circle reaches a pole the full longitude
    /// range is used.
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let angular = (radius_km.max(0.0) / EARTH_RADIUS_KM).min(std::f64::consts::PI);
        let lat = center.lat.to_radians();

        let d_lat = angular.to_degrees();
        let min_lat = (center.lat - d_lat).max(-90.0);
        let max_lat = (center.lat + d_lat).min(90.0);

        let ratio = angular.sin() / lat.cos();
        let reaches_pole = min_lat <= -90.0 || max_lat >= 90.0;
        let (min_lon, max_lon) = if reaches_pole || !ratio.is_finite() || ratio >= 1.0 {
            (-180.0, 180.0)
        } else {
            let d_lon = ratio.asin().to_degrees();
            ((center.lon - d_lon).max(-180.0), (center.lon + d_lon).min(180.0))
        };

        BoundingBox {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }
}

// =============================================================================
// Distance Formulas
// =============================================================================

/// Haversine great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Great-circle distance in kilometres using the Vincenty (atan2) form.
///
/// Numerically stable for both tiny and antipodal separations; agrees with
/// [`haversine_km`] to well under a metre at city scales.
pub fn great_circle_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let y = ((phi2.cos() * d_lambda.sin()).powi(2)
        + (phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos()).powi(2))
    .sqrt();
    let x = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * d_lambda.cos();

    EARTH_RADIUS_KM * y.atan2(x)
}
