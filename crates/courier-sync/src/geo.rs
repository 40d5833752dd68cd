//! # Geo Query Engine
//!
//! Proximity and filtered listings over the local delivery point mirror.
//!
//! ## Radius Backends
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      list_within_radius(center, r)                      │
//! │                                  │                                      │
//! │                 bbox = BoundingBox::around(center, r)                   │
//! │                                  │                                      │
//! │         ┌────────────────────────┴────────────────────────┐             │
//! │         ▼                                                 ▼             │
//! │  SpatialIndexQuery                                 HaversineQuery       │
//! │  R*Tree overlap lookup                             lat/lon range scan   │
//! │  great_circle_km                                   haversine_km         │
//! │         └────────────────────────┬────────────────────────┘             │
//! │                                  ▼                                      │
//! │          distance <= r, sort (distance, code), paginate                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both backends return the same rows for the same mirror; they differ only
//! in how candidates are found. Soft-deleted points never appear.

use std::cmp::Ordering;

use async_trait::async_trait;
use courier_core::geo::{great_circle_km, haversine_km, BoundingBox, GeoPoint};
use courier_core::validation::{listing_window, validate_narrowing_radius, validate_radius};
use courier_core::{
    DeliveryPoint, DeliveryPointCriteria, DeliveryPointDetails, DeliveryPointHit, Listing,
    ListingSort,
};
use courier_db::{DbResult, DeliveryPointRepository};
use tracing::debug;

use crate::config::GeoBackend;
use crate::error::CourierResult;

// =============================================================================
// Radius Strategy
// =============================================================================

/// How candidates near a point are found and measured.
#[async_trait]
pub trait RadiusQuery: Send + Sync {
    fn backend(&self) -> GeoBackend;

    /// Visible points that may lie inside `bbox`; a superset is fine.
    async fn candidates(&self, bbox: BoundingBox) -> DbResult<Vec<DeliveryPoint>>;

    fn distance_km(&self, a: GeoPoint, b: GeoPoint) -> f64;
}

/// R*Tree lookup with exact great-circle distances.
pub struct SpatialIndexQuery {
    repo: DeliveryPointRepository,
}

impl SpatialIndexQuery {
    pub fn new(repo: DeliveryPointRepository) -> Self {
        SpatialIndexQuery { repo }
    }
}

#[async_trait]
impl RadiusQuery for SpatialIndexQuery {
    fn backend(&self) -> GeoBackend {
        GeoBackend::SpatialIndex
    }

    async fn candidates(&self, bbox: BoundingBox) -> DbResult<Vec<DeliveryPoint>> {
        self.repo.candidates_indexed(bbox).await
    }

    fn distance_km(&self, a: GeoPoint, b: GeoPoint) -> f64 {
        great_circle_km(a, b)
    }
}

/// Plain range scan with Haversine distances; needs no index support.
pub struct HaversineQuery {
    repo: DeliveryPointRepository,
}

impl HaversineQuery {
    pub fn new(repo: DeliveryPointRepository) -> Self {
        HaversineQuery { repo }
    }
}

#[async_trait]
impl RadiusQuery for HaversineQuery {
    fn backend(&self) -> GeoBackend {
        GeoBackend::Haversine
    }

    async fn candidates(&self, bbox: BoundingBox) -> DbResult<Vec<DeliveryPoint>> {
        self.repo.candidates_in_box(bbox).await
    }

    fn distance_km(&self, a: GeoPoint, b: GeoPoint) -> f64 {
        haversine_km(a, b)
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct GeoQueryEngine {
    repo: DeliveryPointRepository,
    radius: Box<dyn RadiusQuery>,
}

impl GeoQueryEngine {
    pub fn new(repo: DeliveryPointRepository, backend: GeoBackend) -> Self {
        let radius: Box<dyn RadiusQuery> = match backend {
            GeoBackend::SpatialIndex => Box::new(SpatialIndexQuery::new(repo.clone())),
            GeoBackend::Haversine => Box::new(HaversineQuery::new(repo.clone())),
        };
        GeoQueryEngine { repo, radius }
    }

    pub fn backend(&self) -> GeoBackend {
        self.radius.backend()
    }

    /// Points within `radius_km` of `(lat, lon)`, nearest first.
    ///
    /// `total` counts every point inside the radius, not just this page.
    pub async fn list_within_radius(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> CourierResult<Listing<DeliveryPointHit>> {
        let center = GeoPoint::new(lat, lon);
        center.validate()?;
        validate_radius(radius_km)?;
        let (limit, offset) = listing_window(limit, offset);

        let candidates = self
            .radius
            .candidates(BoundingBox::around(center, radius_km))
            .await?;
        let considered = candidates.len();
        let hits = self.rank(candidates, center, radius_km);

        debug!(
            backend = %self.backend(),
            considered,
            matched = hits.len(),
            "Radius query"
        );
        Ok(paginate(hits, limit, offset))
    }

    /// Filtered listing with child collections.
    ///
    /// With `near`, points are narrowed by exact distance before paging, and
    /// [`ListingSort::Distance`] orders them nearest first.
    pub async fn list_filtered(
        &self,
        criteria: &DeliveryPointCriteria,
    ) -> CourierResult<Listing<DeliveryPointDetails>> {
        let (limit, offset) = listing_window(criteria.limit, criteria.offset);

        let page = match criteria.near {
            Some((center, radius_km)) => {
                center.validate()?;
                validate_narrowing_radius(radius_km)?;

                let points = self
                    .repo
                    .matching(criteria, Some(BoundingBox::around(center, radius_km)))
                    .await?;

                let mut hits: Vec<(f64, DeliveryPoint)> = points
                    .into_iter()
                    .filter_map(|p| {
                        let d = self.radius.distance_km(center, p.position()?);
                        (d <= radius_km).then_some((d, p))
                    })
                    .collect();

                if criteria.sort == ListingSort::Distance {
                    hits.sort_by(|a, b| {
                        let order = by_distance_then_code(a.0, &a.1.code, b.0, &b.1.code);
                        if criteria.descending {
                            order.reverse()
                        } else {
                            order
                        }
                    });
                }

                let rows = hits.into_iter().map(|(_, p)| p).collect();
                paginate(rows, limit, offset)
            }
            None => self.repo.list_filtered(criteria, limit, offset).await?,
        };

        let rows = self.repo.load_children(page.rows).await?;
        Ok(Listing {
            total: page.total,
            rows,
        })
    }

    fn rank(
        &self,
        candidates: Vec<DeliveryPoint>,
        center: GeoPoint,
        radius_km: f64,
    ) -> Vec<DeliveryPointHit> {
        let mut hits: Vec<DeliveryPointHit> = candidates
            .into_iter()
            .filter_map(|point| {
                let distance_km = self.radius.distance_km(center, point.position()?);
                (distance_km <= radius_km).then_some(DeliveryPointHit { point, distance_km })
            })
            .collect();

        hits.sort_by(|a, b| {
            by_distance_then_code(a.distance_km, &a.point.code, b.distance_km, &b.point.code)
        });
        hits
    }
}

fn by_distance_then_code(da: f64, ca: &str, db: f64, cb: &str) -> Ordering {
    da.total_cmp(&db).then_with(|| ca.cmp(cb))
}

fn paginate<T>(rows: Vec<T>, limit: u32, offset: u32) -> Listing<T> {
    let total = rows.len() as u64;
    let rows = rows
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Listing { total, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use crate::test_support::{fixed_now, memory_db, remote_point};
    use chrono::TimeDelta;
    use courier_core::mapping::map_delivery_point;
    use courier_core::OfficeType;
    use courier_db::Database;

    const CENTER: (f64, f64) = (55.75, 37.61);

    async fn seeded() -> Database {
        let db = memory_db().await;
        let now = fixed_now();
        let records = [
            remote_point("MSK-CENTER", 55.7510, 37.6120),
            remote_point("MSK-NEAR", 55.7600, 37.6300),
            remote_point("MSK-EDGE", 55.7900, 37.6100),
            remote_point("MSK-FAR", 55.9000, 37.9000),
            remote_point("SPB", 59.9343, 30.3351),
        ];
        let batch: Vec<_> = records
            .iter()
            .filter_map(|r| map_delivery_point(r, now))
            .collect();
        db.delivery_points().upsert_batch(&batch).await.unwrap();
        db
    }

    fn codes<T>(listing: &Listing<T>, code: impl Fn(&T) -> &str) -> Vec<String> {
        listing.rows.iter().map(|r| code(r).to_string()).collect()
    }

    #[tokio::test]
    async fn test_backends_agree() {
        let db = seeded().await;
        let spatial = GeoQueryEngine::new(db.delivery_points(), GeoBackend::SpatialIndex);
        let haversine = GeoQueryEngine::new(db.delivery_points(), GeoBackend::Haversine);

        let a = spatial
            .list_within_radius(CENTER.0, CENTER.1, 5.0, None, None)
            .await
            .unwrap();
        let b = haversine
            .list_within_radius(CENTER.0, CENTER.1, 5.0, None, None)
            .await
            .unwrap();

        assert_eq!(a.total, 3);
        assert_eq!(a.total, b.total);
        assert_eq!(
            codes(&a, |h| &h.point.code),
            vec!["MSK-CENTER", "MSK-NEAR", "MSK-EDGE"]
        );
        assert_eq!(codes(&a, |h| &h.point.code), codes(&b, |h| &h.point.code));
        for (x, y) in a.rows.iter().zip(&b.rows) {
            assert!((x.distance_km - y.distance_km).abs() < 0.001);
        }
    }

    #[tokio::test]
    async fn test_radius_pagination_keeps_total() {
        let db = seeded().await;
        let engine = GeoQueryEngine::new(db.delivery_points(), GeoBackend::SpatialIndex);

        let page = engine
            .list_within_radius(CENTER.0, CENTER.1, 5.0, Some(1), Some(1))
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(codes(&page, |h| &h.point.code), vec!["MSK-NEAR"]);
    }

    #[tokio::test]
    async fn test_invalid_radius_input() {
        let db = seeded().await;
        let engine = GeoQueryEngine::new(db.delivery_points(), GeoBackend::Haversine);

        assert!(matches!(
            engine.list_within_radius(95.0, 37.6, 5.0, None, None).await,
            Err(CourierError::InvalidRequest(_))
        ));
        assert!(matches!(
            engine.list_within_radius(55.7, 37.6, 0.0, None, None).await,
            Err(CourierError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_inverted_bbox_is_swapped() {
        let db = seeded().await;
        let engine = GeoQueryEngine::new(db.delivery_points(), GeoBackend::SpatialIndex);

        let straight = DeliveryPointCriteria {
            bbox: Some(BoundingBox::new(55.70, 55.80, 37.55, 37.65)),
            ..Default::default()
        };
        let inverted = DeliveryPointCriteria {
            bbox: Some(BoundingBox::new(55.80, 55.70, 37.65, 37.55)),
            ..Default::default()
        };

        let a = engine.list_filtered(&straight).await.unwrap();
        let b = engine.list_filtered(&inverted).await.unwrap();

        assert_eq!(a.total, 3);
        assert_eq!(codes(&a, |d| &d.point.code), codes(&b, |d| &d.point.code));
        assert_eq!(a.rows[0].phones.len(), 1);
    }

    #[tokio::test]
    async fn test_filtered_near_orders_by_distance() {
        let db = seeded().await;
        let engine = GeoQueryEngine::new(db.delivery_points(), GeoBackend::Haversine);

        let criteria = DeliveryPointCriteria {
            office_type: Some(OfficeType::Pvz),
            near: Some((GeoPoint::new(55.79, 37.61), 10.0)),
            sort: ListingSort::Distance,
            ..Default::default()
        };
        let listing = engine.list_filtered(&criteria).await.unwrap();

        assert_eq!(listing.total, 3);
        assert_eq!(
            codes(&listing, |d| &d.point.code),
            vec!["MSK-EDGE", "MSK-NEAR", "MSK-CENTER"]
        );

        let too_wide = DeliveryPointCriteria {
            near: Some((GeoPoint::new(55.79, 37.61), 500.0)),
            ..Default::default()
        };
        assert!(engine.list_filtered(&too_wide).await.is_err());
    }

    #[tokio::test]
    async fn test_soft_deleted_points_are_hidden() {
        let db = seeded().await;
        let later = fixed_now() + TimeDelta::hours(1);
        let keep: Vec<_> = [remote_point("MSK-CENTER", 55.7510, 37.6120)]
            .iter()
            .filter_map(|r| map_delivery_point(r, later))
            .collect();
        db.delivery_points().upsert_batch(&keep).await.unwrap();
        db.delivery_points().mark_missing(later).await.unwrap();

        for backend in [GeoBackend::SpatialIndex, GeoBackend::Haversine] {
            let engine = GeoQueryEngine::new(db.delivery_points(), backend);
            let hits = engine
                .list_within_radius(CENTER.0, CENTER.1, 5.0, None, None)
                .await
                .unwrap();
            assert_eq!(codes(&hits, |h| &h.point.code), vec!["MSK-CENTER"]);

            let listing = engine
                .list_filtered(&DeliveryPointCriteria::default())
                .await
                .unwrap();
            assert_eq!(listing.total, 1);
        }
    }
}
