//! # Delivery Point Repository
//!
//! The local mirror of the courier platform's pickup point directory.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Replace mode                     Upsert mode                          │
//! │  ────────────                     ───────────                          │
//! │  clear_all()                      upsert_batch(batch)  (per page)      │
//! │  insert_batch(batch) (per page)     ON CONFLICT(uuid) DO UPDATE        │
//! │    bulk INSERT OR IGNORE            children of that point replaced    │
//! │    children bulk INSERT OR IGNORE   deleted_at reset                   │
//! │                                   mark_missing(run_started)            │
//! │                                     last_seen_at < run_started         │
//! │                                     → deleted_at = run_started         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Read Paths
//! ```text
//!  candidates_indexed(bbox) ── R*Tree overlap join ──┐
//!  candidates_in_box(bbox)  ── BETWEEN range scan  ──┼──► exact distance
//!                                                    │    filter happens in
//!  list_filtered / matching ── criteria WHERE ───────┘    the geo engine
//! ```
//!
//! Every read excludes soft-deleted rows (`deleted_at IS NOT NULL`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use courier_core::{
    BoundingBox, DeliveryPoint, DeliveryPointCriteria, DeliveryPointDetails, DeliveryPointImage,
    DeliveryPointPhone, Dimension, Listing, ListingSort, WorkTime, WorkTimeException,
};

/// Header columns in insert order. `id` is assigned by SQLite.
const HEADER_COLUMNS: &[&str] = &[
    "uuid",
    "code",
    "owner_code",
    "office_type",
    "country_code",
    "region_code",
    "city_code",
    "city",
    "postal_code",
    "latitude",
    "longitude",
    "address",
    "address_full",
    "weight_min",
    "weight_max",
    "take_only",
    "is_handout",
    "is_reception",
    "is_dressing_room",
    "is_marketplace",
    "is_ltl",
    "have_cashless",
    "have_cash",
    "have_fast_payment_system",
    "allowed_cod",
    "fulfillment",
    "distance",
    "last_seen_at",
    "deleted_at",
    "raw",
];

/// Child rows per bulk statement; keeps bind counts well under SQLite's limit.
const CHILD_CHUNK: usize = 500;

/// Header rows per bulk statement (30 binds each).
const HEADER_CHUNK: usize = 200;

fn select_columns() -> String {
    HEADER_COLUMNS
        .iter()
        .map(|c| format!("dp.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Repository for the delivery point mirror.
#[derive(Debug, Clone)]
pub struct DeliveryPointRepository {
    pool: SqlitePool,
}

impl DeliveryPointRepository {
    /// Creates a new DeliveryPointRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeliveryPointRepository { pool }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Deletes every point and, through the cascade, every child row.
    pub async fn clear_all(&self) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM delivery_points")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(removed = result.rows_affected(), "Delivery point mirror cleared");
        Ok(result.rows_affected())
    }

    /// Bulk-inserts one batch in a single transaction.
    ///
    /// Duplicate uuids (already stored, or repeated within the batch) are
    /// skipped. Returns the number of header rows actually inserted.
    pub async fn insert_batch(&self, batch: &[DeliveryPointDetails]) -> DbResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut created = 0;

        for chunk in batch.chunks(HEADER_CHUNK) {
            let mut qb = header_insert("INSERT OR IGNORE INTO delivery_points");
            push_header_values(&mut qb, chunk.iter().map(|d| &d.point));
            created += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        insert_children(&mut *tx, batch).await?;

        tx.commit().await?;

        debug!(batch = batch.len(), created, "Inserted delivery point batch");
        Ok(created)
    }

    /// Upserts one batch in a single transaction.
    ///
    /// Each point is matched by uuid: new points are inserted, existing ones
    /// are overwritten, un-deleted, and get their children replaced. Returns
    /// the number of points that were not visible in the mirror before
    /// (new or previously soft-deleted).
    pub async fn upsert_batch(&self, batch: &[DeliveryPointDetails]) -> DbResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut created = 0;

        let updates = HEADER_COLUMNS
            .iter()
            .filter(|c| **c != "uuid")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        for details in batch {
            let point = &details.point;

            let visible: Option<bool> = sqlx::query_scalar(
                "SELECT deleted_at IS NULL FROM delivery_points WHERE uuid = ?1",
            )
            .bind(&point.uuid)
            .fetch_optional(&mut *tx)
            .await?;

            if visible != Some(true) {
                created += 1;
            }

            let mut qb = header_insert("INSERT INTO delivery_points");
            push_header_values(&mut qb, std::iter::once(point));
            qb.push(" ON CONFLICT(uuid) DO UPDATE SET ");
            qb.push(&updates);
            qb.build().execute(&mut *tx).await?;

            delete_children(&mut *tx, &point.uuid).await?;
        }

        insert_children(&mut *tx, batch).await?;

        tx.commit().await?;

        debug!(batch = batch.len(), created, "Upserted delivery point batch");
        Ok(created)
    }

    /// Soft-deletes every visible point not seen since `run_started`.
    ///
    /// Returns the number of points marked.
    pub async fn mark_missing(&self, run_started: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_points
            SET deleted_at = ?1
            WHERE last_seen_at < ?1 AND deleted_at IS NULL
            "#,
        )
        .bind(run_started)
        .execute(&self.pool)
        .await?;

        debug!(removed = result.rows_affected(), "Marked unseen delivery points");
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Number of visible points.
    pub async fn count_active(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_points WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// A visible point with its children.
    pub async fn get_by_uuid(&self, uuid: &str) -> DbResult<Option<DeliveryPointDetails>> {
        let sql = format!(
            "SELECT {} FROM delivery_points dp WHERE dp.uuid = ?1 AND dp.deleted_at IS NULL",
            select_columns()
        );
        let point = sqlx::query_as::<_, DeliveryPoint>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        match point {
            Some(point) => Ok(self.load_children(vec![point]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Points whose R*Tree entry overlaps `bbox`.
    ///
    /// The index stores 32-bit coordinates rounded outwards, so the overlap
    /// test never loses a point inside the box; callers filter exactly.
    pub async fn candidates_indexed(&self, bbox: BoundingBox) -> DbResult<Vec<DeliveryPoint>> {
        let bbox = bbox.normalized();
        let sql = format!(
            r#"
            SELECT {}
            FROM delivery_points_geo g
            INNER JOIN delivery_points dp ON dp.id = g.id
            WHERE g.max_lat >= ?1 AND g.min_lat <= ?2
              AND g.max_lon >= ?3 AND g.min_lon <= ?4
              AND dp.deleted_at IS NULL
            "#,
            select_columns()
        );

        let points = sqlx::query_as::<_, DeliveryPoint>(&sql)
            .bind(bbox.min_lat)
            .bind(bbox.max_lat)
            .bind(bbox.min_lon)
            .bind(bbox.max_lon)
            .fetch_all(&self.pool)
            .await?;

        debug!(candidates = points.len(), "Spatial index candidates");
        Ok(points)
    }

    /// Points inside `bbox` by a plain range scan over latitude/longitude.
    pub async fn candidates_in_box(&self, bbox: BoundingBox) -> DbResult<Vec<DeliveryPoint>> {
        let bbox = bbox.normalized();
        let sql = format!(
            r#"
            SELECT {}
            FROM delivery_points dp
            WHERE dp.latitude BETWEEN ?1 AND ?2
              AND dp.longitude BETWEEN ?3 AND ?4
              AND dp.deleted_at IS NULL
            "#,
            select_columns()
        );

        let points = sqlx::query_as::<_, DeliveryPoint>(&sql)
            .bind(bbox.min_lat)
            .bind(bbox.max_lat)
            .bind(bbox.min_lon)
            .bind(bbox.max_lon)
            .fetch_all(&self.pool)
            .await?;

        debug!(candidates = points.len(), "Range scan candidates");
        Ok(points)
    }

    /// One page of points matching `criteria`, plus the total match count.
    ///
    /// `criteria.near` is not applied here; see [`Self::matching`].
    pub async fn list_filtered(
        &self,
        criteria: &DeliveryPointCriteria,
        limit: u32,
        offset: u32,
    ) -> DbResult<Listing<DeliveryPoint>> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM delivery_points dp");
        push_criteria(&mut count_qb, criteria, None);
        let total: i64 = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool).await?;

        if total == 0 {
            return Ok(Listing::empty());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM delivery_points dp",
            select_columns()
        ));
        push_criteria(&mut qb, criteria, None);
        qb.push(order_clause(criteria.sort, criteria.descending));
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(offset));

        let rows = qb.build_query_as::<DeliveryPoint>().fetch_all(&self.pool).await?;

        Ok(Listing {
            total: total as u64,
            rows,
        })
    }

    /// Every point matching `criteria` and lying inside `within`, unpaginated.
    ///
    /// Used when a radius narrowing needs exact distance filtering before
    /// pagination can happen.
    pub async fn matching(
        &self,
        criteria: &DeliveryPointCriteria,
        within: Option<BoundingBox>,
    ) -> DbResult<Vec<DeliveryPoint>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM delivery_points dp",
            select_columns()
        ));
        push_criteria(&mut qb, criteria, within);
        qb.push(order_clause(criteria.sort, criteria.descending));

        let rows = qb.build_query_as::<DeliveryPoint>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Attaches child collections to `points`, preserving their order.
    pub async fn load_children(
        &self,
        points: Vec<DeliveryPoint>,
    ) -> DbResult<Vec<DeliveryPointDetails>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let uuids: Vec<&str> = points.iter().map(|p| p.uuid.as_str()).collect();

        let mut phones: HashMap<String, Vec<DeliveryPointPhone>> = HashMap::new();
        let mut images: HashMap<String, Vec<DeliveryPointImage>> = HashMap::new();
        let mut work_times: HashMap<String, Vec<WorkTime>> = HashMap::new();
        let mut exceptions: HashMap<String, Vec<WorkTimeException>> = HashMap::new();
        let mut dimensions: HashMap<String, Vec<Dimension>> = HashMap::new();

        for chunk in uuids.chunks(CHILD_CHUNK) {
            for row in fetch_children::<DeliveryPointPhone>(
                &self.pool,
                "SELECT dp_uuid, number, additional FROM delivery_point_phones",
                chunk,
            )
            .await?
            {
                phones.entry(row.dp_uuid.clone()).or_default().push(row);
            }

            for row in fetch_children::<DeliveryPointImage>(
                &self.pool,
                "SELECT dp_uuid, number, url FROM delivery_point_images",
                chunk,
            )
            .await?
            {
                images.entry(row.dp_uuid.clone()).or_default().push(row);
            }

            for row in fetch_children::<WorkTime>(
                &self.pool,
                "SELECT dp_uuid, day, time FROM delivery_point_work_times",
                chunk,
            )
            .await?
            {
                work_times.entry(row.dp_uuid.clone()).or_default().push(row);
            }

            for row in fetch_children::<WorkTimeException>(
                &self.pool,
                "SELECT dp_uuid, date_start, date_end, time_start, time_end, is_working \
                 FROM delivery_point_work_time_exceptions",
                chunk,
            )
            .await?
            {
                exceptions.entry(row.dp_uuid.clone()).or_default().push(row);
            }

            for row in fetch_children::<Dimension>(
                &self.pool,
                "SELECT dp_uuid, width, height, depth FROM delivery_point_dimensions",
                chunk,
            )
            .await?
            {
                dimensions.entry(row.dp_uuid.clone()).or_default().push(row);
            }
        }

        Ok(points
            .into_iter()
            .map(|point| {
                let uuid = point.uuid.clone();
                DeliveryPointDetails {
                    phones: phones.remove(&uuid).unwrap_or_default(),
                    office_image_list: images.remove(&uuid).unwrap_or_default(),
                    work_time_list: work_times.remove(&uuid).unwrap_or_default(),
                    work_time_exception_list: exceptions.remove(&uuid).unwrap_or_default(),
                    dimensions: dimensions.remove(&uuid).unwrap_or_default(),
                    point,
                }
            })
            .collect())
    }
}

// =============================================================================
// Statement Builders
// =============================================================================

fn header_insert<'a>(prefix: &str) -> QueryBuilder<'a, Sqlite> {
    QueryBuilder::new(format!("{prefix} ({}) ", HEADER_COLUMNS.join(", ")))
}

/// Pushes a `VALUES (...), (...)` list in [`HEADER_COLUMNS`] order.
fn push_header_values<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    points: impl Iterator<Item = &'a DeliveryPoint>,
) {
    qb.push_values(points, |mut b, p| {
        b.push_bind(&p.uuid)
            .push_bind(&p.code)
            .push_bind(&p.owner_code)
            .push_bind(p.office_type)
            .push_bind(&p.country_code)
            .push_bind(p.region_code)
            .push_bind(p.city_code)
            .push_bind(&p.city)
            .push_bind(&p.postal_code)
            .push_bind(p.latitude)
            .push_bind(p.longitude)
            .push_bind(&p.address)
            .push_bind(&p.address_full)
            .push_bind(p.weight_min)
            .push_bind(p.weight_max)
            .push_bind(p.take_only)
            .push_bind(p.is_handout)
            .push_bind(p.is_reception)
            .push_bind(p.is_dressing_room)
            .push_bind(p.is_marketplace)
            .push_bind(p.is_ltl)
            .push_bind(p.have_cashless)
            .push_bind(p.have_cash)
            .push_bind(p.have_fast_payment_system)
            .push_bind(p.allowed_cod)
            .push_bind(p.fulfillment)
            .push_bind(p.distance)
            .push_bind(p.last_seen_at)
            .push_bind(p.deleted_at)
            .push_bind(&p.raw);
    });
}

async fn delete_children(conn: &mut SqliteConnection, uuid: &str) -> DbResult<()> {
    for table in [
        "delivery_point_phones",
        "delivery_point_images",
        "delivery_point_work_times",
        "delivery_point_work_time_exceptions",
        "delivery_point_dimensions",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE dp_uuid = ?1"))
            .bind(uuid)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Bulk-inserts the children of `batch`, skipping duplicates.
async fn insert_children(
    conn: &mut SqliteConnection,
    batch: &[DeliveryPointDetails],
) -> DbResult<()> {
    let phones: Vec<&DeliveryPointPhone> = batch.iter().flat_map(|d| &d.phones).collect();
    for chunk in phones.chunks(CHILD_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT OR IGNORE INTO delivery_point_phones (dp_uuid, number, additional) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.dp_uuid)
                .push_bind(&row.number)
                .push_bind(&row.additional);
        });
        qb.build().execute(&mut *conn).await?;
    }

    let images: Vec<&DeliveryPointImage> =
        batch.iter().flat_map(|d| &d.office_image_list).collect();
    for chunk in images.chunks(CHILD_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT OR IGNORE INTO delivery_point_images (dp_uuid, number, url) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.dp_uuid)
                .push_bind(row.number)
                .push_bind(&row.url);
        });
        qb.build().execute(&mut *conn).await?;
    }

    let work_times: Vec<&WorkTime> = batch.iter().flat_map(|d| &d.work_time_list).collect();
    for chunk in work_times.chunks(CHILD_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT OR IGNORE INTO delivery_point_work_times (dp_uuid, day, time) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.dp_uuid)
                .push_bind(row.day)
                .push_bind(&row.time);
        });
        qb.build().execute(&mut *conn).await?;
    }

    let exceptions: Vec<&WorkTimeException> = batch
        .iter()
        .flat_map(|d| &d.work_time_exception_list)
        .collect();
    for chunk in exceptions.chunks(CHILD_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT OR IGNORE INTO delivery_point_work_time_exceptions \
             (dp_uuid, date_start, date_end, time_start, time_end, is_working) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.dp_uuid)
                .push_bind(&row.date_start)
                .push_bind(&row.date_end)
                .push_bind(&row.time_start)
                .push_bind(&row.time_end)
                .push_bind(row.is_working);
        });
        qb.build().execute(&mut *conn).await?;
    }

    let dimensions: Vec<&Dimension> = batch.iter().flat_map(|d| &d.dimensions).collect();
    for chunk in dimensions.chunks(CHILD_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT OR IGNORE INTO delivery_point_dimensions (dp_uuid, width, height, depth) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.dp_uuid)
                .push_bind(row.width)
                .push_bind(row.height)
                .push_bind(row.depth);
        });
        qb.build().execute(&mut *conn).await?;
    }

    Ok(())
}

async fn fetch_children<T>(pool: &SqlitePool, select: &str, uuids: &[&str]) -> DbResult<Vec<T>>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    let mut qb = QueryBuilder::<Sqlite>::new(select);
    qb.push(" WHERE dp_uuid IN (");
    let mut separated = qb.separated(", ");
    for uuid in uuids {
        separated.push_bind(*uuid);
    }
    separated.push_unseparated(") ORDER BY id");

    let rows = qb.build_query_as::<T>().fetch_all(pool).await?;
    Ok(rows)
}

/// Appends the `WHERE` clause for `criteria` (and an optional extra box).
fn push_criteria(
    qb: &mut QueryBuilder<'_, Sqlite>,
    criteria: &DeliveryPointCriteria,
    within: Option<BoundingBox>,
) {
    qb.push(" WHERE dp.deleted_at IS NULL");

    if let Some(office_type) = criteria.office_type {
        qb.push(" AND dp.office_type = ").push_bind(office_type);
    }
    if let Some(country) = &criteria.country_code {
        qb.push(" AND dp.country_code = ").push_bind(country.clone());
    }
    if let Some(region) = criteria.region_code {
        qb.push(" AND dp.region_code = ").push_bind(region);
    }
    if let Some(city) = criteria.city_code {
        qb.push(" AND dp.city_code = ").push_bind(city);
    }
    if let Some(postal) = &criteria.postal_code {
        qb.push(" AND dp.postal_code = ").push_bind(postal.clone());
    }
    if let Some(code) = non_blank(&criteria.code) {
        qb.push(" AND dp.code LIKE ").push_bind(format!("%{code}%"));
    }
    if let Some(query) = non_blank(&criteria.query) {
        let pattern = format!("%{query}%");
        qb.push(" AND (dp.address LIKE ")
            .push_bind(pattern.clone())
            .push(" OR dp.address_full LIKE ")
            .push_bind(pattern.clone())
            .push(" OR dp.code LIKE ")
            .push_bind(pattern.clone())
            .push(" OR dp.city LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    let flags = [
        ("take_only", criteria.take_only),
        ("is_handout", criteria.is_handout),
        ("is_reception", criteria.is_reception),
        ("is_dressing_room", criteria.is_dressing_room),
        ("is_marketplace", criteria.is_marketplace),
        ("is_ltl", criteria.is_ltl),
        ("have_cashless", criteria.have_cashless),
        ("have_cash", criteria.have_cash),
        ("have_fast_payment_system", criteria.have_fast_payment_system),
        ("allowed_cod", criteria.allowed_cod),
        ("fulfillment", criteria.fulfillment),
    ];
    for (column, wanted) in flags {
        if let Some(wanted) = wanted {
            qb.push(format!(" AND dp.{column} = ")).push_bind(wanted);
        }
    }

    if let Some(weight) = criteria.weight_min_lte {
        qb.push(" AND dp.weight_min <= ").push_bind(weight);
    }
    if let Some(weight) = criteria.weight_max_gte {
        qb.push(" AND dp.weight_max >= ").push_bind(weight);
    }

    for bbox in [criteria.bbox, within].into_iter().flatten() {
        let bbox = bbox.normalized();
        qb.push(" AND dp.latitude BETWEEN ")
            .push_bind(bbox.min_lat)
            .push(" AND ")
            .push_bind(bbox.max_lat)
            .push(" AND dp.longitude BETWEEN ")
            .push_bind(bbox.min_lon)
            .push(" AND ")
            .push_bind(bbox.max_lon);
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn order_clause(sort: ListingSort, descending: bool) -> String {
    let columns: &[&str] = match sort {
        ListingSort::OfficeType => &["dp.office_type", "dp.city_code", "dp.code"],
        ListingSort::Code => &["dp.code"],
        // distance ordering happens after exact filtering
        ListingSort::CityCode | ListingSort::Distance => {
            &["dp.city_code", "dp.office_type", "dp.code"]
        }
    };
    let direction = if descending { " DESC" } else { " ASC" };
    let keys = columns
        .iter()
        .map(|c| format!("{c}{direction}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(" ORDER BY {keys}, dp.id ASC")
}

// =============================================================================
// Unit Tests
// =============================================================================
