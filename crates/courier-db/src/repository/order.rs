//! # Order Repository
//!
//! Persistence of registered orders and their child graph.
//!
//! ## Graph Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    INSERT orders                      → order_id                       │
//! │    for each package:                                                    │
//! │      INSERT order_packages            → package_id                     │
//! │      INSERT order_items (package_id)                                   │
//! │    INSERT order_requests  (order_id)                                   │
//! │    INSERT order_related_entities (order_id)                            │
//! │  COMMIT    (any failure → ROLLBACK, nothing visible)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use courier_core::validation::order_list_window;
use courier_core::{
    Listing, OrderGraph, OrderItemRecord, OrderListFilter, OrderPackageRecord, OrderRecord,
    OrderRequestRecord, PackageGraph, RelatedEntityRecord, StoredOrder,
};

const ORDER_COLUMNS: &str = r#"
    id, uuid, order_type, additional_types, number, accompanying_number, tariff_code,
    comment, shipment_point, delivery_point, date_invoice, shipper_name, shipper_address,
    is_client_return, has_reverse_order, developer_key, print_type, widget_token,
    sender, recipient, from_location, to_location, services,
    raw_request, raw_response, request_state, status_note, cdek_number,
    created_at, updated_at
"#;

/// Repository for registered orders.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Writes the header and every child row in one transaction.
    ///
    /// ## Returns
    /// The local order id.
    ///
    /// ## Errors
    /// Any failing insert rolls the whole graph back; callers never observe
    /// a header without its packages, items, requests, or related entities.
    pub async fn insert_graph(&self, graph: &OrderGraph, now: DateTime<Utc>) -> DbResult<i64> {
        let h = &graph.header;
        let mut tx = self.pool.begin().await?;

        let order_id = sqlx::query(
            r#"
            INSERT INTO orders (
                uuid, order_type, additional_types, number, accompanying_number, tariff_code,
                comment, shipment_point, delivery_point, date_invoice, shipper_name,
                shipper_address, is_client_return, has_reverse_order, developer_key,
                print_type, widget_token, sender, recipient, from_location, to_location,
                services, raw_request, raw_response, request_state, status_note, cdek_number,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?28
            )
            "#,
        )
        .bind(&h.uuid)
        .bind(h.order_type)
        .bind(&h.additional_types)
        .bind(&h.number)
        .bind(&h.accompanying_number)
        .bind(h.tariff_code)
        .bind(&h.comment)
        .bind(&h.shipment_point)
        .bind(&h.delivery_point)
        .bind(&h.date_invoice)
        .bind(&h.shipper_name)
        .bind(&h.shipper_address)
        .bind(h.is_client_return)
        .bind(h.has_reverse_order)
        .bind(&h.developer_key)
        .bind(&h.print_type)
        .bind(&h.widget_token)
        .bind(&h.sender)
        .bind(&h.recipient)
        .bind(&h.from_location)
        .bind(&h.to_location)
        .bind(&h.services)
        .bind(&h.raw_request)
        .bind(&h.raw_response)
        .bind(&h.request_state)
        .bind(&h.status_note)
        .bind(&h.cdek_number)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for package in &graph.packages {
            let p = &package.package;
            let package_id = sqlx::query(
                r#"
                INSERT INTO order_packages
                    (order_id, number, weight, length, width, height, comment, package_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(order_id)
            .bind(&p.number)
            .bind(p.weight)
            .bind(p.length)
            .bind(p.width)
            .bind(p.height)
            .bind(&p.comment)
            .bind(&p.package_id)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for item in &package.items {
                sqlx::query(
                    r#"
                    INSERT INTO order_items (
                        order_package_id, name, ware_key, marking, payment, weight,
                        weight_gross, amount, name_i18n, brand, country_code, material,
                        wifi_gsm, url, seller, cost, feacn_code, jewel_uin, used
                    ) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                        ?16, ?17, ?18, ?19
                    )
                    "#,
                )
                .bind(package_id)
                .bind(&item.name)
                .bind(&item.ware_key)
                .bind(&item.marking)
                .bind(&item.payment)
                .bind(item.weight)
                .bind(item.weight_gross)
                .bind(item.amount)
                .bind(&item.name_i18n)
                .bind(&item.brand)
                .bind(&item.country_code)
                .bind(&item.material)
                .bind(item.wifi_gsm)
                .bind(&item.url)
                .bind(&item.seller)
                .bind(item.cost)
                .bind(&item.feacn_code)
                .bind(&item.jewel_uin)
                .bind(item.used)
                .execute(&mut *tx)
                .await?;
            }
        }

        for request in &graph.requests {
            sqlx::query(
                r#"
                INSERT INTO order_requests
                    (order_id, request_uuid, request_type, date_time, state, errors, warnings)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(order_id)
            .bind(&request.request_uuid)
            .bind(&request.request_type)
            .bind(&request.date_time)
            .bind(&request.state)
            .bind(&request.errors)
            .bind(&request.warnings)
            .execute(&mut *tx)
            .await?;
        }

        for related in &graph.related {
            sqlx::query(
                r#"
                INSERT INTO order_related_entities
                    (order_id, uuid, entity_type, url, create_time, cdek_number,
                     date, time_from, time_to)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(order_id)
            .bind(&related.uuid)
            .bind(&related.entity_type)
            .bind(&related.url)
            .bind(&related.create_time)
            .bind(&related.cdek_number)
            .bind(&related.date)
            .bind(&related.time_from)
            .bind(&related.time_to)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            order_id,
            uuid = ?h.uuid,
            packages = graph.packages.len(),
            "Order graph persisted"
        );
        Ok(order_id)
    }

    /// Records the outcome of a successful reconciliation poll.
    ///
    /// ## Errors
    /// `DbError::NotFound` if the order no longer exists.
    pub async fn apply_reconciliation(
        &self,
        order_id: i64,
        cdek_number: &str,
        raw_response: &Value,
        request_state: Option<&str>,
        status_note: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET cdek_number = ?2,
                raw_response = ?3,
                request_state = COALESCE(?4, request_state),
                status_note = COALESCE(?5, status_note),
                updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(cdek_number)
        .bind(raw_response)
        .bind(request_state)
        .bind(status_note)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", order_id.to_string()));
        }

        debug!(order_id, cdek_number, "Tracking number stored");
        Ok(())
    }

    /// An order with its full graph, by local id.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<StoredOrder>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        let order = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match order {
            Some(order) => Ok(Some(self.load_graph(order).await?)),
            None => Ok(None),
        }
    }

    /// An order with its full graph, by remote uuid.
    pub async fn get_by_uuid(&self, uuid: &str) -> DbResult<Option<StoredOrder>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE uuid = ?1");
        let order = sqlx::query_as::<_, OrderRecord>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        match order {
            Some(order) => Ok(Some(self.load_graph(order).await?)),
            None => Ok(None),
        }
    }

    /// Newest orders first.
    ///
    /// `date_to` covers the whole day; the window is clamped to at most 100
    /// rows (50 by default).
    pub async fn list(&self, filter: &OrderListFilter) -> DbResult<Listing<OrderRecord>> {
        let (limit, offset) = order_list_window(filter.limit, filter.offset);

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM orders");
        push_filter(&mut count_qb, filter);
        let total = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(offset));

        let rows = qb.build_query_as::<OrderRecord>().fetch_all(&self.pool).await?;

        Ok(Listing {
            total: total as u64,
            rows,
        })
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn load_graph(&self, order: OrderRecord) -> DbResult<StoredOrder> {
        let packages = sqlx::query_as::<_, OrderPackageRecord>(
            r#"
            SELECT id, order_id, number, weight, length, width, height, comment, package_id
            FROM order_packages WHERE order_id = ?1 ORDER BY id
            "#,
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, OrderItemRecord>(
            r#"
            SELECT i.id, i.order_package_id, i.name, i.ware_key, i.marking, i.payment,
                   i.weight, i.weight_gross, i.amount, i.name_i18n, i.brand, i.country_code,
                   i.material, i.wifi_gsm, i.url, i.seller, i.cost, i.feacn_code,
                   i.jewel_uin, i.used
            FROM order_items i
            INNER JOIN order_packages p ON p.id = i.order_package_id
            WHERE p.order_id = ?1
            ORDER BY i.id
            "#,
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?;

        let requests = sqlx::query_as::<_, OrderRequestRecord>(
            r#"
            SELECT id, order_id, request_uuid, request_type, date_time, state, errors, warnings
            FROM order_requests WHERE order_id = ?1 ORDER BY id
            "#,
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?;

        let related = sqlx::query_as::<_, RelatedEntityRecord>(
            r#"
            SELECT id, order_id, uuid, entity_type, url, create_time, cdek_number,
                   date, time_from, time_to
            FROM order_related_entities WHERE order_id = ?1 ORDER BY id
            "#,
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?;

        let packages = packages
            .into_iter()
            .map(|package| PackageGraph {
                items: items
                    .iter()
                    .filter(|i| i.order_package_id == package.id)
                    .cloned()
                    .collect(),
                package,
            })
            .collect();

        Ok(StoredOrder {
            order,
            packages,
            requests,
            related,
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &OrderListFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(from) = filter.date_from {
        qb.push(" AND created_at >= ")
            .push_bind(from.and_time(NaiveTime::MIN).and_utc());
    }
    if let Some(to) = filter.date_to {
        let next_day = (to + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
        qb.push(" AND created_at < ").push_bind(next_day);
    }
    if let Some(tariff) = filter.tariff_code {
        qb.push(" AND tariff_code = ").push_bind(tariff);
    }
}
