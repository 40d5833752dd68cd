//! # Order Registration Pipeline
//!
//! Registers orders with the courier platform, stores the full exchange
//! locally, and backfills the tracking number the platform assigns later.
//!
//! ## Registration
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OrderDraft                                                             │
//! │     │ serialize ─► sanitize ─► package comments                         │
//! │     ▼                                                                   │
//! │  POST /v2/orders ──► rejected? ─► UpstreamRejected (nothing stored)     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  order graph, one transaction (tracking number if already assigned)     │
//! │     │                                                                   │
//! │     └─ entity uuid known? ─► spawn reconciliation, return immediately   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reconciliation
//! One attempt per configured delay (default 5s, 10s, 20s, 30s). Each
//! attempt sleeps first, then reads `GET /v2/orders/{uuid}`. The first
//! snapshot with a tracking number is written and ends the loop. Failed
//! attempts are logged and the loop moves on; running out of attempts is a
//! warning, never an error for the caller.

use std::sync::Arc;
use std::time::Duration;

use courier_core::mapping::{map_order_exchange, read_order_snapshot};
use courier_core::payload::{ensure_package_comments, sanitize_payload};
use courier_core::{OrderDraft, OrderListFilter, OrderRecord, Listing, StoredOrder, ValidationError};
use courier_db::OrderRepository;
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::RemoteClient;
use crate::error::{CourierError, CourierResult};
use crate::runtime::{BackgroundTasks, Sleeper};

const ORDERS_PATH: &str = "/v2/orders";

/// Local identifiers of a freshly registered order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOrderRef {
    pub order_id: i64,
    pub uuid: Option<String>,
    pub cdek_number: Option<String>,
}

/// Result of [`OrderPipeline::register_order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredOrder {
    /// The platform's response, as received.
    pub remote: Value,
    pub local: LocalOrderRef,
}

/// How a reconciliation loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Assigned { cdek_number: String, attempt: usize },
    Exhausted { attempts: usize },
}

/// Owns the reconciliation schedule and spawns loops on the shared
/// background executor.
#[derive(Clone)]
pub struct OrderPipeline {
    client: Arc<RemoteClient>,
    repo: OrderRepository,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    background: BackgroundTasks,
    delays: Vec<Duration>,
}

impl OrderPipeline {
    pub fn new(
        client: Arc<RemoteClient>,
        repo: OrderRepository,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        background: BackgroundTasks,
        delays: Vec<Duration>,
    ) -> Self {
        OrderPipeline {
            client,
            repo,
            clock,
            sleeper,
            background,
            delays,
        }
    }

    /// Submits `draft` and persists the exchange.
    ///
    /// ## Errors
    /// - `InvalidRequest` for a draft without packages
    /// - `UpstreamRejected` with the platform's error payload; nothing is stored
    /// - `Persistence` if the order graph could not be written
    pub async fn register_order(&self, draft: &OrderDraft) -> CourierResult<RegisteredOrder> {
        if draft.packages.is_empty() {
            return Err(ValidationError::Required {
                field: "packages".to_string(),
            }
            .into());
        }

        let mut payload = sanitize_payload(serde_json::to_value(draft)?)
            .ok_or_else(|| CourierError::InvalidRequest("order payload is empty".to_string()))?;
        ensure_package_comments(&mut payload);

        let response = self.client.post_json(ORDERS_PATH, payload.clone()).await?;

        let graph = map_order_exchange(&payload, &response);
        let order_id = self.repo.insert_graph(&graph, self.clock.utc()).await?;

        let local = LocalOrderRef {
            order_id,
            uuid: graph.header.uuid.clone(),
            cdek_number: graph.header.cdek_number.clone(),
        };

        info!(
            order_id,
            uuid = ?local.uuid,
            cdek_number = ?local.cdek_number,
            "Order registered"
        );

        match &local.uuid {
            Some(uuid) => self.spawn_reconciliation(order_id, uuid.clone()),
            None => warn!(
                order_id,
                "Order response carried no entity uuid; skipping reconciliation"
            ),
        }

        Ok(RegisteredOrder {
            remote: response,
            local,
        })
    }

    fn spawn_reconciliation(&self, order_id: i64, uuid: String) {
        let pipeline = self.clone();
        self.background.spawn("order-reconcile", async move {
            pipeline.reconcile(order_id, &uuid).await.map(|_| ())
        });
    }

    /// Runs the reconciliation loop in the caller's task.
    ///
    /// Only a failure to write a found tracking number is returned as an
    /// error; remote failures are logged per attempt.
    pub async fn reconcile(&self, order_id: i64, uuid: &str) -> CourierResult<ReconcileOutcome> {
        let path = format!("{ORDERS_PATH}/{uuid}");

        for (index, delay) in self.delays.iter().enumerate() {
            let attempt = index + 1;
            self.sleeper.sleep(*delay).await;

            let info = match self.client.get_json(&path, Vec::new()).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(order_id, uuid, attempt, error = %e, "Reconciliation attempt failed");
                    continue;
                }
            };

            let snapshot = read_order_snapshot(&info);
            let Some(cdek_number) = snapshot.cdek_number else {
                debug!(order_id, uuid, attempt, "Tracking number not assigned yet");
                continue;
            };

            self.repo
                .apply_reconciliation(
                    order_id,
                    &cdek_number,
                    &info,
                    snapshot.request_state.as_deref(),
                    snapshot.status_code.as_deref(),
                    self.clock.utc(),
                )
                .await?;

            info!(order_id, uuid, attempt, %cdek_number, "Tracking number reconciled");
            return Ok(ReconcileOutcome::Assigned { cdek_number, attempt });
        }

        warn!(
            order_id,
            uuid,
            attempts = self.delays.len(),
            "Tracking number still unassigned after all reconciliation attempts"
        );
        Ok(ReconcileOutcome::Exhausted {
            attempts: self.delays.len(),
        })
    }

    // =========================================================================
    // Local Queries
    // =========================================================================

    pub async fn get_by_id(&self, id: i64) -> CourierResult<StoredOrder> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| CourierError::NotFound(format!("order {id}")))
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> CourierResult<StoredOrder> {
        self.repo
            .get_by_uuid(uuid)
            .await?
            .ok_or_else(|| CourierError::NotFound(format!("order {uuid}")))
    }

    pub async fn list(&self, filter: &OrderListFilter) -> CourierResult<Listing<OrderRecord>> {
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(ValidationError::InvalidFormat {
                    field: "date_from".to_string(),
                    reason: "must not be after date_to".to_string(),
                }
                .into());
            }
        }
        Ok(self.repo.list(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{arc_clock, memory_db, FakeTransport, RecordingSleeper};
    use crate::token::{ClientCredentials, TokenManager};
    use crate::transport::{HttpMethod, RequestBody};
    use courier_core::{ItemDraft, PackageDraft};
    use courier_db::Database;
    use serde_json::json;

    const UUID: &str = "72753031-0000-4000-8000-000000000001";

    struct Fixture {
        db: Database,
        transport: Arc<FakeTransport>,
        sleeper: Arc<RecordingSleeper>,
        background: BackgroundTasks,
        pipeline: OrderPipeline,
    }

    async fn fixture() -> Fixture {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let clock = arc_clock();
        let sleeper = Arc::new(RecordingSleeper::default());
        let background = BackgroundTasks::new();
        let tokens = Arc::new(TokenManager::new(
            transport.clone(),
            db.credentials(),
            clock.clone(),
            ClientCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
        ));
        let client = Arc::new(RemoteClient::new(
            transport.clone(),
            tokens,
            db.api_logs(),
            background.clone(),
            clock.clone(),
        ));
        let pipeline = OrderPipeline::new(
            client,
            db.orders(),
            clock,
            sleeper.clone(),
            background.clone(),
            [5, 10, 20, 30].into_iter().map(Duration::from_secs).collect(),
        );
        Fixture {
            db,
            transport,
            sleeper,
            background,
            pipeline,
        }
    }

    fn draft() -> OrderDraft {
        OrderDraft {
            number: Some("SHOP-1001".into()),
            tariff_code: 136,
            comment: Some("".into()),
            shipment_point: Some("MSK123".into()),
            delivery_point: Some("SPB45".into()),
            recipient: Some(json!({ "name": "Иван Петров", "email": null, "phones": [{ "number": "+79990000000" }] })),
            packages: vec![PackageDraft {
                number: "1".into(),
                weight: 1500,
                length: Some(20),
                width: Some(15),
                height: Some(10),
                items: vec![ItemDraft {
                    name: "Книга".into(),
                    ware_key: "BOOK-1".into(),
                    payment: Some(json!({ "value": 0 })),
                    cost: 900.0,
                    weight: 1500,
                    amount: 1,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn accepted(cdek_number: Option<&str>) -> Value {
        let mut entity = json!({ "uuid": UUID });
        if let Some(n) = cdek_number {
            entity["cdek_number"] = json!(n);
        }
        json!({
            "entity": entity,
            "requests": [{
                "request_uuid": "req-1",
                "type": "CREATE",
                "date_time": "2024-03-01T12:00:00+0000",
                "state": "ACCEPTED"
            }]
        })
    }

    #[tokio::test]
    async fn test_registration_sanitizes_and_persists() {
        let f = fixture().await;
        f.transport.respond(HttpMethod::Post, ORDERS_PATH, 202, accepted(None));

        let registered = f.pipeline.register_order(&draft()).await.unwrap();

        assert_eq!(registered.local.uuid.as_deref(), Some(UUID));
        assert_eq!(registered.local.cdek_number, None);

        let sent = f
            .transport
            .calls()
            .into_iter()
            .find(|c| c.method == HttpMethod::Post && c.path == ORDERS_PATH)
            .unwrap();
        let RequestBody::Json(body) = sent.body else {
            panic!("order payload must be JSON");
        };
        assert!(body.get("comment").is_none());
        assert!(body["recipient"].get("email").is_none());
        assert_eq!(body["packages"][0]["comment"], "-");

        let stored = f.pipeline.get_by_id(registered.local.order_id).await.unwrap();
        assert_eq!(stored.packages.len(), 1);
        assert_eq!(stored.packages[0].items.len(), 1);
        assert_eq!(stored.requests[0].state.as_deref(), Some("ACCEPTED"));
        assert_eq!(stored.order.header.status_note.as_deref(), Some("CREATE"));
    }

    #[tokio::test]
    async fn test_immediate_tracking_number_is_stored() {
        let f = fixture().await;
        f.transport
            .respond(HttpMethod::Post, ORDERS_PATH, 200, accepted(Some("1106394409")));
        f.transport.respond(
            HttpMethod::Get,
            &format!("{ORDERS_PATH}/{UUID}"),
            200,
            json!({ "entity": { "uuid": UUID, "cdek_number": "1106394409" } }),
        );

        let registered = f.pipeline.register_order(&draft()).await.unwrap();
        assert_eq!(registered.local.cdek_number.as_deref(), Some("1106394409"));

        let stored = f.pipeline.get_by_uuid(UUID).await.unwrap();
        assert_eq!(stored.order.header.cdek_number.as_deref(), Some("1106394409"));
        f.background.drain().await;
    }

    #[tokio::test]
    async fn test_rejected_registration_stores_nothing() {
        let f = fixture().await;
        f.transport.respond(
            HttpMethod::Post,
            ORDERS_PATH,
            400,
            json!({ "requests": [{ "state": "INVALID", "errors": [{ "code": "v2_tariff_not_found" }] }] }),
        );

        let err = f.pipeline.register_order(&draft()).await.unwrap_err();

        assert!(matches!(err, CourierError::UpstreamRejected { status: 400, .. }));
        assert_eq!(f.db.orders().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconciliation_is_bounded() {
        let f = fixture().await;
        let path = format!("{ORDERS_PATH}/{UUID}");
        f.transport.respond(HttpMethod::Post, ORDERS_PATH, 202, accepted(None));
        f.transport
            .respond(HttpMethod::Get, &path, 200, json!({ "entity": { "uuid": UUID } }));

        let registered = f.pipeline.register_order(&draft()).await.unwrap();
        f.background.drain().await;

        assert_eq!(f.transport.calls_to(HttpMethod::Get, &path), 4);
        assert_eq!(
            f.sleeper.recorded(),
            [5, 10, 20, 30].map(Duration::from_secs).to_vec()
        );
        let stored = f.pipeline.get_by_id(registered.local.order_id).await.unwrap();
        assert_eq!(stored.order.header.cdek_number, None);
    }

    #[tokio::test]
    async fn test_reconciliation_stops_at_first_number() {
        let f = fixture().await;
        let path = format!("{ORDERS_PATH}/{UUID}");
        f.transport.respond(HttpMethod::Post, ORDERS_PATH, 202, accepted(None));
        f.transport
            .respond(HttpMethod::Get, &path, 200, json!({ "entity": { "uuid": UUID } }));
        f.transport.respond(HttpMethod::Get, &path, 503, json!({}));
        f.transport.respond(
            HttpMethod::Get,
            &path,
            200,
            json!({
                "entity": {
                    "uuid": UUID,
                    "cdek_number": "1106394409",
                    "statuses": [{ "code": "CREATED" }, { "code": "ACCEPTED" }]
                },
                "requests": [{ "state": "SUCCESSFUL" }]
            }),
        );

        let registered = f.pipeline.register_order(&draft()).await.unwrap();
        f.background.drain().await;

        assert_eq!(f.transport.calls_to(HttpMethod::Get, &path), 3);
        let stored = f.pipeline.get_by_id(registered.local.order_id).await.unwrap();
        assert_eq!(stored.order.header.cdek_number.as_deref(), Some("1106394409"));
        assert_eq!(stored.order.header.request_state.as_deref(), Some("SUCCESSFUL"));
        assert_eq!(stored.order.header.status_note.as_deref(), Some("CREATED"));
    }

    #[tokio::test]
    async fn test_reconcile_reports_outcome() {
        let f = fixture().await;
        f.transport.respond(HttpMethod::Post, ORDERS_PATH, 202, accepted(None));
        let registered = f.pipeline.register_order(&draft()).await.unwrap();
        f.background.drain().await;

        let outcome = f
            .pipeline
            .reconcile(registered.local.order_id, UUID)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Exhausted { attempts: 4 });
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.pipeline.get_by_id(42).await,
            Err(CourierError::NotFound(_))
        ));
        assert!(matches!(
            f.pipeline.get_by_uuid("nope").await,
            Err(CourierError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_draft_without_packages_is_rejected_locally() {
        let f = fixture().await;
        let mut empty = draft();
        empty.packages.clear();

        assert!(matches!(
            f.pipeline.register_order(&empty).await,
            Err(CourierError::InvalidRequest(_))
        ));
        assert_eq!(f.transport.calls_to(HttpMethod::Post, ORDERS_PATH), 0);
    }
}
