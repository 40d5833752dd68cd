//! # Delivery Point Sync Engine
//!
//! Pulls the platform's delivery point directory page by page into the
//! local mirror.
//!
//! ## Run Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  run_started = now                                                      │
//! │  Replace? ──► clear mirror (one transaction)                            │
//! │                                                                         │
//! │  page 0, 1, 2 ...                                                       │
//! │     │  GET /v2/deliverypoints?type=ALL&size=N&page=n (+filter)          │
//! │     │     └─ unavailable? ─► exponential backoff, same page             │
//! │     │                                                                   │
//! │     ├─ empty page or max_records reached ─► stop                        │
//! │     ├─ map records (last_seen_at = run_started)                         │
//! │     ├─ write in batch_size chunks, one transaction each                 │
//! │     └─ pause                                                            │
//! │                                                                         │
//! │  Upsert, unfiltered, ended on an empty page?                            │
//! │     ──► soft-delete rows with last_seen_at < run_started                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed run leaves every committed batch in place. Runs on one engine
//! are serialized. Filtered runs and runs cut short by `max_records` never
//! soft-delete: they have not seen the whole directory.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use courier_core::mapping::map_delivery_point;
use courier_core::{DeliveryPointDetails, OfficeType};
use courier_db::DeliveryPointRepository;
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::RemoteClient;
use crate::config::{SyncMode, SyncSettings};
use crate::error::{CourierError, CourierResult};
use crate::runtime::{BackgroundTasks, Sleeper};

const DELIVERY_POINTS_PATH: &str = "/v2/deliverypoints";

// =============================================================================
// Filter
// =============================================================================

/// Remote-side narrowing of a directory pull.
///
/// Unset fields are not sent. Without an office type the pull asks for
/// every type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPointFilter {
    pub office_type: Option<OfficeType>,
    pub country_code: Option<String>,
    pub region_code: Option<i64>,
    pub city_code: Option<i64>,
    pub postal_code: Option<String>,
    pub fias_guid: Option<String>,

    pub take_only: Option<bool>,
    pub is_handout: Option<bool>,
    pub is_reception: Option<bool>,
    pub is_dressing_room: Option<bool>,
    pub is_marketplace: Option<bool>,
    pub is_ltl: Option<bool>,
    pub have_cashless: Option<bool>,
    pub have_cash: Option<bool>,
    pub allowed_cod: Option<bool>,
    pub fulfillment: Option<bool>,

    pub weight_min: Option<i64>,
    pub weight_max: Option<i64>,
    pub lang: Option<String>,
}

impl DeliveryPointFilter {
    /// True when the filter restricts which points the platform returns.
    ///
    /// Language only changes how points are described.
    pub fn narrows_directory(&self) -> bool {
        let has_text =
            |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        matches!(self.office_type, Some(OfficeType::Pvz | OfficeType::Postamat))
            || has_text(&self.country_code)
            || self.region_code.is_some()
            || self.city_code.is_some()
            || has_text(&self.postal_code)
            || has_text(&self.fias_guid)
            || [
                self.take_only,
                self.is_handout,
                self.is_reception,
                self.is_dressing_room,
                self.is_marketplace,
                self.is_ltl,
                self.have_cashless,
                self.have_cash,
                self.allowed_cod,
                self.fulfillment,
            ]
            .iter()
            .any(Option::is_some)
            || self.weight_min.is_some()
            || self.weight_max.is_some()
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();

        let office_type = match self.office_type {
            Some(OfficeType::Pvz) => "PVZ",
            Some(OfficeType::Postamat) => "POSTAMAT",
            Some(OfficeType::Unknown) | None => "ALL",
        };
        query.push(("type".to_string(), office_type.to_string()));

        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                query.push((key.to_string(), value));
            }
        };

        push("country_code", self.country_code.clone());
        push("region_code", self.region_code.map(|v| v.to_string()));
        push("city_code", self.city_code.map(|v| v.to_string()));
        push("postal_code", self.postal_code.clone());
        push("fias_guid", self.fias_guid.clone());

        for (key, flag) in [
            ("take_only", self.take_only),
            ("is_handout", self.is_handout),
            ("is_reception", self.is_reception),
            ("is_dressing_room", self.is_dressing_room),
            ("is_marketplace", self.is_marketplace),
            ("is_ltl", self.is_ltl),
            ("have_cashless", self.have_cashless),
            ("have_cash", self.have_cash),
            ("allowed_cod", self.allowed_cod),
            ("fulfillment", self.fulfillment),
        ] {
            push(key, flag.map(|f| f.to_string()));
        }

        push("weight_min", self.weight_min.map(|v| v.to_string()));
        push("weight_max", self.weight_max.map(|v| v.to_string()));
        push("lang", self.lang.clone());

        query
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Points that became visible in the mirror during this run.
    pub created: u64,
    /// Points soft-deleted at the end of an upsert run.
    pub removed: u64,
    /// Non-empty pages processed.
    pub pages: u32,
    /// Records received and kept (after truncation to the record limit).
    pub fetched: usize,
    /// Records dropped for lacking a uuid or code.
    pub skipped: usize,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        SyncReport {
            mode,
            created: 0,
            removed: 0,
            pages: 0,
            fetched: 0,
            skipped: 0,
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

pub struct DeliveryPointSync {
    client: Arc<RemoteClient>,
    repo: DeliveryPointRepository,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    settings: SyncSettings,
    running: Mutex<()>,
}

impl DeliveryPointSync {
    pub fn new(
        client: Arc<RemoteClient>,
        repo: DeliveryPointRepository,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        settings: SyncSettings,
    ) -> Self {
        DeliveryPointSync {
            client,
            repo,
            clock,
            sleeper,
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn default_mode(&self) -> SyncMode {
        self.settings.mode
    }

    /// Pulls the directory (or the filtered part of it) into the mirror.
    pub async fn sync(
        &self,
        filter: &DeliveryPointFilter,
        mode: SyncMode,
    ) -> CourierResult<SyncReport> {
        let _guard = self.running.lock().await;

        let run_started = self.clock.utc();
        let mut report = SyncReport::new(mode);

        info!(%mode, ?filter, "Delivery point sync started");

        if mode == SyncMode::Replace {
            let cleared = self.repo.clear_all().await?;
            debug!(cleared, "Mirror cleared for replace run");
        }

        let base_query = filter.to_query();
        let max_records = self.settings.max_records;
        let mut page: u32 = 0;
        let mut exhausted = false;

        loop {
            if report.fetched >= max_records {
                info!(max_records, "Record limit reached");
                break;
            }

            let mut records = self.fetch_page(&base_query, page).await?;
            if records.is_empty() {
                debug!(page, "Empty page; directory exhausted");
                exhausted = true;
                break;
            }

            let remaining = max_records - report.fetched;
            if records.len() > remaining {
                records.truncate(remaining);
            }
            report.fetched += records.len();
            report.pages += 1;

            let mapped: Vec<DeliveryPointDetails> = records
                .iter()
                .filter_map(|record| map_delivery_point(record, run_started))
                .collect();
            report.skipped += records.len() - mapped.len();

            for batch in mapped.chunks(self.settings.batch_size.max(1)) {
                report.created += match mode {
                    SyncMode::Replace => self.repo.insert_batch(batch).await?,
                    SyncMode::Upsert => self.repo.upsert_batch(batch).await?,
                };
            }

            debug!(
                page,
                records = records.len(),
                total = report.fetched,
                "Delivery point page stored"
            );

            page += 1;
            self.sleeper.sleep(self.settings.page_pause()).await;
        }

        if mode == SyncMode::Upsert {
            if exhausted && !filter.narrows_directory() {
                report.removed = self.repo.mark_missing(run_started).await?;
            } else {
                info!(
                    exhausted,
                    filtered = filter.narrows_directory(),
                    "Partial pull; unseen points kept"
                );
            }
        }

        info!(
            %mode,
            created = report.created,
            removed = report.removed,
            pages = report.pages,
            fetched = report.fetched,
            skipped = report.skipped,
            "Delivery point sync finished"
        );
        Ok(report)
    }

    /// Launches a run on `background`; the outcome is only logged.
    pub fn spawn_sync(
        self: &Arc<Self>,
        background: &BackgroundTasks,
        filter: DeliveryPointFilter,
        mode: SyncMode,
    ) {
        let sync = Arc::clone(self);
        background.spawn("delivery-point-sync", async move {
            sync.sync(&filter, mode).await.map(|_| ())
        });
    }

    /// Fetches one page, retrying while the platform is unavailable.
    async fn fetch_page(
        &self,
        base_query: &[(String, String)],
        page: u32,
    ) -> CourierResult<Vec<Value>> {
        let mut query = base_query.to_vec();
        query.push(("size".to_string(), self.settings.page_size.to_string()));
        query.push(("page".to_string(), page.to_string()));

        let mut backoff = self.create_backoff();
        loop {
            match self.client.get_json(DELIVERY_POINTS_PATH, query.clone()).await {
                Ok(Value::Array(records)) => return Ok(records),
                Ok(Value::Null) => return Ok(Vec::new()),
                Ok(other) => {
                    return Err(CourierError::MalformedResponse(format!(
                        "delivery point page {page} is not an array: {}",
                        preview(&other)
                    )))
                }
                Err(e) if e.is_upstream_unavailable() => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(
                            page,
                            ?delay,
                            error = %e,
                            "Delivery point page unavailable; retrying"
                        );
                        self.sleeper.sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.settings.retry_initial_ms),
            max_interval: Duration::from_secs(self.settings.retry_max_elapsed_secs.max(1)),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.settings.retry_max_elapsed_secs)),
            ..Default::default()
        }
    }
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    match text.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}
