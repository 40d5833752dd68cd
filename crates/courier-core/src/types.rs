//! # Domain Types
//!
//! Core domain types for the courier integration.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Domain Model                                   │
//! │                                                                         │
//! │  ┌────────────┐      ┌──────────────────┐      ┌────────────────────┐  │
//! │  │ Credential │      │  DeliveryPoint   │1────*│ phones, images,    │  │
//! │  │            │      │  (mirror row)    │      │ work times, excep- │  │
//! │  │ bearer for │      │  keyed by uuid   │      │ tions, dimensions  │  │
//! │  │ every call │      └──────────────────┘      └────────────────────┘  │
//! │  └────────────┘                                                         │
//! │                                                                         │
//! │  ┌────────────┐1────*┌──────────────────┐1────*┌────────────────────┐  │
//! │  │ OrderRecord│      │ OrderPackage     │      │ OrderItem          │  │
//! │  │            │1──┐  └──────────────────┘      └────────────────────┘  │
//! │  └────────────┘   ├─*  OrderRequestRecord                              │
//! │                   └─*  RelatedEntityRecord                             │
//! │                                                                         │
//! │  ┌────────────┐                                                         │
//! │  │ PrintJob   │  fingerprint-keyed cache of generated documents        │
//! │  └────────────┘                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## TypeScript Generation
//! Types exposed to the admin frontend derive `TS`; bindings are written by
//! `cargo test` into `bindings/`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

// =============================================================================
// Credential
// =============================================================================

/// Safety margin before expiry at which a credential is renewed (5 minutes).
pub const RENEWAL_MARGIN_SECS: i64 = 300;

/// Raw response of the client-credentials token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// A bearer credential issued by the courier platform.
///
/// `expires_at` is always `created_at + expires_in`; construct through
/// [`Credential::issued`] so the two never drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: Option<String>,
    pub jti: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Builds a credential from a token response received at `created_at`.
    pub fn issued(response: TokenResponse, created_at: DateTime<Utc>) -> Self {
        Credential {
            expires_at: created_at + Duration::seconds(response.expires_in),
            access_token: response.access_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
            scope: response.scope,
            jti: response.jti,
            created_at,
        }
    }

    /// True once `now` is within the renewal margin of expiry.
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(RENEWAL_MARGIN_SECS) >= self.expires_at
    }

    /// True once `now` has passed expiry (no grace period).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds left until expiry, floored at zero.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// =============================================================================
// Delivery Points
// =============================================================================

/// Kind of pickup location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum OfficeType {
    /// Staffed pickup office.
    Pvz,
    /// Parcel locker.
    Postamat,
    /// Anything the platform reports that we do not recognise.
    Unknown,
}

impl OfficeType {
    /// Maps the platform's `type` field, case-insensitively.
    pub fn from_remote(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
            Some("PVZ") => OfficeType::Pvz,
            Some("POSTAMAT") => OfficeType::Postamat,
            _ => OfficeType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OfficeType::Pvz => "PVZ",
            OfficeType::Postamat => "POSTAMAT",
            OfficeType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for OfficeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header row of the local delivery point mirror.
///
/// ## Capability flags
/// Every flag is tri-state: `Some(true)`, `Some(false)`, or `None` when the
/// platform did not report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeliveryPoint {
    pub uuid: String,
    pub code: String,
    pub owner_code: Option<String>,
    #[serde(rename = "type")]
    pub office_type: OfficeType,

    pub country_code: Option<String>,
    pub region_code: Option<i64>,
    pub city_code: Option<i64>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub address_full: Option<String>,

    pub weight_min: Option<f64>,
    pub weight_max: Option<f64>,

    pub take_only: Option<bool>,
    pub is_handout: Option<bool>,
    pub is_reception: Option<bool>,
    pub is_dressing_room: Option<bool>,
    pub is_marketplace: Option<bool>,
    pub is_ltl: Option<bool>,
    pub have_cashless: Option<bool>,
    pub have_cash: Option<bool>,
    pub have_fast_payment_system: Option<bool>,
    pub allowed_cod: Option<bool>,
    pub fulfillment: Option<bool>,

    /// Distance reported by the platform itself (only set on filtered pulls).
    pub distance: Option<f64>,

    #[ts(as = "String")]
    pub last_seen_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[ts(type = "unknown")]
    pub raw: Value,
}

impl DeliveryPoint {
    /// Coordinates, if both are known.
    pub fn position(&self) -> Option<crate::geo::GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(crate::geo::GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeliveryPointPhone {
    #[serde(skip)]
    #[ts(skip)]
    pub dp_uuid: String,
    pub number: String,
    pub additional: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeliveryPointImage {
    #[serde(skip)]
    #[ts(skip)]
    pub dp_uuid: String,
    pub number: Option<i64>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct WorkTime {
    #[serde(skip)]
    #[ts(skip)]
    pub dp_uuid: String,
    /// 1 = Monday ... 7 = Sunday.
    pub day: i64,
    /// Opening hours as reported, e.g. `"10:00/20:00"`.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct WorkTimeException {
    #[serde(skip)]
    #[ts(skip)]
    pub dp_uuid: String,
    pub date_start: String,
    pub date_end: Option<String>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub is_working: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Dimension {
    #[serde(skip)]
    #[ts(skip)]
    pub dp_uuid: String,
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

/// A delivery point together with all of its child collections.
///
/// This is both what the mapper produces from a remote record and what
/// filtered listings return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeliveryPointDetails {
    #[serde(flatten)]
    pub point: DeliveryPoint,
    pub phones: Vec<DeliveryPointPhone>,
    pub office_image_list: Vec<DeliveryPointImage>,
    pub work_time_list: Vec<WorkTime>,
    pub work_time_exception_list: Vec<WorkTimeException>,
    pub dimensions: Vec<Dimension>,
}

impl DeliveryPointDetails {
    /// Wraps a header with empty child collections.
    pub fn bare(point: DeliveryPoint) -> Self {
        DeliveryPointDetails {
            point,
            phones: Vec::new(),
            office_image_list: Vec::new(),
            work_time_list: Vec::new(),
            work_time_exception_list: Vec::new(),
            dimensions: Vec::new(),
        }
    }
}

/// A delivery point with its computed distance from a query center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeliveryPointHit {
    #[serde(flatten)]
    pub point: DeliveryPoint,
    pub distance_km: f64,
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub total: u64,
    pub rows: Vec<T>,
}

impl<T> Listing<T> {
    pub fn empty() -> Self {
        Listing {
            total: 0,
            rows: Vec::new(),
        }
    }
}

/// Sort key for filtered listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSort {
    /// City code, then office type, then code.
    #[default]
    CityCode,
    OfficeType,
    Code,
    /// Distance from `near`; falls back to the default order without one.
    Distance,
}

/// Criteria for filtered delivery point listings.
///
/// `bbox` bounds are normalized (min/max swapped when inverted) before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryPointCriteria {
    pub office_type: Option<OfficeType>,
    pub country_code: Option<String>,
    pub region_code: Option<i64>,
    pub city_code: Option<i64>,
    pub postal_code: Option<String>,
    /// Case-insensitive substring of the point code.
    pub code: Option<String>,
    /// Case-insensitive substring over address, full address, code, and city.
    pub query: Option<String>,

    pub take_only: Option<bool>,
    pub is_handout: Option<bool>,
    pub is_reception: Option<bool>,
    pub is_dressing_room: Option<bool>,
    pub is_marketplace: Option<bool>,
    pub is_ltl: Option<bool>,
    pub have_cashless: Option<bool>,
    pub have_cash: Option<bool>,
    pub have_fast_payment_system: Option<bool>,
    pub allowed_cod: Option<bool>,
    pub fulfillment: Option<bool>,

    /// Points whose minimum accepted weight is at most this value.
    pub weight_min_lte: Option<f64>,
    /// Points whose maximum accepted weight is at least this value.
    pub weight_max_gte: Option<f64>,

    pub bbox: Option<crate::geo::BoundingBox>,
    /// Optional radius narrowing: `(center, radius_km)`.
    pub near: Option<(crate::geo::GeoPoint, f64)>,

    #[serde(default)]
    pub sort: ListingSort,
    #[serde(default)]
    pub descending: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// =============================================================================
// Orders
// =============================================================================

/// Order submission as built by callers.
///
/// Fields left `None` are stripped before the payload leaves the process;
/// anything not modelled here can ride along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderDraft {
    #[serde(rename = "type")]
    pub order_type: Option<i64>,
    pub additional_order_types: Option<Vec<i64>>,
    pub number: Option<String>,
    pub accompanying_number: Option<String>,
    pub tariff_code: i64,
    pub comment: Option<String>,
    pub developer_key: Option<String>,
    pub shipment_point: Option<String>,
    pub delivery_point: Option<String>,
    pub date_invoice: Option<String>,
    pub shipper_name: Option<String>,
    pub shipper_address: Option<String>,
    pub delivery_recipient_cost: Option<Value>,
    pub sender: Option<Value>,
    pub recipient: Option<Value>,
    pub from_location: Option<Value>,
    pub to_location: Option<Value>,
    pub services: Option<Value>,
    pub packages: Vec<PackageDraft>,
    pub print: Option<String>,
    pub is_client_return: Option<bool>,
    pub has_reverse_order: Option<bool>,
    pub widget_token: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageDraft {
    pub number: String,
    pub weight: i64,
    pub length: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub comment: Option<String>,
    pub items: Vec<ItemDraft>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDraft {
    pub name: String,
    pub ware_key: String,
    pub marking: Option<String>,
    pub payment: Option<Value>,
    pub cost: f64,
    pub weight: i64,
    pub weight_gross: Option<i64>,
    pub amount: i64,
    pub name_i18n: Option<String>,
    pub brand: Option<String>,
    pub country_code: Option<String>,
    pub material: Option<Value>,
    pub wifi_gsm: Option<bool>,
    pub url: Option<String>,
    pub seller: Option<Value>,
    pub feacn_code: Option<String>,
    pub jewel_uin: Option<String>,
    pub used: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Persisted order header, without identity or timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderHeader {
    pub uuid: Option<String>,
    pub order_type: Option<i64>,
    pub additional_types: Option<Value>,
    pub number: Option<String>,
    pub accompanying_number: Option<String>,
    pub tariff_code: Option<i64>,
    pub comment: Option<String>,
    pub shipment_point: Option<String>,
    pub delivery_point: Option<String>,
    pub date_invoice: Option<String>,
    pub shipper_name: Option<String>,
    pub shipper_address: Option<String>,
    pub is_client_return: Option<bool>,
    pub has_reverse_order: Option<bool>,
    pub developer_key: Option<String>,
    pub print_type: Option<String>,
    pub widget_token: Option<String>,
    pub sender: Option<Value>,
    pub recipient: Option<Value>,
    pub from_location: Option<Value>,
    pub to_location: Option<Value>,
    pub services: Option<Value>,
    pub raw_request: Value,
    pub raw_response: Value,
    /// State of the first request entry in the latest remote snapshot.
    pub request_state: Option<String>,
    /// Latest status code (or request type right after registration).
    pub status_note: Option<String>,
    /// Tracking number; absent until the platform assigns one.
    pub cdek_number: Option<String>,
}

/// Order header as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderRecord {
    pub id: i64,
    #[serde(flatten)]
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub header: OrderHeader,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderPackageRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub order_id: i64,
    pub number: Option<String>,
    pub weight: Option<i64>,
    pub length: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub comment: Option<String>,
    pub package_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItemRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub order_package_id: i64,
    pub name: Option<String>,
    pub ware_key: Option<String>,
    pub marking: Option<String>,
    pub payment: Option<Value>,
    pub weight: Option<i64>,
    pub weight_gross: Option<i64>,
    pub amount: Option<i64>,
    pub name_i18n: Option<String>,
    pub brand: Option<String>,
    pub country_code: Option<String>,
    pub material: Option<String>,
    pub wifi_gsm: Option<bool>,
    pub url: Option<String>,
    pub seller: Option<Value>,
    pub cost: Option<f64>,
    pub feacn_code: Option<String>,
    pub jewel_uin: Option<String>,
    pub used: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderRequestRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub order_id: i64,
    pub request_uuid: Option<String>,
    pub request_type: Option<String>,
    pub date_time: Option<String>,
    pub state: Option<String>,
    pub errors: Option<Value>,
    pub warnings: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RelatedEntityRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub order_id: i64,
    pub uuid: Option<String>,
    pub entity_type: Option<String>,
    pub url: Option<String>,
    pub create_time: Option<String>,
    pub cdek_number: Option<String>,
    pub date: Option<String>,
    pub time_from: Option<String>,
    pub time_to: Option<String>,
}

/// A package with its items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageGraph {
    #[serde(flatten)]
    pub package: OrderPackageRecord,
    pub items: Vec<OrderItemRecord>,
}

/// Everything written for one registered order.
///
/// Child ids and parent keys are placeholders (`0`) until persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderGraph {
    pub header: OrderHeader,
    pub packages: Vec<PackageGraph>,
    pub requests: Vec<OrderRequestRecord>,
    pub related: Vec<RelatedEntityRecord>,
}

/// A stored order with its full child graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOrder {
    #[serde(flatten)]
    pub order: OrderRecord,
    pub packages: Vec<PackageGraph>,
    pub requests: Vec<OrderRequestRecord>,
    pub related: Vec<RelatedEntityRecord>,
}

/// Filter for local order listings.
///
/// `date_to` is inclusive: orders created any time on that day match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderListFilter {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub tariff_code: Option<i64>,
}

// =============================================================================
// Print Jobs
// =============================================================================

/// Which document the platform should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PrintKind {
    /// Waybill / receipt form.
    Receipt,
    /// Package barcode labels.
    Barcode,
}

impl PrintKind {
    /// Path segment under `/v2/print/`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            PrintKind::Receipt => "orders",
            PrintKind::Barcode => "barcodes",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrintKind::Receipt => "receipt",
            PrintKind::Barcode => "barcode",
        }
    }
}

/// Print job status.
///
/// ## State Machine
/// ```text
///   SUBMITTED ──► ACCEPTED ──► PROCESSING ──► READY
///       │            │             │
///       └────────────┴─────────────┴──► INVALID | REMOVED | TIMED_OUT
/// ```
/// `SUBMITTED` and `TIMED_OUT` are local states; the rest come from the
/// platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum PrintStatus {
    Submitted,
    Accepted,
    Processing,
    Ready,
    Invalid,
    Removed,
    TimedOut,
}

impl PrintStatus {
    /// Parses a status code reported by the platform.
    ///
    /// Returns `None` for codes the poller should treat as "keep waiting".
    pub fn from_remote(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "ACCEPTED" => Some(PrintStatus::Accepted),
            "PROCESSING" => Some(PrintStatus::Processing),
            "READY" => Some(PrintStatus::Ready),
            "INVALID" => Some(PrintStatus::Invalid),
            "REMOVED" => Some(PrintStatus::Removed),
            _ => None,
        }
    }

    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PrintStatus::Ready | PrintStatus::Invalid | PrintStatus::Removed | PrintStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrintStatus::Submitted => "SUBMITTED",
            PrintStatus::Accepted => "ACCEPTED",
            PrintStatus::Processing => "PROCESSING",
            PrintStatus::Ready => "READY",
            PrintStatus::Invalid => "INVALID",
            PrintStatus::Removed => "REMOVED",
            PrintStatus::TimedOut => "TIMED_OUT",
        }
    }
}

impl std::fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One order reference in a print request: either identifier is enough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PrintOrderRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdek_number: Option<String>,
}

impl PrintOrderRef {
    pub fn by_uuid(uuid: impl Into<String>) -> Self {
        PrintOrderRef {
            order_uuid: Some(uuid.into()),
            cdek_number: None,
        }
    }

    pub fn by_number(number: impl Into<String>) -> Self {
        PrintOrderRef {
            order_uuid: None,
            cdek_number: Some(number.into()),
        }
    }
}

/// Cached print job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PrintJob {
    pub id: i64,
    pub uuid: String,
    pub fingerprint: String,
    pub kind: PrintKind,
    pub status: PrintStatus,
    pub download_url: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Audit Log
// =============================================================================

/// One outbound call attempt, as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ApiLogEntry {
    pub method: String,
    pub endpoint: String,
    pub request_data: Option<String>,
    pub response_data: Option<String>,
    pub status_code: Option<i64>,
    pub duration_ms: i64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn token(expires_in: i64) -> TokenResponse {
        TokenResponse {
            access_token: "abc".to_string(),
            token_type: "bearer".to_string(),
            expires_in,
            scope: None,
            jti: None,
        }
    }

    #[test]
    fn test_credential_expiry_is_creation_plus_lifetime() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let credential = Credential::issued(token(3600), created);

        assert_eq!(credential.expires_at, created + Duration::seconds(3600));
        assert_eq!(credential.remaining_secs(created), 3600);
    }

    #[test]
    fn test_credential_renewal_margin() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let credential = Credential::issued(token(3600), created);

        // 6 minutes left: still fine
        assert!(!credential.needs_renewal(created + Duration::minutes(54)));
        // exactly 5 minutes left: renew
        assert!(credential.needs_renewal(created + Duration::minutes(55)));
        assert!(!credential.is_expired(created + Duration::minutes(59)));
        assert!(credential.is_expired(created + Duration::minutes(60)));
    }

    #[test]
    fn test_office_type_from_remote() {
        assert_eq!(OfficeType::from_remote(Some("pvz")), OfficeType::Pvz);
        assert_eq!(OfficeType::from_remote(Some("POSTAMAT")), OfficeType::Postamat);
        assert_eq!(OfficeType::from_remote(Some("ALL")), OfficeType::Unknown);
        assert_eq!(OfficeType::from_remote(None), OfficeType::Unknown);
    }

    #[test]
    fn test_print_status_from_remote() {
        assert_eq!(PrintStatus::from_remote("READY"), Some(PrintStatus::Ready));
        assert_eq!(PrintStatus::from_remote("processing"), Some(PrintStatus::Processing));
        assert_eq!(PrintStatus::from_remote("SOMETHING_NEW"), None);
        assert!(PrintStatus::Invalid.is_terminal());
        assert!(!PrintStatus::Accepted.is_terminal());
    }

    #[test]
    fn test_print_ref_serialization_skips_missing_identifier() {
        let json = serde_json::to_value(PrintOrderRef::by_number("1106394409")).unwrap();
        assert_eq!(json, serde_json::json!({ "cdek_number": "1106394409" }));
    }
}
