//! # Directory Lookups
//!
//! Thin, read-only pass-throughs to the platform's reference directories:
//! tariff calculation, locations, single-order lookups, and raw delivery
//! point pages. Nothing here touches the local database.

use std::sync::Arc;

use courier_core::geo::GeoPoint;
use courier_core::validation::validate_tracking_number;
use courier_core::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::client::RemoteClient;
use crate::delivery_points::DeliveryPointFilter;
use crate::error::CourierResult;

// =============================================================================
// Tariff Calculation
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculatorLocation {
    /// City code from the platform's city directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contragent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
}

/// Package dimensions for a quote; grams and centimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSize {
    pub weight: i64,
    pub length: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffListRequest {
    /// Planned hand-over time, e.g. `2025-03-24T14:15:22+0700`.
    pub date: String,
    /// 1 for online store orders, 2 for plain delivery.
    #[serde(rename = "type", default = "default_order_type")]
    pub order_type: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_order_types: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<i64>,
    #[serde(default = "default_lang")]
    pub lang: String,
    pub from_location: CalculatorLocation,
    pub to_location: CalculatorLocation,
    pub packages: Vec<PackageSize>,
}

fn default_order_type() -> i64 {
    1
}

fn default_lang() -> String {
    "rus".to_string()
}

impl TariffListRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.packages.is_empty() {
            return Err(ValidationError::Required {
                field: "packages".to_string(),
            });
        }
        for (i, p) in self.packages.iter().enumerate() {
            if p.weight < 1 || p.length < 1 || p.width < 1 || p.height < 1 {
                return Err(ValidationError::OutOfRange {
                    field: format!("packages[{i}]"),
                    min: 1.0,
                    max: f64::MAX,
                });
            }
        }
        if !(1..=2).contains(&self.order_type) {
            return Err(ValidationError::OutOfRange {
                field: "type".to_string(),
                min: 1.0,
                max: 2.0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub min: String,
    pub max: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffQuote {
    pub tariff_code: i64,
    pub tariff_name: String,
    #[serde(default)]
    pub tariff_description: Option<String>,
    pub delivery_mode: i64,
    pub delivery_sum: f64,
    pub period_min: i64,
    pub period_max: i64,
    #[serde(default)]
    pub calendar_min: Option<i64>,
    #[serde(default)]
    pub calendar_max: Option<i64>,
    #[serde(default)]
    pub delivery_date_range: Option<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNotice {
    pub code: String,
    #[serde(default)]
    pub additional_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffListResponse {
    #[serde(default)]
    pub tariff_codes: Vec<TariffQuote>,
    #[serde(default)]
    pub errors: Vec<RemoteNotice>,
    #[serde(default)]
    pub warnings: Vec<RemoteNotice>,
}

impl TariffListResponse {
    /// Cheapest quote, if any.
    pub fn cheapest(&self) -> Option<&TariffQuote> {
        self.tariff_codes
            .iter()
            .min_by(|a, b| a.delivery_sum.total_cmp(&b.delivery_sum))
    }
}

// =============================================================================
// Location Queries
// =============================================================================

/// City suggestion query; defaults to Russia and ten suggestions.
#[derive(Debug, Clone, Default)]
pub struct CitySuggestQuery {
    pub name: String,
    pub country_codes: Option<String>,
    pub size: Option<u32>,
}

impl CitySuggestQuery {
    fn to_query(&self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), self.name.clone()),
            (
                "country_codes".to_string(),
                self.country_codes
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| "RU".to_string()),
            ),
            (
                "size".to_string(),
                self.size.filter(|s| *s > 0).unwrap_or(10).to_string(),
            ),
        ]
    }
}

// =============================================================================
// Directory
// =============================================================================

pub struct Directory {
    client: Arc<RemoteClient>,
}

impl Directory {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Directory { client }
    }

    /// `POST /v2/calculator/tarifflist`
    pub async fn calculate_tariffs(
        &self,
        request: &TariffListRequest,
    ) -> CourierResult<TariffListResponse> {
        request.validate()?;
        let body = serde_json::to_value(request)?;
        let response = self.client.post_json("/v2/calculator/tarifflist", body).await?;
        let parsed: TariffListResponse = serde_json::from_value(response)?;
        debug!(quotes = parsed.tariff_codes.len(), "Tariff list received");
        Ok(parsed)
    }

    /// `GET /v2/location/suggest/cities`
    pub async fn suggest_cities(&self, query: &CitySuggestQuery) -> CourierResult<Value> {
        if query.name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "name".to_string(),
            }
            .into());
        }
        self.client
            .get_json("/v2/location/suggest/cities", query.to_query())
            .await
    }

    /// `GET /v2/location/regions`
    pub async fn regions(&self, params: Vec<(String, String)>) -> CourierResult<Value> {
        self.client.get_json("/v2/location/regions", params).await
    }

    /// `GET /v2/location/postalcodes`
    pub async fn postal_codes(&self, city_code: i64) -> CourierResult<Value> {
        self.client
            .get_json(
                "/v2/location/postalcodes",
                vec![("city_code".to_string(), city_code.to_string())],
            )
            .await
    }

    /// `GET /v2/location/geolocation`
    pub async fn locate(&self, point: GeoPoint) -> CourierResult<Value> {
        point.validate()?;
        self.client
            .get_json(
                "/v2/location/geolocation",
                vec![
                    ("latitude".to_string(), point.lat.to_string()),
                    ("longitude".to_string(), point.lon.to_string()),
                ],
            )
            .await
    }

    /// `GET /v2/location/cities`
    pub async fn cities(&self, params: Vec<(String, String)>) -> CourierResult<Value> {
        self.client.get_json("/v2/location/cities", params).await
    }

    /// `GET /v2/orders?cdek_number=`
    pub async fn order_by_tracking_number(&self, number: &str) -> CourierResult<Value> {
        validate_tracking_number(number)?;
        self.client
            .get_json(
                "/v2/orders",
                vec![("cdek_number".to_string(), number.trim().to_string())],
            )
            .await
    }

    /// `GET /v2/orders/{uuid}`
    pub async fn order_by_uuid(&self, uuid: &str) -> CourierResult<Value> {
        let uuid = Uuid::parse_str(uuid.trim()).map_err(|e| ValidationError::InvalidFormat {
            field: "uuid".to_string(),
            reason: e.to_string(),
        })?;
        self.client
            .get_json(&format!("/v2/orders/{uuid}"), Vec::new())
            .await
    }

    /// One raw page of `GET /v2/deliverypoints`, without touching the mirror.
    pub async fn delivery_points(
        &self,
        filter: &DeliveryPointFilter,
        page: Option<u32>,
        size: Option<u32>,
    ) -> CourierResult<Value> {
        let mut query = filter.to_query();
        if let Some(page) = page {
            query.push(("page".to_string(), page.to_string()));
        }
        if let Some(size) = size {
            query.push(("size".to_string(), size.to_string()));
        }
        self.client.get_json("/v2/deliverypoints", query).await
    }
}
