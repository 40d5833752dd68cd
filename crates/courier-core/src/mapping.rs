//! # Remote Record Mapping
//!
//! Translates courier platform JSON into local rows.
//!
//! ## Delivery Points
//! ```text
//! remote record                         local rows
//! ─────────────                         ──────────
//! uuid, code, type, owner_code   ──►   DeliveryPoint header
//! location { lat, lon, city… }   ──►     (flattened location)
//! take_only, have_cash, …        ──►     Option<bool> flags
//! phones[]                       ──►   DeliveryPointPhone*
//! office_image_list[]            ──►   DeliveryPointImage*
//! work_time_list[]               ──►   WorkTime*
//! work_time_exception_list[]     ──►   WorkTimeException*
//! dimensions[]                   ──►   Dimension*
//! (whole record)                 ──►   raw
//! ```
//!
//! ## Orders
//! [`map_order_exchange`] builds an [`OrderGraph`] from the payload that was
//! sent and the registration response.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::payload::{json_or_none, normalize_flag, number_f64, number_i64, text};
use crate::types::*;

// =============================================================================
// Delivery Points
// =============================================================================

/// Maps one remote delivery point record.
///
/// Returns `None` for records without a `uuid` or `code`; the directory
/// occasionally contains such stubs and they cannot be keyed locally.
/// Missing child collections map to empty vectors.
pub fn map_delivery_point(record: &Value, seen_at: DateTime<Utc>) -> Option<DeliveryPointDetails> {
    let uuid = text(record.get("uuid"))?;
    let code = text(record.get("code"))?;
    let location = record.get("location").unwrap_or(&Value::Null);

    let point = DeliveryPoint {
        uuid: uuid.clone(),
        code,
        owner_code: text(record.get("owner_code")),
        office_type: OfficeType::from_remote(record.get("type").and_then(Value::as_str)),
        country_code: text(location.get("country_code")),
        region_code: number_i64(location.get("region_code")),
        city_code: number_i64(location.get("city_code")),
        city: text(location.get("city")),
        postal_code: text(location.get("postal_code")),
        latitude: number_f64(location.get("latitude")),
        longitude: number_f64(location.get("longitude")),
        address: text(location.get("address")),
        address_full: text(location.get("address_full")),
        weight_min: number_f64(record.get("weight_min")),
        weight_max: number_f64(record.get("weight_max")),
        take_only: normalize_flag(record.get("take_only")),
        is_handout: normalize_flag(record.get("is_handout")),
        is_reception: normalize_flag(record.get("is_reception")),
        is_dressing_room: normalize_flag(record.get("is_dressing_room")),
        is_marketplace: normalize_flag(record.get("is_marketplace")),
        is_ltl: normalize_flag(record.get("is_ltl")),
        have_cashless: normalize_flag(record.get("have_cashless")),
        have_cash: normalize_flag(record.get("have_cash")),
        have_fast_payment_system: normalize_flag(record.get("have_fast_payment_system")),
        allowed_cod: normalize_flag(record.get("allowed_cod")),
        fulfillment: normalize_flag(record.get("fulfillment")),
        distance: number_f64(record.get("distance")),
        last_seen_at: seen_at,
        deleted_at: None,
        raw: record.clone(),
    };

    let phones = entries(record, "phones")
        .filter_map(|p| {
            Some(DeliveryPointPhone {
                dp_uuid: uuid.clone(),
                number: text(p.get("number"))?,
                additional: text(p.get("additional")),
            })
        })
        .collect();

    let office_image_list = entries(record, "office_image_list")
        .filter_map(|im| {
            Some(DeliveryPointImage {
                dp_uuid: uuid.clone(),
                number: number_i64(im.get("number")),
                url: text(im.get("url"))?,
            })
        })
        .collect();

    let work_time_list = entries(record, "work_time_list")
        .filter_map(|w| {
            Some(WorkTime {
                dp_uuid: uuid.clone(),
                day: number_i64(w.get("day"))?,
                time: text(w.get("time"))?,
            })
        })
        .collect();

    let work_time_exception_list = entries(record, "work_time_exception_list")
        .filter_map(|e| {
            Some(WorkTimeException {
                dp_uuid: uuid.clone(),
                date_start: text(e.get("date_start"))?,
                date_end: text(e.get("date_end")),
                time_start: text(e.get("time_start")),
                time_end: text(e.get("time_end")),
                is_working: normalize_flag(e.get("is_working")).unwrap_or(false),
            })
        })
        .collect();

    let dimensions = entries(record, "dimensions")
        .filter_map(|d| {
            Some(Dimension {
                dp_uuid: uuid.clone(),
                width: number_f64(d.get("width"))?,
                height: number_f64(d.get("height"))?,
                depth: number_f64(d.get("depth"))?,
            })
        })
        .collect();

    Some(DeliveryPointDetails {
        point,
        phones,
        office_image_list,
        work_time_list,
        work_time_exception_list,
        dimensions,
    })
}

fn entries<'a>(record: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    record
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter())
        .into_iter()
        .flatten()
}

// =============================================================================
// Orders
// =============================================================================

/// Builds the order graph persisted after a successful registration.
///
/// `sent` is the sanitized payload that went over the wire; `response` is
/// the platform's answer. The tracking number is taken from the response
/// entity, or failing that from the first related entity carrying one.
pub fn map_order_exchange(sent: &Value, response: &Value) -> OrderGraph {
    let entity = response.get("entity").unwrap_or(&Value::Null);
    let requests: Vec<&Value> = response
        .get("requests")
        .and_then(Value::as_array)
        .map(|r| r.iter().collect())
        .unwrap_or_default();
    let related: Vec<&Value> = response
        .get("related_entities")
        .and_then(Value::as_array)
        .map(|r| r.iter().collect())
        .unwrap_or_default();

    let cdek_number = text(entity.get("cdek_number"))
        .or_else(|| related.iter().find_map(|r| text(r.get("cdek_number"))));

    let header = OrderHeader {
        uuid: text(entity.get("uuid")),
        order_type: number_i64(sent.get("type")),
        additional_types: json_or_none(sent.get("additional_order_types")),
        number: text(sent.get("number")),
        accompanying_number: text(sent.get("accompanying_number")),
        tariff_code: number_i64(sent.get("tariff_code")),
        comment: text(sent.get("comment")),
        shipment_point: text(sent.get("shipment_point")),
        delivery_point: text(sent.get("delivery_point")),
        date_invoice: text(sent.get("date_invoice")),
        shipper_name: text(sent.get("shipper_name")),
        shipper_address: text(sent.get("shipper_address")),
        is_client_return: sent.get("is_client_return").and_then(Value::as_bool),
        has_reverse_order: sent.get("has_reverse_order").and_then(Value::as_bool),
        developer_key: text(sent.get("developer_key")),
        print_type: text(sent.get("print")),
        widget_token: text(sent.get("widget_token")),
        sender: json_or_none(sent.get("sender")),
        recipient: json_or_none(sent.get("recipient")),
        from_location: json_or_none(sent.get("from_location")),
        to_location: json_or_none(sent.get("to_location")),
        services: json_or_none(sent.get("services")),
        raw_request: sent.clone(),
        raw_response: response.clone(),
        request_state: requests.first().and_then(|r| text(r.get("state"))),
        status_note: requests.first().and_then(|r| text(r.get("type"))),
        cdek_number,
    };

    let packages = entries(sent, "packages")
        .map(|p| PackageGraph {
            package: OrderPackageRecord {
                number: text(p.get("number")),
                weight: number_i64(p.get("weight")),
                length: number_i64(p.get("length")),
                width: number_i64(p.get("width")),
                height: number_i64(p.get("height")),
                comment: text(p.get("comment")),
                package_id: text(p.get("package_id")),
                ..Default::default()
            },
            items: entries(p, "items").map(map_order_item).collect(),
        })
        .collect();

    let requests = requests
        .into_iter()
        .map(|r| OrderRequestRecord {
            request_uuid: text(r.get("request_uuid")),
            request_type: text(r.get("type")),
            date_time: text(r.get("date_time")),
            state: text(r.get("state")),
            errors: json_or_none(r.get("errors")),
            warnings: json_or_none(r.get("warnings")),
            ..Default::default()
        })
        .collect();

    let related = related
        .into_iter()
        .map(|r| RelatedEntityRecord {
            uuid: text(r.get("uuid")),
            entity_type: text(r.get("type")),
            url: text(r.get("url")),
            create_time: text(r.get("create_time")),
            cdek_number: text(r.get("cdek_number")),
            date: text(r.get("date")),
            time_from: text(r.get("time_from")),
            time_to: text(r.get("time_to")),
            ..Default::default()
        })
        .collect();

    OrderGraph {
        header,
        packages,
        requests,
        related,
    }
}

fn map_order_item(item: &Value) -> OrderItemRecord {
    OrderItemRecord {
        name: text(item.get("name")),
        ware_key: text(item.get("ware_key")),
        marking: text(item.get("marking")),
        payment: json_or_none(item.get("payment")),
        weight: number_i64(item.get("weight")),
        weight_gross: number_i64(item.get("weight_gross")),
        amount: number_i64(item.get("amount")),
        name_i18n: text(item.get("name_i18n")),
        brand: text(item.get("brand")),
        country_code: text(item.get("country_code")),
        material: text(item.get("material")),
        wifi_gsm: item.get("wifi_gsm").and_then(Value::as_bool),
        url: text(item.get("url")),
        seller: json_or_none(item.get("seller")),
        cost: number_f64(item.get("cost")),
        feacn_code: text(item.get("feacn_code")),
        jewel_uin: text(item.get("jewel_uin")),
        used: item.get("used").and_then(Value::as_bool),
        ..Default::default()
    }
}

/// Fields extracted from an order status snapshot during reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub cdek_number: Option<String>,
    pub request_state: Option<String>,
    /// Code of the most recent status entry.
    pub status_code: Option<String>,
}

/// Reads the reconciliation-relevant fields from `GET /v2/orders/{uuid}`.
pub fn read_order_snapshot(info: &Value) -> OrderSnapshot {
    let entity = info.get("entity").unwrap_or(&Value::Null);
    OrderSnapshot {
        cdek_number: text(entity.get("cdek_number")),
        request_state: info
            .get("requests")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(|r| text(r.get("state"))),
        status_code: entity
            .get("statuses")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
            .and_then(|s| text(s.get("code"))),
    }
}

/// Latest status code of a print job response (`entity.statuses[last].code`).
pub fn read_print_status(info: &Value) -> Option<String> {
    info.get("entity")?
        .get("statuses")?
        .as_array()?
        .last()
        .and_then(|s| text(s.get("code")))
}
