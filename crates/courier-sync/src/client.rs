//! # Outbound Client
//!
//! Every call to the courier platform (except credential acquisition) goes
//! through [`RemoteClient`].
//!
//! ## Call Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  request(req)                                                           │
//! │     │                                                                   │
//! │     ├─ tokens.ensure_valid() ─► Authorization: Bearer <token>          │
//! │     │                                                                   │
//! │     ├─ send ──► audit (detached)                                       │
//! │     │    │                                                              │
//! │     │    └─ 401? ─► tokens.renew_after_rejection()                     │
//! │     │                 └─ send once more ──► audit (detached)           │
//! │     │                      └─ 401 again? ─► AuthorizationExpired       │
//! │     │                                                                   │
//! │     └─ classify status:                                                │
//! │          2xx            → Ok(response)                                  │
//! │          404            → NotFound                                      │
//! │          502/503/504    → UpstreamUnavailable                           │
//! │          other ≥ 400    → UpstreamRejected { status, payload }          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Audit rows are written by background tasks; a failed audit insert is
//! logged and never reaches the caller.

use std::sync::Arc;
use std::time::Instant;

use courier_core::ApiLogEntry;
use courier_db::ApiLogRepository;
use mockable::Clock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CourierError, CourierResult};
use crate::runtime::BackgroundTasks;
use crate::token::TokenManager;
use crate::transport::{HttpMethod, HttpTransport, RemoteRequest, RemoteResponse, TransportError};

pub struct RemoteClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    audit: ApiLogRepository,
    background: BackgroundTasks,
    clock: Arc<dyn Clock>,
}

impl RemoteClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
        audit: ApiLogRepository,
        background: BackgroundTasks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        RemoteClient {
            transport,
            tokens,
            audit,
            background,
            clock,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Sends an authorized request, replaying it once after a 401.
    pub async fn request(&self, mut request: RemoteRequest) -> CourierResult<RemoteResponse> {
        let credential = self.tokens.ensure_valid().await?;
        request.set_header("Authorization", credential.authorization());

        let response = self.attempt(&request).await?;
        if response.status != 401 {
            return classify(&request, response);
        }

        warn!(
            method = %request.method,
            path = %request.path,
            "Authorization rejected; renewing credential and replaying once"
        );
        let renewed = self.tokens.renew_after_rejection(&credential).await?;
        request.set_header("Authorization", renewed.authorization());

        let replay = self.attempt(&request).await?;
        if replay.status == 401 {
            warn!(path = %request.path, "Replay rejected with a fresh credential");
            return Err(CourierError::AuthorizationExpired);
        }
        classify(&request, replay)
    }

    /// GET returning the JSON body.
    pub async fn get_json(&self, path: &str, query: Vec<(String, String)>) -> CourierResult<Value> {
        let response = self
            .request(RemoteRequest::new(HttpMethod::Get, path).query(query))
            .await?;
        Ok(response.json()?)
    }

    /// POST with a JSON body, returning the JSON body.
    pub async fn post_json(&self, path: &str, body: Value) -> CourierResult<Value> {
        let response = self
            .request(RemoteRequest::new(HttpMethod::Post, path).json(body))
            .await?;
        Ok(response.json()?)
    }

    /// GET returning the raw body (PDF downloads).
    pub async fn get_bytes(&self, path: &str) -> CourierResult<Vec<u8>> {
        let response = self.request(RemoteRequest::new(HttpMethod::Get, path)).await?;
        Ok(response.body)
    }

    /// One send plus its audit record.
    async fn attempt(&self, request: &RemoteRequest) -> CourierResult<RemoteResponse> {
        let started = Instant::now();
        let outcome = self.transport.send(request).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        self.record(request, &outcome, duration_ms);

        match outcome {
            Ok(response) => {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status,
                    duration_ms,
                    "Courier call completed"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "Courier call failed"
                );
                Err(e.into())
            }
        }
    }

    fn record(
        &self,
        request: &RemoteRequest,
        outcome: &Result<RemoteResponse, TransportError>,
        duration_ms: i64,
    ) {
        let (response_data, status_code, success) = match outcome {
            Ok(r) => (Some(r.audit_text()), Some(i64::from(r.status)), r.is_success()),
            Err(e) => (Some(e.to_string()), None, false),
        };

        let entry = ApiLogEntry {
            method: request.method.as_str().to_string(),
            endpoint: request.path.clone(),
            request_data: request.body_text(),
            response_data,
            status_code,
            duration_ms,
            success,
            created_at: self.clock.utc(),
        };

        let audit = self.audit.clone();
        self.background.spawn("api-audit", async move {
            if let Err(e) = audit.insert(&entry).await {
                warn!(endpoint = %entry.endpoint, error = %e, "Failed to write API audit row");
            }
            Ok(())
        });
    }
}

/// Maps a non-401 response onto the error taxonomy.
fn classify(request: &RemoteRequest, response: RemoteResponse) -> CourierResult<RemoteResponse> {
    match response.status {
        s if (200..300).contains(&s) => Ok(response),
        404 => Err(CourierError::NotFound(format!(
            "{} {}",
            request.method, request.path
        ))),
        502..=504 => Err(CourierError::UpstreamUnavailable(format!(
            "status {}: {}",
            response.status,
            response.preview()
        ))),
        status => {
            debug!(status, body = %response.preview(), "Courier platform rejected request");
            Err(CourierError::UpstreamRejected {
                status,
                payload: response.payload(),
            })
        }
    }
}
