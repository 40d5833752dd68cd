//! # Token Lifecycle Manager
//!
//! Owns the courier platform's bearer credential: acquisition, persistence,
//! proactive renewal, and renewal after a rejected call.
//!
//! ## Renewal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ensure_valid()                                                         │
//! │     │                                                                   │
//! │     ├─ read lock: cached and > 5 min left? ──────────────► return      │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  write lock (only one holder; other callers queue here)                │
//! │     │                                                                   │
//! │     ├─ re-check cache (a queued caller finds the fresh one) ─► return  │
//! │     │                                                                   │
//! │     ├─ stored credential with > 5 min left? ─► adopt ──────► return    │
//! │     │                                                                   │
//! │     └─ POST /v2/oauth/token (client_credentials, form-encoded)         │
//! │           │                                                             │
//! │           ├─ replace stored row (failure only logged)                  │
//! │           └─ publish in memory ─────────────────────────────► return   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The write guard is held across the remote call, so at most one renewal is
//! in flight no matter how many callers arrive with an expired credential.

use std::sync::Arc;

use chrono::Duration;
use courier_core::{Credential, TokenResponse, RENEWAL_MARGIN_SECS};
use courier_db::CredentialRepository;
use mockable::Clock;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{CourierError, CourierResult};
use crate::transport::{HttpMethod, HttpTransport, RemoteRequest};

/// Credential acquisition endpoint.
pub const TOKEN_PATH: &str = "/v2/oauth/token";

/// Client credentials for the platform's OAuth endpoint.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    credentials: CredentialRepository,
    clock: Arc<dyn Clock>,
    client: ClientCredentials,
    current: RwLock<Option<Credential>>,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: CredentialRepository,
        clock: Arc<dyn Clock>,
        client: ClientCredentials,
    ) -> Self {
        TokenManager {
            transport,
            credentials,
            clock,
            client,
            current: RwLock::new(None),
        }
    }

    /// Returns a credential with more than the renewal margin left.
    pub async fn ensure_valid(&self) -> CourierResult<Credential> {
        {
            let guard = self.current.read().await;
            if let Some(credential) = guard.as_ref() {
                if !credential.needs_renewal(self.clock.utc()) {
                    return Ok(credential.clone());
                }
            }
        }

        let mut guard = self.current.write().await;

        // Double-check after acquiring write lock
        if let Some(credential) = guard.as_ref() {
            if !credential.needs_renewal(self.clock.utc()) {
                debug!("Credential renewed by another caller");
                return Ok(credential.clone());
            }
        }

        let fresh = self.renew(true).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Discards the cached credential and acquires a new one from the platform.
    ///
    /// The stored row is not adopted; it is the credential being discarded.
    pub async fn force_renew(&self) -> CourierResult<Credential> {
        let mut guard = self.current.write().await;
        *guard = None;

        let fresh = self.renew(false).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Renewal entry point after the platform rejected `rejected`.
    ///
    /// When concurrent calls are all rejected with the same credential, only
    /// the first renews; the rest pick up its replacement.
    pub async fn renew_after_rejection(&self, rejected: &Credential) -> CourierResult<Credential> {
        let mut guard = self.current.write().await;

        if let Some(credential) = guard.as_ref() {
            if credential.access_token != rejected.access_token
                && !credential.needs_renewal(self.clock.utc())
            {
                debug!("Rejected credential already replaced");
                return Ok(credential.clone());
            }
        }

        *guard = None;
        let fresh = self.renew(false).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Cached credential without any I/O.
    pub async fn current(&self) -> Option<Credential> {
        self.current.read().await.clone()
    }

    /// True if a cached credential exists and has not expired.
    pub async fn is_authenticated(&self) -> bool {
        let now = self.clock.utc();
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|c| !c.is_expired(now))
    }

    // =========================================================================
    // Internals (caller holds the write lock)
    // =========================================================================

    async fn renew(&self, adopt_stored: bool) -> CourierResult<Credential> {
        if adopt_stored {
            let cutoff = self.clock.utc() + Duration::seconds(RENEWAL_MARGIN_SECS);
            match self.credentials.latest_valid(cutoff).await {
                Ok(Some(stored)) => {
                    info!(
                        expires_in_secs = stored.remaining_secs(self.clock.utc()),
                        "Adopted stored credential"
                    );
                    return Ok(stored);
                }
                Ok(None) => debug!("No usable stored credential"),
                Err(e) => warn!(error = %e, "Stored credential lookup failed"),
            }
        }

        let credential = self.acquire().await?;

        if let Err(e) = self.credentials.replace(&credential).await {
            warn!(error = %e, "Failed to persist credential; keeping it in memory only");
        }

        info!(expires_in_secs = credential.expires_in, "Acquired credential");
        Ok(credential)
    }

    async fn acquire(&self) -> CourierResult<Credential> {
        let request = RemoteRequest::new(HttpMethod::Post, TOKEN_PATH).form(vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.client.client_id.clone()),
            ("client_secret".to_string(), self.client.client_secret.clone()),
        ]);

        let response = self.transport.send(&request).await.map_err(|e| {
            warn!(error = %e, "Credential endpoint unreachable");
            CourierError::UpstreamUnavailable(format!("credential acquisition: {e}"))
        })?;

        if !response.is_success() {
            warn!(
                status = response.status,
                body = %response.preview(),
                "Credential acquisition rejected"
            );
            return Err(CourierError::UpstreamUnavailable(format!(
                "credential acquisition returned status {}",
                response.status
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&response.body).map_err(|e| {
            CourierError::UpstreamUnavailable(format!("credential response unreadable: {e}"))
        })?;

        Ok(Credential::issued(token, self.clock.utc()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{arc_clock, memory_db, FakeTransport, MutableClock};
    use crate::transport::TransportError;
    use futures_util::future::join_all;
    use serde_json::json;

    fn client() -> ClientCredentials {
        ClientCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
        }
    }

    fn manager(
        transport: Arc<FakeTransport>,
        repo: CredentialRepository,
        clock: Arc<MutableClock>,
    ) -> TokenManager {
        TokenManager::new(transport, repo, clock, client())
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_acquisition() {
        let db = memory_db().await;
        let transport =
            Arc::new(FakeTransport::new().with_token_delay(std::time::Duration::from_millis(50)));
        let clock = arc_clock();
        let tokens = Arc::new(manager(transport.clone(), db.credentials(), clock.clone()));

        // Cached and stored credential both expired.
        tokens.ensure_valid().await.unwrap();
        clock.advance_seconds(3600 + 1);
        assert!(!tokens.is_authenticated().await);

        let results = join_all((0..16).map(|_| {
            let tokens = tokens.clone();
            async move { tokens.ensure_valid().await.unwrap() }
        }))
        .await;

        assert_eq!(transport.token_requests(), 2);
        assert!(results.iter().all(|c| c.access_token == "token-2"));
        assert_eq!(db.credentials().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cached_credential_needs_no_io() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let clock = arc_clock();
        let tokens = manager(transport.clone(), db.credentials(), clock.clone());

        tokens.ensure_valid().await.unwrap();
        clock.advance_seconds(3600 - RENEWAL_MARGIN_SECS - 1);
        let again = tokens.ensure_valid().await.unwrap();

        assert_eq!(again.access_token, "token-1");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_renews_inside_safety_margin() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let clock = arc_clock();
        let tokens = manager(transport.clone(), db.credentials(), clock.clone());

        tokens.ensure_valid().await.unwrap();
        clock.advance_seconds(3600 - RENEWAL_MARGIN_SECS);
        let renewed = tokens.ensure_valid().await.unwrap();

        assert_eq!(renewed.access_token, "token-2");
        assert_eq!(renewed.expires_at, renewed.created_at + Duration::seconds(3600));
        assert_eq!(transport.token_requests(), 2);
        assert_eq!(db.credentials().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_adopts_stored_credential() {
        let db = memory_db().await;
        let clock = arc_clock();
        let stored = Credential::issued(
            serde_json::from_value(json!({
                "access_token": "persisted",
                "token_type": "bearer",
                "expires_in": 3600
            }))
            .unwrap(),
            clock.utc(),
        );
        db.credentials().replace(&stored).await.unwrap();

        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(transport.clone(), db.credentials(), clock);

        let credential = tokens.ensure_valid().await.unwrap();
        assert_eq!(credential.access_token, "persisted");
        assert_eq!(transport.token_requests(), 0);
    }

    #[tokio::test]
    async fn test_stored_credential_inside_margin_is_not_adopted() {
        let db = memory_db().await;
        let clock = arc_clock();
        let stored = Credential::issued(
            serde_json::from_value(json!({
                "access_token": "stale",
                "token_type": "bearer",
                "expires_in": 200
            }))
            .unwrap(),
            clock.utc(),
        );
        db.credentials().replace(&stored).await.unwrap();

        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(transport.clone(), db.credentials(), clock);

        assert_eq!(tokens.ensure_valid().await.unwrap().access_token, "token-1");
    }

    #[tokio::test]
    async fn test_force_renew_skips_store() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(transport.clone(), db.credentials(), arc_clock());

        tokens.ensure_valid().await.unwrap();
        let forced = tokens.force_renew().await.unwrap();

        assert_eq!(forced.access_token, "token-2");
        assert_eq!(tokens.current().await.unwrap().access_token, "token-2");
        assert_eq!(transport.token_requests(), 2);
    }

    #[tokio::test]
    async fn test_rejection_reuses_replacement() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(transport.clone(), db.credentials(), arc_clock());

        let first = tokens.ensure_valid().await.unwrap();
        let a = tokens.renew_after_rejection(&first).await.unwrap();
        let b = tokens.renew_after_rejection(&first).await.unwrap();

        assert_eq!(a.access_token, "token-2");
        assert_eq!(b.access_token, "token-2");
        assert_eq!(transport.token_requests(), 2);
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_upstream_unavailable() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        transport.fail(
            HttpMethod::Post,
            TOKEN_PATH,
            TransportError::Timeout("30s".into()),
        );
        let tokens = manager(transport.clone(), db.credentials(), arc_clock());

        let err = tokens.ensure_valid().await.unwrap_err();
        assert!(err.is_upstream_unavailable());
        assert_eq!(transport.calls_to(HttpMethod::Post, TOKEN_PATH), 1);
        assert!(tokens.current().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_client_credentials() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            HttpMethod::Post,
            TOKEN_PATH,
            401,
            json!({ "error": "invalid_client" }),
        );
        let tokens = manager(transport, db.credentials(), arc_clock());

        assert!(matches!(
            tokens.ensure_valid().await,
            Err(CourierError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_still_publishes() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(transport, db.credentials(), arc_clock());
        db.close().await;

        let credential = tokens.ensure_valid().await.unwrap();
        assert_eq!(credential.access_token, "token-1");
        assert!(tokens.is_authenticated().await);
    }
}
