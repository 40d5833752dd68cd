//! Shared test doubles: a scripted transport, a mutable clock, and a
//! recording sleeper.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use courier_db::{Database, DbConfig};
use mockable::Clock;
use serde_json::{json, Value};

use crate::runtime::Sleeper;
use crate::token::TOKEN_PATH;
use crate::transport::{HttpMethod, HttpTransport, RemoteRequest, RemoteResponse, TransportError};

// =============================================================================
// Clock
// =============================================================================

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => panic!("failed to convert Duration to TimeDelta: {error}"),
        };
        *self.lock_clock() += delta;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

// =============================================================================
// Sleeper
// =============================================================================

/// Returns immediately and remembers every requested delay.
#[derive(Default)]
pub struct RecordingSleeper(pub Mutex<Vec<Duration>>);

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Transport
// =============================================================================

#[derive(Clone)]
pub enum Reply {
    Respond(RemoteResponse),
    Fail(TransportError),
}

/// Transport answering from per-route scripts.
///
/// Each route replays its queued replies in order and then keeps repeating
/// the last one. Unscripted routes answer 404. The token endpoint issues
/// `token-1`, `token-2`, ... once enabled.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<Reply>>>,
    delays: Mutex<HashMap<(&'static str, String), Duration>>,
    calls: Mutex<Vec<RemoteRequest>>,
    issued: AtomicUsize,
    issue_tokens: bool,
    token_delay: Option<Duration>,
    token_ttl_secs: i64,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            issue_tokens: true,
            token_ttl_secs: 3600,
            ..Default::default()
        }
    }

    pub fn without_token_endpoint(mut self) -> Self {
        self.issue_tokens = false;
        self
    }

    /// Holds each token acquisition open, so concurrent callers overlap.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub fn with_token_ttl(mut self, secs: i64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    pub fn push(&self, method: HttpMethod, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry((method.as_str(), path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn respond(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
        self.push(
            method,
            path,
            Reply::Respond(RemoteResponse::new(status, body.to_string())),
        );
    }

    pub fn respond_bytes(&self, method: HttpMethod, path: &str, status: u16, body: Vec<u8>) {
        self.push(method, path, Reply::Respond(RemoteResponse::new(status, body)));
    }

    pub fn fail(&self, method: HttpMethod, path: &str, error: TransportError) {
        self.push(method, path, Reply::Fail(error));
    }

    /// Holds every reply on a route open for `delay`.
    pub fn delay(&self, method: HttpMethod, path: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert((method.as_str(), path.to_string()), delay);
    }

    /// Drops whatever is still scripted for a route.
    pub fn reset(&self, method: HttpMethod, path: &str) {
        self.routes
            .lock()
            .unwrap()
            .remove(&(method.as_str(), path.to_string()));
    }

    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: HttpMethod, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    pub fn token_requests(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &RemoteRequest) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&(request.method.as_str(), request.path.clone()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&(request.method.as_str(), request.path.clone()))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = self.next_reply(request) {
            return match reply {
                Reply::Respond(response) => Ok(response),
                Reply::Fail(error) => Err(error),
            };
        }

        if self.issue_tokens && request.method == HttpMethod::Post && request.path == TOKEN_PATH {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.token_delay {
                tokio::time::sleep(delay).await;
            }
            let body = json!({
                "access_token": format!("token-{n}"),
                "token_type": "bearer",
                "expires_in": self.token_ttl_secs,
                "scope": "order:all payment:all",
                "jti": format!("jti-{n}"),
            });
            return Ok(RemoteResponse::new(200, body.to_string()));
        }

        Ok(RemoteResponse::new(
            404,
            json!({ "errors": [{ "code": "v2_entity_not_found", "message": request.path }] })
                .to_string(),
        ))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub fn arc_clock() -> Arc<MutableClock> {
    Arc::new(MutableClock::new(fixed_now()))
}

/// Minimal remote delivery point record.
pub fn remote_point(code: &str, lat: f64, lon: f64) -> Value {
    json!({
        "uuid": format!("uuid-{code}"),
        "code": code,
        "type": "PVZ",
        "owner_code": "cdek",
        "is_handout": true,
        "have_cashless": "true",
        "location": {
            "country_code": "RU",
            "region_code": 81,
            "city_code": 44,
            "city": "Москва",
            "postal_code": "101000",
            "latitude": lat,
            "longitude": lon,
            "address": format!("ул. Тестовая, {code}"),
            "address_full": format!("Россия, Москва, ул. Тестовая, {code}"),
        },
        "phones": [{ "number": "+74950000000" }],
        "work_time_list": [{ "day": 1, "time": "09:00/21:00" }],
    })
}
