//! # Print Job State Machine
//!
//! Submits receipt (waybill) and barcode print requests, waits for the
//! platform to render them, and keeps the resulting PDFs on disk keyed by a
//! fingerprint of the request.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate refs ─► fingerprint ─► cached READY job with file? ─► return  │
//! │                                          │ no (or refresh)              │
//! │                                          ▼                              │
//! │  POST /v2/print/{orders|barcodes} ─► entity.uuid ─► row SUBMITTED       │
//! │                                          │                              │
//! │           ┌──────── poll GET /v2/print/{kind}/{uuid} ◄───────┐          │
//! │           │  (no wait before the first check)                │          │
//! │           ▼                                                  │          │
//! │   READY ──► download {uuid}.pdf ─► store ─► row READY        │          │
//! │   INVALID | REMOVED ──► row terminal ─► PrintRejected        │          │
//! │   ACCEPTED | PROCESSING | unknown ──► wait interval ─────────┘          │
//! │                                                                         │
//! │   attempts or ceiling exhausted while polling ─► TIMED_OUT              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed PDF download still yields a READY job carrying only the URL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_core::fingerprint::print_fingerprint;
use courier_core::mapping::read_print_status;
use courier_core::payload::text;
use courier_core::validation::validate_print_refs;
use courier_core::{PrintJob, PrintKind, PrintOrderRef, PrintStatus};
use courier_db::{PrintJobRepository, StoredArtifact};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::RemoteClient;
use crate::config::PrintSettings;
use crate::error::{CourierError, CourierResult};
use crate::runtime::Sleeper;

// =============================================================================
// Request / Result
// =============================================================================

/// One print request.
///
/// Unset options fall back to the platform's usual defaults: two receipt
/// copies on the `tpl_russia` template, one A4 barcode copy in Russian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintRequest {
    pub kind: PrintKind,
    pub orders: Vec<PrintOrderRef>,
    pub copy_count: Option<u32>,
    /// Receipt template.
    pub template: Option<String>,
    /// Barcode page format.
    pub format: Option<String>,
    /// Barcode language.
    pub lang: Option<String>,
    /// Ignore a cached artifact and render again.
    #[serde(default)]
    pub refresh: bool,
}

impl PrintRequest {
    pub fn receipt(orders: Vec<PrintOrderRef>) -> Self {
        Self::new(PrintKind::Receipt, orders)
    }

    pub fn barcode(orders: Vec<PrintOrderRef>) -> Self {
        Self::new(PrintKind::Barcode, orders)
    }

    fn new(kind: PrintKind, orders: Vec<PrintOrderRef>) -> Self {
        PrintRequest {
            kind,
            orders,
            copy_count: None,
            template: None,
            format: None,
            lang: None,
            refresh: false,
        }
    }

    /// Submission body, with defaults applied.
    pub fn params(&self) -> Value {
        match self.kind {
            PrintKind::Receipt => json!({
                "orders": self.orders,
                "copy_count": self.copy_count.unwrap_or(2),
                "type": non_blank(&self.template).unwrap_or("tpl_russia"),
            }),
            PrintKind::Barcode => json!({
                "orders": self.orders,
                "copy_count": self.copy_count.unwrap_or(1),
                "format": non_blank(&self.format).unwrap_or("A4"),
                "lang": non_blank(&self.lang).unwrap_or("RUS"),
            }),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// What a print request produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintArtifact {
    pub job: PrintJob,
    pub status: PrintStatus,
    pub url: Option<String>,
    /// PDF content, when it was downloaded or read back from disk.
    pub bytes: Option<Vec<u8>>,
    /// Served from the local cache without remote calls.
    pub cached: bool,
}

// =============================================================================
// Service
// =============================================================================

pub struct PrintService {
    client: Arc<RemoteClient>,
    repo: PrintJobRepository,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    settings: PrintSettings,
    storage_dir: PathBuf,
}

impl PrintService {
    pub fn new(
        client: Arc<RemoteClient>,
        repo: PrintJobRepository,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        settings: PrintSettings,
        storage_dir: PathBuf,
    ) -> Self {
        PrintService {
            client,
            repo,
            clock,
            sleeper,
            settings,
            storage_dir,
        }
    }

    /// Renders `request` and waits for the result.
    ///
    /// ## Errors
    /// - `InvalidRequest` before any I/O for bad order references
    /// - `PrintRejected` when the platform reports INVALID or REMOVED
    /// - `PollTimeout` when the job is not ready in time
    pub async fn submit_and_await(&self, request: &PrintRequest) -> CourierResult<PrintArtifact> {
        validate_print_refs(&request.orders)?;

        let params = request.params();
        let fingerprint = print_fingerprint(request.kind, &params);

        if !request.refresh {
            if let Some(artifact) = self.cached(&fingerprint).await? {
                return Ok(artifact);
            }
        }

        let segment = request.kind.path_segment();
        let response = self
            .client
            .post_json(&format!("/v2/print/{segment}"), params)
            .await?;
        let uuid = response
            .get("entity")
            .and_then(|e| text(e.get("uuid")))
            .ok_or_else(|| {
                CourierError::MalformedResponse("print response carried no entity uuid".to_string())
            })?;

        let job = self
            .repo
            .upsert_submitted(&uuid, &fingerprint, request.kind, self.clock.utc())
            .await?;
        info!(job_id = job.id, %uuid, kind = request.kind.as_str(), "Print job submitted");

        // The ceiling bounds status checks only; a READY job is always finished.
        let status_path = status_path(&job);
        let mut attempts = 0;
        let polled = tokio::time::timeout(
            self.settings.ceiling(),
            self.poll(&job, &status_path, &mut attempts),
        )
        .await;

        match polled {
            Ok(Ok(Some(url))) => self.finish(&job, &status_path, url).await,
            Ok(Err(e)) => Err(e),
            Ok(Ok(None)) | Err(_) => {
                warn!(job_id = job.id, %uuid, attempts, "Print job not ready in time");
                self.repo
                    .update_status(job.id, PrintStatus::TimedOut, self.clock.utc())
                    .await?;
                Err(CourierError::PollTimeout { uuid, attempts })
            }
        }
    }

    /// A READY job for `fingerprint` whose file is still on disk.
    async fn cached(&self, fingerprint: &str) -> CourierResult<Option<PrintArtifact>> {
        let Some(job) = self.repo.find_by_fingerprint(fingerprint).await? else {
            return Ok(None);
        };
        if job.status != PrintStatus::Ready {
            return Ok(None);
        }
        let Some(path) = job.file_path.as_deref() else {
            return Ok(None);
        };

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                debug!(job_id = job.id, path, "Serving cached print artifact");
                Ok(Some(PrintArtifact {
                    status: job.status,
                    url: job.download_url.clone(),
                    bytes: Some(bytes),
                    cached: true,
                    job,
                }))
            }
            Err(e) => {
                debug!(job_id = job.id, path, error = %e, "Cached print file unavailable");
                Ok(None)
            }
        }
    }

    /// Polls until a terminal state.
    ///
    /// Yields the download URL once READY, `None` when attempts run out.
    async fn poll(
        &self,
        job: &PrintJob,
        status_path: &str,
        attempts: &mut u32,
    ) -> CourierResult<Option<String>> {
        let mut last = job.status;

        for attempt in 1..=self.settings.max_attempts {
            *attempts = attempt;
            if attempt > 1 {
                self.sleeper.sleep(self.settings.poll_interval()).await;
            }

            let info = match self.client.get_json(status_path, Vec::new()).await {
                Ok(info) => info,
                Err(e) if e.is_upstream_unavailable() => {
                    warn!(uuid = %job.uuid, attempt, error = %e, "Print status check failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let code = read_print_status(&info);
            let status = code.as_deref().and_then(PrintStatus::from_remote);
            debug!(uuid = %job.uuid, attempt, code = ?code, "Print job status");

            match status {
                Some(PrintStatus::Ready) => {
                    let url = info
                        .get("entity")
                        .and_then(|e| text(e.get("url")))
                        .unwrap_or_else(|| format!("{status_path}.pdf"));
                    return Ok(Some(url));
                }
                Some(status @ (PrintStatus::Invalid | PrintStatus::Removed)) => {
                    self.repo.update_status(job.id, status, self.clock.utc()).await?;
                    warn!(uuid = %job.uuid, %status, "Print job rejected");
                    return Err(CourierError::PrintRejected {
                        uuid: job.uuid.clone(),
                        status,
                    });
                }
                Some(status) if status != last => {
                    self.repo.update_status(job.id, status, self.clock.utc()).await?;
                    last = status;
                }
                _ => {}
            }
        }

        Ok(None)
    }

    /// Downloads the PDF and records the READY job.
    async fn finish(
        &self,
        job: &PrintJob,
        status_path: &str,
        url: String,
    ) -> CourierResult<PrintArtifact> {
        let stored = match self.client.get_bytes(&format!("{status_path}.pdf")).await {
            Ok(bytes) => match self.store(job, &bytes).await {
                Ok(artifact) => Some((artifact, bytes)),
                Err(e) => {
                    warn!(uuid = %job.uuid, error = %e, "Failed to store print file");
                    None
                }
            },
            Err(e) => {
                warn!(
                    uuid = %job.uuid,
                    error = %e,
                    "Print file download failed; returning URL only"
                );
                None
            }
        };

        let (artifact, bytes) = match stored {
            Some((artifact, bytes)) => (Some(artifact), Some(bytes)),
            None => (None, None),
        };

        let job = self
            .repo
            .mark_ready(job.id, &url, artifact.as_ref(), self.clock.utc())
            .await?;
        info!(job_id = job.id, uuid = %job.uuid, stored = artifact.is_some(), "Print job ready");

        Ok(PrintArtifact {
            status: PrintStatus::Ready,
            url: Some(url),
            bytes,
            cached: false,
            job,
        })
    }

    async fn store(&self, job: &PrintJob, bytes: &[u8]) -> CourierResult<StoredArtifact> {
        tokio::fs::create_dir_all(&self.storage_dir).await?;

        let file_name = format!("{}-{}.pdf", job.kind.as_str(), job.uuid);
        let path = self.storage_dir.join(&file_name);
        tokio::fs::write(&path, bytes).await?;

        Ok(StoredArtifact {
            file_path: path_text(&path),
            file_name,
            file_size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        })
    }
}

fn status_path(job: &PrintJob) -> String {
    format!("/v2/print/{}/{}", job.kind.path_segment(), job.uuid)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BackgroundTasks;
    use crate::test_support::{arc_clock, memory_db, FakeTransport, RecordingSleeper};
    use crate::token::{ClientCredentials, TokenManager};
    use crate::transport::HttpMethod;
    use courier_db::Database;
    use std::time::Duration;
    use tempfile::TempDir;

    const JOB: &str = "5f8e2c1a-0000-4000-8000-0000000000aa";

    struct Fixture {
        db: Database,
        transport: Arc<FakeTransport>,
        sleeper: Arc<RecordingSleeper>,
        dir: TempDir,
        service: PrintService,
    }

    async fn fixture(max_attempts: u32) -> Fixture {
        fixture_with(PrintSettings {
            max_attempts,
            ..PrintSettings::default()
        })
        .await
    }

    async fn fixture_with(settings: PrintSettings) -> Fixture {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        let clock = arc_clock();
        let sleeper = Arc::new(RecordingSleeper::default());
        let dir = TempDir::new().unwrap();
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
            BackgroundTasks::new(),
            clock.clone(),
        ));
        let service = PrintService::new(
            client,
            db.print_jobs(),
            clock,
            sleeper.clone(),
            settings,
            dir.path().join("prints"),
        );
        Fixture {
            db,
            transport,
            sleeper,
            dir,
            service,
        }
    }

    fn status(codes: &[&str]) -> Value {
        let statuses: Vec<Value> = codes.iter().map(|c| json!({ "code": c })).collect();
        json!({ "entity": { "uuid": JOB, "statuses": statuses } })
    }

    fn script_submission(transport: &FakeTransport, segment: &str) {
        transport.respond(
            HttpMethod::Post,
            &format!("/v2/print/{segment}"),
            202,
            json!({ "entity": { "uuid": JOB } }),
        );
    }

    fn request() -> PrintRequest {
        PrintRequest::receipt(vec![PrintOrderRef::by_number("1106394409")])
    }

    #[test]
    fn test_params_apply_defaults() {
        let receipt = request().params();
        assert_eq!(receipt["copy_count"], 2);
        assert_eq!(receipt["type"], "tpl_russia");
        assert_eq!(receipt["orders"][0], json!({ "cdek_number": "1106394409" }));

        let mut barcode = PrintRequest::barcode(vec![PrintOrderRef::by_uuid(JOB)]);
        barcode.format = Some("A6".into());
        let params = barcode.params();
        assert_eq!(params["copy_count"], 1);
        assert_eq!(params["format"], "A6");
        assert_eq!(params["lang"], "RUS");
    }

    #[tokio::test]
    async fn test_ready_job_is_downloaded_and_stored() {
        let f = fixture(30).await;
        let status_path = format!("/v2/print/orders/{JOB}");
        script_submission(&f.transport, "orders");
        f.transport.respond(HttpMethod::Get, &status_path, 200, status(&["ACCEPTED"]));
        f.transport
            .respond(HttpMethod::Get, &status_path, 200, status(&["ACCEPTED", "PROCESSING"]));
        f.transport.respond(
            HttpMethod::Get,
            &status_path,
            200,
            status(&["ACCEPTED", "PROCESSING", "READY"]),
        );
        f.transport.respond_bytes(
            HttpMethod::Get,
            &format!("{status_path}.pdf"),
            200,
            b"%PDF-1.4 waybill".to_vec(),
        );

        let artifact = f.service.submit_and_await(&request()).await.unwrap();

        assert_eq!(artifact.status, PrintStatus::Ready);
        assert!(!artifact.cached);
        assert_eq!(artifact.bytes.as_deref(), Some(&b"%PDF-1.4 waybill"[..]));
        assert_eq!(f.transport.calls_to(HttpMethod::Get, &status_path), 3);
        // No wait before the first check.
        assert_eq!(f.sleeper.recorded(), vec![Duration::from_secs(2); 2]);

        let path = artifact.job.file_path.clone().unwrap();
        assert!(path.starts_with(&*f.dir.path().to_string_lossy()));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 waybill");
        assert_eq!(artifact.job.file_size, Some(16));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_remote_calls() {
        let f = fixture(30).await;
        let status_path = format!("/v2/print/orders/{JOB}");
        script_submission(&f.transport, "orders");
        f.transport.respond(HttpMethod::Get, &status_path, 200, status(&["READY"]));
        f.transport
            .respond_bytes(HttpMethod::Get, &format!("{status_path}.pdf"), 200, b"%PDF".to_vec());

        f.service.submit_and_await(&request()).await.unwrap();
        let calls_before = f.transport.calls().len();

        let again = f.service.submit_and_await(&request()).await.unwrap();

        assert!(again.cached);
        assert_eq!(again.bytes.as_deref(), Some(&b"%PDF"[..]));
        assert_eq!(f.transport.calls().len(), calls_before);

        let mut refresh = request();
        refresh.refresh = true;
        let fresh = f.service.submit_and_await(&refresh).await.unwrap();
        assert!(!fresh.cached);
        assert!(f.transport.calls().len() > calls_before);
    }

    #[tokio::test]
    async fn test_missing_file_invalidates_cache() {
        let f = fixture(30).await;
        let status_path = format!("/v2/print/orders/{JOB}");
        script_submission(&f.transport, "orders");
        f.transport.respond(HttpMethod::Get, &status_path, 200, status(&["READY"]));
        f.transport
            .respond_bytes(HttpMethod::Get, &format!("{status_path}.pdf"), 200, b"%PDF".to_vec());

        let first = f.service.submit_and_await(&request()).await.unwrap();
        std::fs::remove_file(first.job.file_path.unwrap()).unwrap();

        let second = f.service.submit_and_await(&request()).await.unwrap();
        assert!(!second.cached);
        assert_eq!(f.transport.calls_to(HttpMethod::Post, "/v2/print/orders"), 2);
    }

    #[tokio::test]
    async fn test_failed_download_returns_url_only() {
        let f = fixture(30).await;
        let status_path = format!("/v2/print/barcodes/{JOB}");
        script_submission(&f.transport, "barcodes");
        f.transport.respond(
            HttpMethod::Get,
            &status_path,
            200,
            json!({ "entity": { "uuid": JOB, "url": "https://files.example/b.pdf", "statuses": [{ "code": "READY" }] } }),
        );
        f.transport
            .respond(HttpMethod::Get, &format!("{status_path}.pdf"), 500, json!({}));

        let artifact = f
            .service
            .submit_and_await(&PrintRequest::barcode(vec![PrintOrderRef::by_uuid("order-1")]))
            .await
            .unwrap();

        assert_eq!(artifact.status, PrintStatus::Ready);
        assert_eq!(artifact.url.as_deref(), Some("https://files.example/b.pdf"));
        assert!(artifact.bytes.is_none());
        assert!(artifact.job.file_path.is_none());
    }

    #[tokio::test]
    async fn test_invalid_is_terminal() {
        let f = fixture(30).await;
        let status_path = format!("/v2/print/orders/{JOB}");
        script_submission(&f.transport, "orders");
        f.transport
            .respond(HttpMethod::Get, &status_path, 200, status(&["ACCEPTED", "INVALID"]));

        let err = f.service.submit_and_await(&request()).await.unwrap_err();

        assert!(matches!(
            err,
            CourierError::PrintRejected { status: PrintStatus::Invalid, .. }
        ));
        assert!(err.is_terminal());
        assert_eq!(f.transport.calls_to(HttpMethod::Get, &status_path), 1);

        let fingerprint = print_fingerprint(PrintKind::Receipt, &request().params());
        let job = f.db.print_jobs().find_by_fingerprint(&fingerprint).await.unwrap().unwrap();
        assert_eq!(job.status, PrintStatus::Invalid);
    }

    #[tokio::test]
    async fn test_attempts_exhaust_into_timeout() {
        let f = fixture(3).await;
        let status_path = format!("/v2/print/orders/{JOB}");
        script_submission(&f.transport, "orders");
        f.transport
            .respond(HttpMethod::Get, &status_path, 200, status(&["ACCEPTED", "PROCESSING"]));

        let err = f.service.submit_and_await(&request()).await.unwrap_err();

        match &err {
            CourierError::PollTimeout { uuid, attempts } => {
                assert_eq!(uuid, JOB);
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(f.transport.calls_to(HttpMethod::Get, &status_path), 3);
        assert_eq!(f.sleeper.recorded().len(), 2);

        let fingerprint = print_fingerprint(PrintKind::Receipt, &request().params());
        let job = f.db.print_jobs().find_by_fingerprint(&fingerprint).await.unwrap().unwrap();
        assert_eq!(job.status, PrintStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_slow_download_after_ready_is_not_a_timeout() {
        let f = fixture_with(PrintSettings {
            ceiling_secs: 1,
            ..PrintSettings::default()
        })
        .await;
        let status_path = format!("/v2/print/orders/{JOB}");
        let pdf_path = format!("{status_path}.pdf");
        script_submission(&f.transport, "orders");
        f.transport.respond(HttpMethod::Get, &status_path, 200, status(&["READY"]));
        f.transport
            .respond_bytes(HttpMethod::Get, &pdf_path, 200, b"%PDF slow".to_vec());
        f.transport
            .delay(HttpMethod::Get, &pdf_path, Duration::from_millis(1500));

        let artifact = f.service.submit_and_await(&request()).await.unwrap();

        assert_eq!(artifact.status, PrintStatus::Ready);
        assert_eq!(artifact.bytes.as_deref(), Some(&b"%PDF slow"[..]));
        assert_eq!(f.transport.calls_to(HttpMethod::Get, &pdf_path), 1);

        let fingerprint = print_fingerprint(PrintKind::Receipt, &request().params());
        let job = f.db.print_jobs().find_by_fingerprint(&fingerprint).await.unwrap().unwrap();
        assert_eq!(job.status, PrintStatus::Ready);
        assert!(job.file_path.is_some());
    }

    #[tokio::test]
    async fn test_bad_refs_fail_before_io() {
        let f = fixture(30).await;
        let refs = (0..101).map(|i| PrintOrderRef::by_number(i.to_string())).collect();

        assert!(matches!(
            f.service.submit_and_await(&PrintRequest::receipt(refs)).await,
            Err(CourierError::InvalidRequest(_))
        ));
        assert!(matches!(
            f.service
                .submit_and_await(&PrintRequest::receipt(vec![PrintOrderRef::default()]))
                .await,
            Err(CourierError::InvalidRequest(_))
        ));
        assert!(f.transport.calls().is_empty());
    }
}
