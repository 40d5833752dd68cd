//! # Print Job Repository
//!
//! Fingerprint-keyed cache of generated print documents.
//!
//! ## Row Lifecycle
//! ```text
//!  upsert_submitted ──► SUBMITTED ──► update_status(ACCEPTED | PROCESSING)*
//!                                         │
//!                         ┌───────────────┼───────────────────────┐
//!                         ▼               ▼                       ▼
//!                   mark_ready       update_status           update_status
//!                   (READY + file)   (INVALID | REMOVED)     (TIMED_OUT)
//! ```
//! Resubmitting the same fingerprint resets the row to `SUBMITTED`.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use courier_core::{PrintJob, PrintKind, PrintStatus};

const JOB_COLUMNS: &str = "id, uuid, fingerprint, kind, status, download_url, file_path, \
                           file_name, file_size, created_at, updated_at";

/// A stored artifact produced by a READY job.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
}

/// Repository for the print job cache.
#[derive(Debug, Clone)]
pub struct PrintJobRepository {
    pool: SqlitePool,
}

impl PrintJobRepository {
    /// Creates a new PrintJobRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PrintJobRepository { pool }
    }

    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> DbResult<Option<PrintJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM print_jobs WHERE fingerprint = ?1");
        let job = sqlx::query_as::<_, PrintJob>(&sql)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Records a fresh submission, replacing any earlier job with the same
    /// fingerprint.
    pub async fn upsert_submitted(
        &self,
        uuid: &str,
        fingerprint: &str,
        kind: PrintKind,
        now: DateTime<Utc>,
    ) -> DbResult<PrintJob> {
        let sql = format!(
            r#"
            INSERT INTO print_jobs (uuid, fingerprint, kind, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(fingerprint) DO UPDATE SET
                uuid = excluded.uuid,
                kind = excluded.kind,
                status = excluded.status,
                download_url = NULL,
                file_path = NULL,
                file_name = NULL,
                file_size = NULL,
                updated_at = excluded.updated_at
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, PrintJob>(&sql)
            .bind(uuid)
            .bind(fingerprint)
            .bind(kind)
            .bind(PrintStatus::Submitted)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        debug!(job_id = job.id, uuid, "Print job submitted");
        Ok(job)
    }

    /// Moves a job to `status`.
    pub async fn update_status(
        &self,
        id: i64,
        status: PrintStatus,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE print_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PrintJob", id.to_string()));
        }
        Ok(())
    }

    /// Marks a job READY, with its download URL and, when the download
    /// succeeded, the stored file.
    pub async fn mark_ready(
        &self,
        id: i64,
        download_url: &str,
        artifact: Option<&StoredArtifact>,
        now: DateTime<Utc>,
    ) -> DbResult<PrintJob> {
        let sql = format!(
            r#"
            UPDATE print_jobs
            SET status = ?2, download_url = ?3, file_path = ?4, file_name = ?5,
                file_size = ?6, updated_at = ?7
            WHERE id = ?1
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, PrintJob>(&sql)
            .bind(id)
            .bind(PrintStatus::Ready)
            .bind(download_url)
            .bind(artifact.map(|a| a.file_path.as_str()))
            .bind(artifact.map(|a| a.file_name.as_str()))
            .bind(artifact.map(|a| a.file_size))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("PrintJob", id.to_string()))?;

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_job_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.print_jobs();
        let now = Utc::now();

        let job = repo
            .upsert_submitted("job-1", "fp-1", PrintKind::Receipt, now)
            .await
            .unwrap();
        assert_eq!(job.status, PrintStatus::Submitted);

        repo.update_status(job.id, PrintStatus::Processing, now).await.unwrap();

        let artifact = StoredArtifact {
            file_path: "/tmp/job-1.pdf".to_string(),
            file_name: "job-1.pdf".to_string(),
            file_size: 1024,
        };
        let ready = repo
            .mark_ready(job.id, "https://api/print/orders/job-1.pdf", Some(&artifact), now)
            .await
            .unwrap();
        assert_eq!(ready.status, PrintStatus::Ready);
        assert_eq!(ready.file_size, Some(1024));

        let cached = repo.find_by_fingerprint("fp-1").await.unwrap().unwrap();
        assert_eq!(cached.file_name.as_deref(), Some("job-1.pdf"));
        assert_eq!(cached.kind, PrintKind::Receipt);
    }

    #[tokio::test]
    async fn test_resubmission_resets_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.print_jobs();
        let now = Utc::now();

        let first = repo
            .upsert_submitted("job-1", "fp-1", PrintKind::Barcode, now)
            .await
            .unwrap();
        repo.mark_ready(first.id, "https://api/x.pdf", None, now).await.unwrap();

        let second = repo
            .upsert_submitted("job-2", "fp-1", PrintKind::Barcode, now)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.uuid, "job-2");
        assert_eq!(second.status, PrintStatus::Submitted);
        assert_eq!(second.download_url, None);

        assert!(repo.update_status(999, PrintStatus::Invalid, now).await.is_err());
    }
}
