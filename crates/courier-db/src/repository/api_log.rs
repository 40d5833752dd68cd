//! # API Log Repository
//!
//! Append-only audit log of outbound calls to the courier platform.
//! One row per attempt; a replay after a 401 produces a second row.

use sqlx::SqlitePool;

use crate::error::DbResult;
use courier_core::ApiLogEntry;

/// Repository for the outbound call audit log.
#[derive(Debug, Clone)]
pub struct ApiLogRepository {
    pool: SqlitePool,
}

impl ApiLogRepository {
    /// Creates a new ApiLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ApiLogRepository { pool }
    }

    /// Appends one entry.
    pub async fn insert(&self, entry: &ApiLogEntry) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO api_logs
                (method, endpoint, request_data, response_data, status_code,
                 duration_ms, success, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.method)
        .bind(&entry.endpoint)
        .bind(&entry.request_data)
        .bind(&entry.response_data)
        .bind(entry.status_code)
        .bind(entry.duration_ms)
        .bind(entry.success)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<ApiLogEntry>> {
        let entries = sqlx::query_as::<_, ApiLogEntry>(
            r#"
            SELECT method, endpoint, request_data, response_data, status_code,
                   duration_ms, success, created_at
            FROM api_logs
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_and_recent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.api_logs();

        for status in [401_i64, 200] {
            repo.insert(&ApiLogEntry {
                method: "GET".to_string(),
                endpoint: "/v2/deliverypoints".to_string(),
                request_data: None,
                response_data: Some("[]".to_string()),
                status_code: Some(status),
                duration_ms: 12,
                success: status == 200,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.count().await.unwrap(), 2);
        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent[0].status_code, Some(200));
        assert!(recent[0].success);
        assert!(!recent[1].success);
    }
}
