//! # Credential Repository
//!
//! Storage for the bearer credential issued by the courier platform.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  startup / renewal                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  latest_valid(cutoff) ── Some ──► adopt stored credential              │
//! │       │                                                                 │
//! │      None                                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  POST /v2/oauth/token ──► replace(credential)                          │
//! │                             DELETE all + INSERT (one transaction)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use courier_core::Credential;

const CREDENTIAL_COLUMNS: &str =
    "access_token, token_type, expires_in, scope, jti, expires_at, created_at";

/// Repository for the stored bearer credential.
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    pool: SqlitePool,
}

impl CredentialRepository {
    /// Creates a new CredentialRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CredentialRepository { pool }
    }

    /// Returns the stored credential that stays valid past `cutoff`.
    ///
    /// Callers pass `now + renewal margin` so a credential about to expire
    /// is never adopted.
    pub async fn latest_valid(&self, cutoff: DateTime<Utc>) -> DbResult<Option<Credential>> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM remote_credentials \
             WHERE expires_at > ?1 ORDER BY expires_at DESC LIMIT 1"
        );

        let credential = sqlx::query_as::<_, Credential>(&sql)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;

        debug!(found = credential.is_some(), "Looked up stored credential");
        Ok(credential)
    }

    /// Replaces whatever is stored with `credential`.
    ///
    /// The delete and insert share a transaction, so readers see either the
    /// old row or the new one.
    pub async fn replace(&self, credential: &Credential) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM remote_credentials")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO remote_credentials
                (access_token, token_type, expires_in, scope, jti, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&credential.access_token)
        .bind(&credential.token_type)
        .bind(credential.expires_in)
        .bind(&credential.scope)
        .bind(&credential.jti)
        .bind(credential.expires_at)
        .bind(credential.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(expires_at = %credential.expires_at, "Stored credential replaced");
        Ok(())
    }

    /// Removes every stored credential.
    pub async fn delete_all(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM remote_credentials")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of stored rows (at most one after any `replace`).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM remote_credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
