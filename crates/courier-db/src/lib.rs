//! # courier-db: Database Layer for Courier Bridge
//!
//! Local SQLite storage for everything the engine needs to remember: the
//! current credential, the delivery point mirror, registered orders, print
//! job results, and the outbound call audit log.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  courier-sync (engine components)                                      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  courier-db (this crate) ── repositories over one SqlitePool           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  courier-core (row types with sqlx derives behind the `sqlx` feature)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("courier.db")).await?;
//! let current = db.credentials().latest_valid(cutoff).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::api_log::ApiLogRepository;
pub use repository::credential::CredentialRepository;
pub use repository::delivery_point::DeliveryPointRepository;
pub use repository::order::OrderRepository;
pub use repository::print_job::{PrintJobRepository, StoredArtifact};
