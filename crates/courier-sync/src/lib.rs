//! # courier-sync: Courier Platform Integration Engine
//!
//! Owns every conversation with the courier platform: credentials, outbound
//! calls, directory ingestion, order registration, and print jobs.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            CourierEngine                                │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  TokenManager  │◄─│  RemoteClient  │─►│  HttpTransport         │    │
//! │  │                │  │                │  │  (reqwest)             │    │
//! │  │ 5 min margin   │  │ bearer, one    │  │                        │    │
//! │  │ single renewal │  │ 401 replay,    │  │ base URL, timeout,     │    │
//! │  │                │  │ audit rows     │  │ User-Agent             │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │     ┌──────────────┬─────────┴──────┬───────────────┐                   │
//! │     ▼              ▼                ▼               ▼                   │
//! │  Directory   DeliveryPointSync  OrderPipeline   PrintService            │
//! │  lookups     replace / upsert   register +      submit, poll,           │
//! │              into the mirror    reconcile       download                │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │              GeoQueryEngine (R*Tree or Haversine)                      │
//! │                                                                         │
//! │  BackgroundTasks: audit writes, detached syncs, reconciliation loops   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Layered configuration (defaults, TOML, `COURIER_*` env)
//! - [`error`] - Engine error taxonomy
//! - [`transport`] - HTTP transport trait and reqwest implementation
//! - [`token`] - Credential lifecycle
//! - [`client`] - Authorized, audited outbound calls
//! - [`directory`] - Tariffs, locations, single-order lookups
//! - [`delivery_points`] - Directory sync into the local mirror
//! - [`geo`] - Radius and filtered listings over the mirror
//! - [`orders`] - Order registration and tracking number reconciliation
//! - [`print`] - Print job submission and polling
//! - [`runtime`] - Background tasks and injectable sleeping
//! - [`engine`] - Wiring

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod delivery_points;
pub mod directory;
pub mod engine;
pub mod error;
pub mod geo;
pub mod orders;
pub mod print;
pub mod runtime;
pub mod token;
pub mod transport;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::RemoteClient;
pub use config::{CourierConfig, GeoBackend, SyncMode};
pub use delivery_points::{DeliveryPointFilter, DeliveryPointSync, SyncReport};
pub use directory::{Directory, TariffListRequest, TariffListResponse};
pub use engine::CourierEngine;
pub use error::{CourierError, CourierResult};
pub use geo::GeoQueryEngine;
pub use orders::{OrderPipeline, RegisteredOrder};
pub use print::{PrintArtifact, PrintRequest, PrintService};
pub use runtime::{BackgroundTasks, Sleeper, TokioSleeper};
pub use token::TokenManager;
pub use transport::{HttpTransport, ReqwestTransport};
