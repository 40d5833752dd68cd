//! # Engine Configuration
//!
//! Configuration management for the courier integration engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     COURIER_CLIENT_ID=...  COURIER_SYNC_MODE=replace                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/courier-bridge/courier.toml (Linux)                      │
//! │     ~/Library/Application Support/com.courier.bridge/courier.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Production base URL, upsert sync, spatial index backend            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [remote]
//! base_url = "https://api.edu.cdek.ru"
//! client_id = "your-client-id"
//! client_secret = "your-client-secret"
//! timeout_secs = 30
//!
//! [sync]
//! mode = "upsert"      # upsert | replace
//! page_size = 1000
//! batch_size = 100
//! max_records = 200000
//!
//! [reconcile]
//! delays_ms = [5000, 10000, 20000, 30000]
//!
//! [print]
//! poll_interval_ms = 2000
//! max_attempts = 30
//!
//! [geo]
//! backend = "spatial_index"  # spatial_index | haversine
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CourierError, CourierResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// How a directory sync treats the existing mirror.
///
/// ## Mode Selection
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  UPSERT (Default)                                                      │
/// │  ────────────────                                                      │
/// │  • Points keep their local row id across runs                          │
/// │  • Children of each received point are replaced                        │
/// │  • Points absent from the run are soft-deleted and counted             │
/// │                                                                         │
/// │  REPLACE                                                               │
/// │  ───────                                                               │
/// │  • Mirror and children cleared up front in one transaction             │
/// │  • Bulk inserts, highest throughput                                    │
/// │  • Removals are implicit (reported as 0)                               │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Clear the mirror, then insert every page.
    Replace,

    /// Upsert by uuid, then soft-delete points not seen in this run.
    #[default]
    Upsert,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Replace => write!(f, "replace"),
            SyncMode::Upsert => write!(f, "upsert"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" | "clear" | "full" => Ok(SyncMode::Replace),
            "upsert" | "preserve" | "mark" => Ok(SyncMode::Upsert),
            other => Err(CourierError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: replace, upsert",
                other
            ))),
        }
    }
}

// =============================================================================
// Geo Backend
// =============================================================================

/// Which radius query implementation the geo engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoBackend {
    /// R*Tree candidate lookup, exact great-circle distance.
    #[default]
    SpatialIndex,

    /// Plain range scan on latitude/longitude, Haversine distance.
    Haversine,
}

impl std::fmt::Display for GeoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoBackend::SpatialIndex => write!(f, "spatial_index"),
            GeoBackend::Haversine => write!(f, "haversine"),
        }
    }
}

impl std::str::FromStr for GeoBackend {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spatial_index" | "spatial-index" | "rtree" | "index" => Ok(GeoBackend::SpatialIndex),
            "haversine" | "portable" => Ok(GeoBackend::Haversine),
            other => Err(CourierError::InvalidConfig(format!(
                "Unknown geo backend: '{}'. Valid options: spatial_index, haversine",
                other
            ))),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Courier platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// API base URL (production or the educational sandbox).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth client identifier.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Per-call timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every call.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://api.cdek.ru".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("courier-bridge/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: default_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl RemoteSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns true if both halves of the client credentials are set.
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; defaults to `courier.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Delivery point sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Default mode when the caller does not pick one.
    #[serde(default)]
    pub mode: SyncMode,

    /// Records requested per remote page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Records written per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on records stored per run.
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Pause between pages (milliseconds).
    #[serde(default = "default_page_pause")]
    pub page_pause_ms: u64,

    /// First retry delay for an unavailable page (milliseconds).
    #[serde(default = "default_retry_initial")]
    pub retry_initial_ms: u64,

    /// Give up retrying a page after this long (seconds).
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_secs: u64,
}

fn default_page_size() -> u32 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_max_records() -> usize {
    200_000
}

fn default_page_pause() -> u64 {
    150
}

fn default_retry_initial() -> u64 {
    500
}

fn default_retry_max_elapsed() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            max_records: default_max_records(),
            page_pause_ms: default_page_pause(),
            retry_initial_ms: default_retry_initial(),
            retry_max_elapsed_secs: default_retry_max_elapsed(),
        }
    }
}

impl SyncSettings {
    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

/// Tracking number reconciliation schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Delay before each attempt (milliseconds); one attempt per entry.
    #[serde(default = "default_reconcile_delays")]
    pub delays_ms: Vec<u64>,
}

fn default_reconcile_delays() -> Vec<u64> {
    vec![5_000, 10_000, 20_000, 30_000]
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            delays_ms: default_reconcile_delays(),
        }
    }
}

impl ReconcileSettings {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays_ms.iter().copied().map(Duration::from_millis).collect()
    }
}

// =============================================================================
// Print Settings
// =============================================================================

/// Print job polling and artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintSettings {
    /// Interval between status checks (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum status checks per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wall-clock ceiling for one job (seconds).
    #[serde(default = "default_print_ceiling")]
    pub ceiling_secs: u64,

    /// Directory for downloaded PDFs; defaults to `prints/` in the data directory.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    30
}

fn default_print_ceiling() -> u64 {
    120
}

impl Default for PrintSettings {
    fn default() -> Self {
        PrintSettings {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            ceiling_secs: default_print_ceiling(),
            storage_dir: None,
        }
    }
}

impl PrintSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

// =============================================================================
// Geo Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoSettings {
    #[serde(default)]
    pub backend: GeoBackend,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub print: PrintSettings,

    #[serde(default)]
    pub geo: GeoSettings,
}

impl CourierConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (courier.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> CourierResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading courier config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| CourierError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> CourierResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| CourierError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CourierError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| CourierError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Courier config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CourierResult<()> {
        let url = url::Url::parse(&self.remote.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CourierError::InvalidUrl(format!(
                "Base URL must start with http:// or https://, got: {}",
                self.remote.base_url
            )));
        }

        if self.remote.timeout_secs == 0 {
            return Err(CourierError::InvalidConfig(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.page_size == 0 || self.sync.batch_size == 0 {
            return Err(CourierError::InvalidConfig(
                "page_size and batch_size must be greater than 0".into(),
            ));
        }

        if self.print.max_attempts == 0 {
            return Err(CourierError::InvalidConfig(
                "print.max_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("COURIER_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.remote.base_url = url;
        }

        if let Some(id) = lookup("COURIER_CLIENT_ID") {
            self.remote.client_id = id;
        }

        if let Some(secret) = lookup("COURIER_CLIENT_SECRET") {
            self.remote.client_secret = secret;
        }

        if let Some(timeout) = lookup("COURIER_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse::<u64>() {
                self.remote.timeout_secs = t;
            }
        }

        if let Some(path) = lookup("COURIER_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(mode) = lookup("COURIER_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => self.sync.mode = parsed,
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(size) = lookup("COURIER_PAGE_SIZE") {
            if let Ok(s) = size.parse::<u32>() {
                self.sync.page_size = s;
            }
        }

        if let Some(max) = lookup("COURIER_MAX_RECORDS") {
            if let Ok(m) = max.parse::<usize>() {
                self.sync.max_records = m;
            }
        }

        if let Some(backend) = lookup("COURIER_GEO_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.geo.backend = parsed,
                Err(_) => warn!(backend = %backend, "Unknown geo backend in environment"),
            }
        }

        if let Some(dir) = lookup("COURIER_PRINT_DIR") {
            self.print.storage_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("courier.toml"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "courier", "bridge")
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database file, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("courier.db"))
                .unwrap_or_else(|| PathBuf::from("courier.db"))
        })
    }

    /// Print artifact directory, falling back to the platform data directory.
    pub fn print_storage_dir(&self) -> PathBuf {
        self.print.storage_dir.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("prints"))
                .unwrap_or_else(|| PathBuf::from("prints"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("replace".parse::<SyncMode>().unwrap(), SyncMode::Replace);
        assert_eq!("CLEAR".parse::<SyncMode>().unwrap(), SyncMode::Replace);
        assert_eq!("upsert".parse::<SyncMode>().unwrap(), SyncMode::Upsert);
        assert_eq!("preserve".parse::<SyncMode>().unwrap(), SyncMode::Upsert);
        assert!("merge".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_geo_backend_parsing() {
        assert_eq!("rtree".parse::<GeoBackend>().unwrap(), GeoBackend::SpatialIndex);
        assert_eq!("haversine".parse::<GeoBackend>().unwrap(), GeoBackend::Haversine);
        assert!("postgis".parse::<GeoBackend>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = CourierConfig::default();
        assert_eq!(config.sync.mode, SyncMode::Upsert);
        assert_eq!(config.sync.page_size, 1000);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.max_records, 200_000);
        assert_eq!(config.reconcile.delays_ms, vec![5_000, 10_000, 20_000, 30_000]);
        assert_eq!(config.print.max_attempts, 30);
        assert_eq!(config.print.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.geo.backend, GeoBackend::SpatialIndex);
        assert!(!config.remote.has_credentials());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CourierConfig::default();
        assert!(config.validate().is_ok());

        config.remote.base_url = "ftp://api.cdek.ru".to_string();
        assert!(config.validate().is_err());

        config.remote.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.remote.base_url = "https://api.edu.cdek.ru".to_string();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());

        config.sync.batch_size = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COURIER_CLIENT_ID", "id"),
            ("COURIER_CLIENT_SECRET", "secret"),
            ("COURIER_SYNC_MODE", "replace"),
            ("COURIER_GEO_BACKEND", "haversine"),
            ("COURIER_PAGE_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = CourierConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert!(config.remote.has_credentials());
        assert_eq!(config.sync.mode, SyncMode::Replace);
        assert_eq!(config.geo.backend, GeoBackend::Haversine);
        assert_eq!(config.sync.page_size, 1000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: CourierConfig = toml::from_str(
            r#"
            [remote]
            base_url = "https://api.edu.cdek.ru"

            [geo]
            backend = "haversine"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.base_url, "https://api.edu.cdek.ru");
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.geo.backend, GeoBackend::Haversine);
        assert_eq!(config.sync.mode, SyncMode::Upsert);
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");

        let mut config = CourierConfig::default();
        config.sync.mode = SyncMode::Replace;
        config.reconcile.delays_ms = vec![10, 20];
        config.save(Some(path.clone())).unwrap();

        let loaded = CourierConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.sync.mode, SyncMode::Replace);
        assert_eq!(loaded.reconcile.delays_ms, vec![10, 20]);
    }
}
