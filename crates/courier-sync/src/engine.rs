//! # Engine Facade
//!
//! Wires every component to one transport, one token manager, one database,
//! and one background executor.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CourierEngine                                                          │
//! │    ├── tokens      Arc<TokenManager>                                    │
//! │    ├── client      Arc<RemoteClient>                                    │
//! │    ├── directory   Directory                                            │
//! │    ├── points      Arc<DeliveryPointSync>                               │
//! │    ├── geo         GeoQueryEngine                                       │
//! │    ├── orders      OrderPipeline                                        │
//! │    ├── print       PrintService                                         │
//! │    └── background  BackgroundTasks (shared by audit, sync, reconcile)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use courier_db::{Database, DbConfig};
use mockable::{Clock, DefaultClock};
use tracing::info;
use url::Url;

use crate::client::RemoteClient;
use crate::config::CourierConfig;
use crate::delivery_points::{DeliveryPointFilter, DeliveryPointSync};
use crate::directory::Directory;
use crate::error::{CourierError, CourierResult};
use crate::geo::GeoQueryEngine;
use crate::orders::OrderPipeline;
use crate::print::PrintService;
use crate::runtime::{BackgroundTasks, Sleeper, TokioSleeper};
use crate::token::{ClientCredentials, TokenManager};
use crate::transport::{HttpTransport, ReqwestTransport};

pub struct CourierEngine {
    config: CourierConfig,
    db: Database,
    background: BackgroundTasks,
    tokens: Arc<TokenManager>,
    client: Arc<RemoteClient>,
    directory: Directory,
    points: Arc<DeliveryPointSync>,
    geo: GeoQueryEngine,
    orders: OrderPipeline,
    print: PrintService,
}

impl CourierEngine {
    /// Builds the engine from already-constructed collaborators.
    pub fn new(
        config: CourierConfig,
        db: Database,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let background = BackgroundTasks::new();

        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&transport),
            db.credentials(),
            Arc::clone(&clock),
            ClientCredentials {
                client_id: config.remote.client_id.clone(),
                client_secret: config.remote.client_secret.clone(),
            },
        ));

        let client = Arc::new(RemoteClient::new(
            transport,
            Arc::clone(&tokens),
            db.api_logs(),
            background.clone(),
            Arc::clone(&clock),
        ));

        let points = Arc::new(DeliveryPointSync::new(
            Arc::clone(&client),
            db.delivery_points(),
            Arc::clone(&clock),
            Arc::clone(&sleeper),
            config.sync.clone(),
        ));

        let orders = OrderPipeline::new(
            Arc::clone(&client),
            db.orders(),
            Arc::clone(&clock),
            Arc::clone(&sleeper),
            background.clone(),
            config.reconcile.delays(),
        );

        let print = PrintService::new(
            Arc::clone(&client),
            db.print_jobs(),
            clock,
            sleeper,
            config.print.clone(),
            config.print_storage_dir(),
        );

        CourierEngine {
            directory: Directory::new(Arc::clone(&client)),
            geo: GeoQueryEngine::new(db.delivery_points(), config.geo.backend),
            config,
            db,
            background,
            tokens,
            client,
            points,
            orders,
            print,
        }
    }

    /// Opens the database and the HTTP transport described by `config`.
    pub async fn connect(config: CourierConfig) -> CourierResult<Self> {
        config.validate()?;
        if !config.remote.has_credentials() {
            return Err(CourierError::InvalidConfig(
                "remote.client_id and remote.client_secret are required".to_string(),
            ));
        }

        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Database::new(
            DbConfig::new(&db_path).max_connections(config.database.max_connections),
        )
        .await?;

        let base_url = Url::parse(&config.remote.base_url)?;
        let transport = ReqwestTransport::new(
            base_url,
            config.remote.timeout(),
            &config.remote.user_agent,
        )
        .map_err(|e| CourierError::InvalidConfig(format!("HTTP client: {e}")))?;

        info!(
            base_url = %config.remote.base_url,
            database = %db_path.display(),
            geo_backend = %config.geo.backend,
            "Courier engine connected"
        );

        Ok(Self::new(
            config,
            db,
            Arc::new(transport),
            Arc::new(DefaultClock),
            Arc::new(TokioSleeper),
        ))
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn delivery_points(&self) -> &Arc<DeliveryPointSync> {
        &self.points
    }

    pub fn geo(&self) -> &GeoQueryEngine {
        &self.geo
    }

    pub fn orders(&self) -> &OrderPipeline {
        &self.orders
    }

    pub fn print(&self) -> &PrintService {
        &self.print
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Starts a delivery point sync in the background with the configured mode.
    pub fn spawn_sync(&self, filter: DeliveryPointFilter) {
        self.points
            .spawn_sync(&self.background, filter, self.points.default_mode());
    }

    /// Waits for background work, then closes the database.
    pub async fn shutdown(&self) {
        info!(pending = self.background.pending(), "Draining background tasks");
        self.background.drain().await;
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::test_support::{arc_clock, memory_db, remote_point, FakeTransport, RecordingSleeper};
    use crate::transport::HttpMethod;
    use serde_json::json;

    #[tokio::test]
    async fn test_engine_shares_one_token_across_components() {
        let db = memory_db().await;
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            HttpMethod::Get,
            "/v2/deliverypoints",
            200,
            json!([remote_point("MSK1", 55.75, 37.61)]),
        );
        transport.respond(HttpMethod::Get, "/v2/deliverypoints", 200, json!([]));
        transport.respond(HttpMethod::Get, "/v2/location/regions", 200, json!([]));

        let engine = CourierEngine::new(
            CourierConfig::default(),
            db,
            transport.clone(),
            arc_clock(),
            Arc::new(RecordingSleeper::default()),
        );

        engine
            .delivery_points()
            .sync(&DeliveryPointFilter::default(), SyncMode::Upsert)
            .await
            .unwrap();
        engine.directory().regions(Vec::new()).await.unwrap();

        let hits = engine
            .geo()
            .list_within_radius(55.75, 37.61, 1.0, None, None)
            .await
            .unwrap();
        assert_eq!(hits.total, 1);
        assert_eq!(transport.token_requests(), 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let err = CourierEngine::connect(CourierConfig::default()).await.err().unwrap();
        assert!(err.is_config_error());
    }
}
