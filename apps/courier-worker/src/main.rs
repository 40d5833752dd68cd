//! # Courier Worker
//!
//! Runs one courier engine operation from the command line.
//!
//! ```text
//! courier-worker [--config PATH] sync    [--mode replace|upsert] [--city-code N]
//! courier-worker [--config PATH] token   [--force]
//! courier-worker [--config PATH] nearby  --lat 55.75 --lon 37.61 --radius 5
//! courier-worker [--config PATH] tariffs --from 44 --to 137 --weight 1500
//! courier-worker [--config PATH] order   (--number N | --uuid U)
//! courier-worker [--config PATH] print   --kind receipt --number N [--refresh]
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr and follow
//! `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use courier_core::PrintOrderRef;
use courier_sync::delivery_points::DeliveryPointFilter;
use courier_sync::directory::{CalculatorLocation, PackageSize};
use courier_sync::{CourierConfig, CourierEngine, PrintRequest, SyncMode, TariffListRequest};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "courier-worker", about = "Courier platform integration worker", version)]
struct Cli {
    /// Configuration file; defaults to the per-user config location.
    #[arg(long, global = true, value_name = "path")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull the delivery point directory into the local mirror.
    Sync {
        #[arg(long)]
        mode: Option<SyncMode>,
        #[arg(long)]
        city_code: Option<i64>,
        #[arg(long)]
        country_code: Option<String>,
    },
    /// Show the current credential, renewing it when needed.
    Token {
        /// Discard the cached credential and acquire a new one.
        #[arg(long)]
        force: bool,
    },
    /// Delivery points around a coordinate, nearest first.
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 5.0)]
        radius: f64,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Quote every tariff between two cities for one package.
    Tariffs {
        #[arg(long = "from")]
        from_code: i64,
        #[arg(long = "to")]
        to_code: i64,
        /// Grams.
        #[arg(long)]
        weight: i64,
        /// Centimetres, `LxWxH`.
        #[arg(long, default_value = "10x10x10")]
        size: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Look up an order on the platform.
    Order {
        #[arg(long, conflicts_with = "uuid")]
        number: Option<String>,
        #[arg(long)]
        uuid: Option<String>,
    },
    /// Render a receipt or barcode PDF.
    Print {
        #[arg(long, value_enum, default_value_t = Kind::Receipt)]
        kind: Kind,
        /// Tracking numbers.
        #[arg(long = "number", required = true)]
        numbers: Vec<String>,
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Receipt,
    Barcode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = CourierConfig::load(cli.config).context("loading configuration")?;
    let engine = CourierEngine::connect(config)
        .await
        .context("connecting the courier engine")?;

    let outcome = run(&engine, cli.command).await;
    engine.shutdown().await;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(engine: &CourierEngine, command: Command) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Sync {
            mode,
            city_code,
            country_code,
        } => {
            let filter = DeliveryPointFilter {
                city_code,
                country_code,
                ..Default::default()
            };
            let mode = mode.unwrap_or_else(|| engine.delivery_points().default_mode());
            let report = engine.delivery_points().sync(&filter, mode).await?;
            Ok(serde_json::to_value(report)?)
        }
        Command::Token { force } => {
            let credential = if force {
                engine.tokens().force_renew().await?
            } else {
                engine.tokens().ensure_valid().await?
            };
            Ok(json!({
                "token_type": credential.token_type,
                "scope": credential.scope,
                "expires_at": credential.expires_at,
            }))
        }
        Command::Nearby {
            lat,
            lon,
            radius,
            limit,
            offset,
        } => {
            let listing = engine
                .geo()
                .list_within_radius(lat, lon, radius, limit, offset)
                .await?;
            Ok(serde_json::to_value(listing)?)
        }
        Command::Tariffs {
            from_code,
            to_code,
            weight,
            size,
            date,
        } => {
            let (length, width, height) = parse_size(&size)?;
            let request = TariffListRequest {
                date: date.unwrap_or_else(|| Utc::now().format("%Y-%m-%dT%H:%M:%S%z").to_string()),
                order_type: 1,
                additional_order_types: None,
                currency: None,
                lang: "rus".to_string(),
                from_location: CalculatorLocation {
                    code: Some(from_code),
                    ..Default::default()
                },
                to_location: CalculatorLocation {
                    code: Some(to_code),
                    ..Default::default()
                },
                packages: vec![PackageSize {
                    weight,
                    length,
                    width,
                    height,
                }],
            };
            let quotes = engine.directory().calculate_tariffs(&request).await?;
            Ok(serde_json::to_value(quotes)?)
        }
        Command::Order { number, uuid } => match (number, uuid) {
            (Some(number), _) => Ok(engine.directory().order_by_tracking_number(&number).await?),
            (None, Some(uuid)) => Ok(engine.directory().order_by_uuid(&uuid).await?),
            (None, None) => bail!("either --number or --uuid is required"),
        },
        Command::Print {
            kind,
            numbers,
            refresh,
        } => {
            let refs = numbers.into_iter().map(PrintOrderRef::by_number).collect();
            let mut request = match kind {
                Kind::Receipt => PrintRequest::receipt(refs),
                Kind::Barcode => PrintRequest::barcode(refs),
            };
            request.refresh = refresh;

            let artifact = engine.print().submit_and_await(&request).await?;
            info!(job_id = artifact.job.id, cached = artifact.cached, "Print finished");
            Ok(json!({
                "uuid": artifact.job.uuid,
                "status": artifact.status,
                "url": artifact.url,
                "file_path": artifact.job.file_path,
                "file_size": artifact.job.file_size,
                "cached": artifact.cached,
            }))
        }
    }
}

/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=courier_sync=trace` - Trace the engine only
/// - Default: INFO level, sqlx quieted
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_size(raw: &str) -> anyhow::Result<(i64, i64, i64)> {
    let parts = raw
        .split(['x', 'X'])
        .map(|p| p.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid package size {raw:?}"))?;
    match parts[..] {
        [l, w, h] => Ok((l, w, h)),
        _ => bail!("package size must look like LxWxH, got {raw:?}"),
    }
}
