use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::signal;
use tracing::{error, info};

use plant_common::data::repository::PgPlantStore;
use plant_common::data::store::PlantStore;
use plant_common::data::validator::TelemetryValidator;
use plant_common::logging::{init_logging, LogConfig};

use plant_core::broker::TcpLineBroker;
use plant_core::config::Settings;
use plant_core::ingest::{IngestConfig, IngestService, Pipeline};
use plant_core::kpi::{KpiWindow, OeeCalculator};
use plant_core::metrics;
use plant_core::orders::OrderLifecycleManager;
use plant_core::predictor::EtaPredictor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("run") | None => run_ingest_mode().await,
        Some("oee") => run_oee_report(args.get(2).cloned(), args.get(3).cloned()).await,
        Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Plant Core - Machine Telemetry & Production Order Tracking");
    println!();
    println!("Usage:");
    println!("  cargo run                    # Run the ingestion pipeline");
    println!("  cargo run run                # Same as above");
    println!("  cargo run oee [id|all] [h]   # OEE report per machine or fleet-wide,");
    println!("                               # over the last [h] hours (default 8)");
    println!("  cargo run --help             # Show this help message");
    println!();
}

/// Ingestion mode: broker adapter -> pipeline -> store.
async fn run_ingest_mode() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_application()?;

    info!("Starting Plant Core (ingestion mode)");

    let settings = Settings::new()?;
    info!("Configuration loaded");
    info!(
        "Database: {} connections; broker adapter on {}",
        settings.database.max_connections, settings.broker.bind_addr
    );

    info!("Connecting to database...");
    let pool = create_database_pool(&settings).await?;
    test_database_connection(&pool).await?;
    info!("Database connection established");

    let store: Arc<dyn PlantStore> = Arc::new(PgPlantStore::new(pool));

    let orders = Arc::new(OrderLifecycleManager::new(Arc::clone(&store)));
    let predictor = Arc::new(EtaPredictor::new(Arc::clone(&store), Arc::clone(&orders)));
    let validator = Arc::new(TelemetryValidator::new(
        settings.validation.to_validation_config(),
    ));

    let pipeline = Pipeline::new(Arc::clone(&store), orders, predictor, validator);

    let broker = Arc::new(TcpLineBroker::new(settings.broker.bind_addr.clone()));
    let ingest_config = IngestConfig {
        channel_capacity: settings.broker.channel_capacity,
        resubscribe_delay_secs: settings.broker.resubscribe_delay_secs,
        health_interval_secs: settings.ingest.health_interval_secs,
        ..Default::default()
    };

    let service = IngestService::new(broker, pipeline, ingest_config);

    metrics::register_metrics();

    // Forward Ctrl+C into the service shutdown broadcast.
    let shutdown_tx = service.get_shutdown_tx();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, forwarding shutdown to service");
            let _ = shutdown_tx.send(());
        }
    });

    match service.start().await {
        Ok(()) => {
            info!("Service stopped successfully");
            Ok(())
        }
        Err(e) => {
            error!("Service stopped with error: {}", e);
            Err(Box::new(e))
        }
    }
}

/// Report mode: compute OEE over a recent window and print it.
async fn run_oee_report(
    target: Option<String>,
    hours: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_application()?;

    let settings = Settings::new()?;
    let pool = create_database_pool(&settings).await?;
    test_database_connection(&pool).await?;

    let store: Arc<dyn PlantStore> = Arc::new(PgPlantStore::new(pool));
    let calculator = OeeCalculator::new(Arc::clone(&store), settings.kpi.fleet_concurrency);

    let hours: i64 = hours.as_deref().unwrap_or("8").parse().unwrap_or(8);
    let now = Utc::now();
    let (start, end) = KpiWindow::Custom {
        start: now - ChronoDuration::hours(hours),
        end: now,
    }
    .resolve(now);

    let results = match target.as_deref() {
        Some("all") | None => calculator.compute_for_fleet(start, end).await?,
        Some(id) => {
            let machine_id: i32 = id.parse()?;
            vec![calculator.compute_for_machine(machine_id, start, end).await?]
        }
    };

    println!("{}", "=".repeat(72));
    println!(
        "OEE report  {}  ->  {}",
        start.format("%Y-%m-%d %H:%M UTC"),
        end.format("%Y-%m-%d %H:%M UTC")
    );
    println!("{}", "=".repeat(72));
    println!(
        "{:<6} {:<10} {:>12} {:>12} {:>10} {:>8}",
        "ID", "Code", "Availability", "Performance", "Quality", "OEE"
    );
    for r in &results {
        println!(
            "{:<6} {:<10} {:>11.2}% {:>11.2}% {:>9.2}% {:>7.2}%",
            r.machine_id,
            r.machine_code,
            r.availability_pct,
            r.performance_pct,
            r.quality_pct,
            r.oee_pct
        );
    }
    if results.is_empty() {
        println!("(no active machines)");
    }

    Ok(())
}

/// Initialize environment and logging.
fn init_application() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();

    init_logging(
        LogConfig::from_env()
            .with_default_level("plant_core=info,plant_common=info,sqlx=warn"),
    )?;

    Ok(())
}

/// Create database connection pool.
async fn create_database_pool(settings: &Settings) -> Result<PgPool, Box<dyn std::error::Error + Send + Sync>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .max_lifetime(Duration::from_secs(settings.database.max_lifetime))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&settings.database.url)
        .await?;

    Ok(pool)
}

/// Test database connectivity and verify the expected schema is present.
async fn test_database_connection(pool: &PgPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sqlx::query("SELECT 1").execute(pool).await?;

    for table in ["machines", "products", "production_orders", "telemetry_samples", "events"] {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT FROM information_schema.tables
                WHERE table_schema = 'public'
                AND table_name = $1
            )",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            error!("Required table '{}' does not exist in database", table);
            error!("Run the schema provisioning scripts first");
            std::process::exit(1);
        }
    }

    info!("Database schema validation passed");
    Ok(())
}
