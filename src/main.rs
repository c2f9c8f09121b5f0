//! GA4 warehouse sync CLI.
//!
//! Single entry point, no required arguments: configuration comes from the
//! environment (a `.env` file is honored), with optional flag overrides for
//! the storage and export paths. Exit code 0 on full success, 1 when any
//! dataset failed, 2 when the run aborted before fetching.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ga4_warehouse::config::PipelineConfig;
use ga4_warehouse::error::SyncError;
use ga4_warehouse::ga4::Ga4Client;
use ga4_warehouse::models::DATASETS;
use ga4_warehouse::storage::WarehouseStorage;
use ga4_warehouse::sync::SyncOrchestrator;

#[derive(Parser, Debug)]
#[command(name = "ga4sync")]
#[command(about = "Incrementally sync GA4 report metrics into a relational SQLite warehouse")]
struct Args {
    /// Override the warehouse path (DATABASE_PATH otherwise)
    #[arg(long)]
    database: Option<String>,

    /// Override the CSV export directory (EXPORT_DIR otherwise)
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ga4_warehouse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!(error = %err, "run aborted");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<bool, SyncError> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(dir) = args.export_dir {
        config.export_dir = Some(dir);
    }

    let storage = Arc::new(WarehouseStorage::open(&config.database_path)?);
    let client = Ga4Client::from_config(&config)?;
    let orchestrator = SyncOrchestrator::new(client, Arc::clone(&storage), config.clone());

    let summary = orchestrator.run(Utc::now().date_naive()).await?;
    print!("{}", summary.format_report());

    if let Some(dir) = &config.export_dir {
        for spec in DATASETS {
            if let Err(err) = storage.export_fact_csv(spec, dir) {
                warn!(table = spec.table, error = %err, "csv export failed");
            }
        }
    }

    Ok(summary.fully_successful())
}
