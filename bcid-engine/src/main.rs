//! bcid - barcode identification pipeline stages
//!
//! Each invocation runs one stage against one query directory. Stages that
//! call external services share a cross-process throttle database, so many
//! queries can be processed concurrently by separate invocations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bcid_common::{Config, EndpointQuota, ThrottleStore};
use bcid_engine::clients::{BoldClient, EntrezClient, GbifClient, RecordCounter, Taxonkit};
use bcid_engine::workflow::{self, Clients, QueryDir, Stage, StageContext};
use clap::Parser;
use tracing::{error, info};

/// Command-line arguments for bcid
#[derive(Parser, Debug)]
#[command(name = "bcid")]
#[command(about = "Taxonomic identification from barcode sequence search results")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "BCID_CONFIG")]
    config: Option<PathBuf>,

    /// Run output directory holding taxonomy.csv [default: parent of QUERY_DIR]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Hits come from BOLD rather than BLAST
    #[arg(long)]
    bold: bool,

    /// Stage to run: assign-taxonomy, source-diversity, db-coverage, report-context
    stage: Stage,

    /// Query directory
    query_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let query = QueryDir::new(&args.query_dir, args.output_dir.clone())
        .context("Failed to open query directory")?;
    let _log_guard = bcid_common::logging::init_logging(&config.logging, Some(query.output_dir()))
        .context("Failed to initialize logging")?;

    info!(
        stage = %args.stage,
        query = %query.path().display(),
        bold = args.bold,
        "Starting bcid {} ({}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    let ctx = StageContext::new(config, query, args.bold).context("Failed to load built-in catalogues")?;
    let result = run_stage(args.stage, &ctx).await;
    if let Err(e) = &result {
        error!(stage = %args.stage, error = %e, "Stage failed");
    }
    result
}

async fn run_stage(stage: Stage, ctx: &StageContext) -> Result<()> {
    let clients = if stage.needs_clients() {
        Some(build_clients(ctx).await?)
    } else {
        None
    };
    match (stage, clients) {
        (Stage::AssignTaxonomy, _) => {
            workflow::assign_taxonomy::run(ctx).context("Taxonomic assignment failed")?;
        }
        (Stage::ReportContext, _) => {
            workflow::report_context::run(ctx).context("Building the report context failed")?;
        }
        (Stage::SourceDiversity, Some(clients)) => {
            workflow::source_diversity::run(ctx, &clients)
                .await
                .context("Source diversity assessment failed")?;
        }
        (Stage::DbCoverage, Some(clients)) => {
            workflow::db_coverage::run(ctx, &clients).await.context(
                "Database coverage assessment failed. Completed targets were saved; the stage can be rerun \
                 once the external services are reachable",
            )?;
        }
        (stage, None) => anyhow::bail!("Stage {} requires external service clients", stage),
    }
    info!(stage = %stage, "Stage complete");
    Ok(())
}

async fn build_clients(ctx: &StageContext) -> Result<Clients> {
    let config = &ctx.config;
    let db_path = config.throttle.database_path(config.entrez.email.as_deref());
    let store = ThrottleStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open throttle database {}", db_path.display()))?;

    let entrez_throttle = store.endpoint(
        EndpointQuota::entrez(config.entrez.requests_per_second),
        &config.throttle,
    )?;
    let gbif = GbifClient::new(
        &config.gbif,
        store.endpoint(EndpointQuota::gbif_fast(), &config.throttle)?,
        store.endpoint(EndpointQuota::gbif_slow(), &config.throttle)?,
    )?;

    let counter: Box<dyn RecordCounter> = if ctx.bold {
        Box::new(BoldClient::new(
            &config.bold,
            store.endpoint(EndpointQuota::bold(), &config.throttle)?,
        )?)
    } else {
        Box::new(EntrezClient::new(&config.entrez, entrez_throttle.clone())?)
    };

    Ok(Clients {
        publications: Box::new(EntrezClient::new(&config.entrez, entrez_throttle)?),
        counter,
        taxonomy: Box::new(Taxonkit::new(&config.taxonkit)),
        relatives: Box::new(gbif),
    })
}
