#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use pgsink_cluster::{Cluster, Role};
use server::config::{CliArgs, ServerConfig};
use server::gateway::{PersistenceGateway, PgGateway};
use server::runtime::WorkerRuntime;
use server::telemetry::init_telemetry;
use tracing::Instrument;

// mimalloc holds up better than the system allocator with many small
// short-lived payload buffers.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// One event loop per process.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    let role = Role::detect()?;
    let span = tracing::info_span!("process", role = %role.label(), pid = std::process::id());

    let result = run(role, config).instrument(span).await;
    providers.shutdown();

    // Workers and the coordinator report their outcome through the exit code.
    std::process::exit(result?);
}

async fn run(role: Role, config: ServerConfig) -> anyhow::Result<i32> {
    if role.is_coordinator() {
        log_startup_info(&config);
        prepare_schema(&config).await?;
    }

    let cluster = Cluster::new(config.cluster);
    let code = cluster
        .start(
            role,
            || WorkerRuntime::<PgGateway>::start(&config),
            WorkerRuntime::<PgGateway>::stop,
        )
        .await?;
    Ok(code)
}

/// Creates the table once, before any worker exists.
async fn prepare_schema(config: &ServerConfig) -> anyhow::Result<()> {
    let gateway = PgGateway::init(&config.store)
        .await
        .context("Postgres is unreachable")?;
    let created = gateway.ensure_schema().await;
    gateway.close().await;
    created.context("Failed to create the post_data table")
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ingestion service on {} with full config: {:#?}",
            config.addr,
            config
        );
    } else {
        tracing::info!(
            "Starting ingestion service on {} with {} workers",
            config.addr,
            config.cluster.workers
        );
    }
}
