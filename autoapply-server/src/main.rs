//! # AutoApply Server
//!
//! Runs the durable job scheduler behind an HTTP control surface.
//!
//! The scheduler persists jobs in PostgreSQL (or in memory for local runs),
//! promotes them through a bounded delivery channel to a fixed worker pool,
//! and hands each job to an external automation command.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoapply_core::scheduler::{
    ApplicantContext, ApplicantSource, InMemoryJobStore, JobStore, PostgresApplicantSource,
    PostgresJobStore, SchedulerController, SchedulerDeps, StaticApplicantSource, StopOutcome,
};
use autoapply_server::{
    AppState,
    adapter::ProcessAdapter,
    create_app,
    infra::config::{Config, ConfigLoad, ConfigLoader},
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "autoapply-server")]
#[command(about = "Durable job scheduler for application automation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to the TOML configuration file
    #[arg(long, env = "AUTOAPPLY_CONFIG")]
    config: Option<PathBuf>,

    /// Dotenv file to load instead of `./.env`
    #[arg(long, env = "AUTOAPPLY_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Keep jobs in memory instead of PostgreSQL. Nothing survives a restart.
    #[arg(long, env = "AUTOAPPLY_MEMORY_STORE", default_value_t = false)]
    memory_store: bool,

    /// Start the scheduler as soon as the server is up
    #[arg(long, default_value_t = false)]
    autostart: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Db(DbCommand::Migrate)) = cli.command {
        return run_db_migrate(&cli.serve).await;
    }

    run_server(cli.serve).await
}

async fn run_db_migrate(args: &ServeArgs) -> anyhow::Result<()> {
    let config = load_runtime_config(args)?;
    let pool = connect(&config).await?;
    PostgresJobStore::new(pool)
        .await
        .context("job store health check failed")?
        .migrate()
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    let load = loader.load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,autoapply_core=info,autoapply_server=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = load.config_path() {
        info!(path = %path.display(), "configuration file loaded");
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = load;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if args.autostart {
        config.scheduler.autostart = true;
    }

    let tuning = &config.scheduler.tuning;
    info!(
        scheduler.pool_size = tuning.pool_size,
        scheduler.channel_capacity = tuning.channel_capacity,
        scheduler.poll_interval_ms = tuning.poll_interval_ms,
        scheduler.inflight_ceiling = tuning.inflight_ceiling(),
        scheduler.autostart = config.scheduler.autostart,
        adapter.timeout = ?config.adapter.timeout,
        "scheduler configuration in effect"
    );

    Ok(config)
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let Some(url) = config.database.url.as_deref() else {
        error!("DATABASE_URL must be provided for PostgreSQL connections");
        anyhow::bail!("No PostgreSQL connection configuration found");
    };

    info!(max_connections = config.database.max_connections, "Connecting to PostgreSQL");
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")
}

async fn build_stores(
    config: &Config,
    memory_store: bool,
) -> anyhow::Result<(Arc<dyn JobStore>, Arc<dyn ApplicantSource>)> {
    if memory_store {
        warn!("Using in-memory job store; jobs are lost on restart");
        return Ok((
            Arc::new(InMemoryJobStore::new()),
            Arc::new(StaticApplicantSource::new(ApplicantContext::default())),
        ));
    }

    let pool = connect(config).await?;
    let store = PostgresJobStore::new(pool.clone())
        .await
        .context("job store health check failed")?
        .with_claim_conflict_retries(config.scheduler.tuning.claim_conflict_retries);
    store.migrate().await.context("database migration failed")?;

    Ok((
        Arc::new(store),
        Arc::new(PostgresApplicantSource::new(pool)),
    ))
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_runtime_config(&args)?;

    let adapter = ProcessAdapter::from_config(&config.adapter)
        .context("adapter.command (ADAPTER_COMMAND) must be configured")?;
    info!(command = %adapter.command(), "automation adapter configured");

    let (store, applicants) = build_stores(&config, args.memory_store).await?;

    let scheduler = Arc::new(SchedulerController::new(
        SchedulerDeps {
            store: Arc::clone(&store),
            adapter: Arc::new(adapter),
            applicants,
        },
        config.scheduler.tuning.clone(),
    ));

    if config.scheduler.autostart {
        scheduler
            .start()
            .await
            .context("failed to autostart scheduler")?;
    }

    let router = create_app(AppState::new(store, Arc::clone(&scheduler)));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting AutoApply server (HTTP) on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&scheduler)))
        .await;

    // No-op when the signal handler already stopped it.
    stop_scheduler(&scheduler).await;
    served.context("HTTP server failed")
}

async fn shutdown_signal(scheduler: Arc<SchedulerController>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received; stopping scheduler");
    stop_scheduler(&scheduler).await;
}

async fn stop_scheduler(scheduler: &SchedulerController) {
    if let StopOutcome::Stopped(report) = scheduler.stop().await {
        info!(
            forced = report.forced,
            released = report.released,
            "scheduler stopped"
        );
    }
}
