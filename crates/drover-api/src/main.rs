//! Drover API Server

use anyhow::Context;
use clap::Parser;
use drover_api::services::GitHubScm;
use drover_api::{AppState, routes};
use drover_config::{KdlCompiler, SystemConfig};
use drover_core::{CompileMetadata, QueueService};
use drover_db::{MemoryStore, Store, create_pool, run_migrations};
use drover_scheduler::{
    HttpWorkerClient, MemoryQueue, PgQueue, RouteTable, Scheduler, SchedulerDeps,
    WorkerTokenMinter,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drover-server")]
#[command(about = "Drover CI/CD API server", long_about = None)]
#[command(version)]
struct Cli {
    /// System configuration file
    #[arg(short, long, env = "DROVER_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection string; builds are kept in memory without one
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Address to listen on
    #[arg(long, env = "DROVER_ADDR")]
    addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = match &cli.config {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SystemConfig::default(),
    };
    if let Some(url) = cli.database_url {
        config.database.url = Some(url);
    }
    let addr = match cli.addr {
        Some(addr) => addr,
        None => config
            .server
            .addr
            .parse()
            .with_context(|| format!("invalid server address {}", config.server.addr))?,
    };

    let store;
    let queue: Arc<dyn QueueService>;
    match &config.database.url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            let routes = RouteTable::new(config.queue.channel.clone(), config.queue.routes.clone());
            store = Store::postgres(pool.clone());
            queue = Arc::new(PgQueue::new(pool, routes));
        }
        None => {
            warn!("No database configured, builds will not survive a restart");
            store = Store::memory(MemoryStore::new());
            queue = Arc::new(MemoryQueue::new(
                config.queue.channel.clone(),
                config.queue.routes.clone(),
            ));
        }
    }

    if config.worker.auth_secret.is_empty() {
        warn!("Worker auth secret is empty, worker tokens are trivially forgeable");
    }
    let minter = WorkerTokenMinter::new(config.worker.auth_secret.clone(), config.worker.token_ttl);
    let workers = HttpWorkerClient::new(minter.clone(), config.worker.cancel_timeout)?;
    let scm = GitHubScm::new(
        config.scm.api_url.clone(),
        config.scm.config_path.clone(),
        config.server.public_url.clone(),
    );

    let scheduler = Arc::new(Scheduler::new(
        SchedulerDeps {
            store: store.clone(),
            scm: Arc::new(scm),
            compiler: Arc::new(KdlCompiler::new(config.scm.clone_image.clone())),
            queue,
            workers: Arc::new(workers),
        },
        config.scheduler.clone(),
        CompileMetadata {
            server_address: config.server.public_url.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    ));

    let state = AppState::new(
        store,
        scheduler.clone(),
        minter,
        &config.scm.webhook_secret,
    );

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining enqueue workers");
    scheduler.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
