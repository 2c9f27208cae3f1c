/// Server setup and initialization
///
/// Wires together all components: gateway, step registry, flow catalog,
/// execution engine, scheduler and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    flow::catalog::FlowCatalog,
    gateway::{Gateway, MemoryGateway, SqliteGateway},
    runtime::{engine::ExecutionEngine, scheduler::ScheduleService},
    step::registry::StepRegistry,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Running application: the router plus the services behind it
pub struct App {
    pub router: Router,
    pub engine: Arc<ExecutionEngine>,
    pub schedules: Arc<ScheduleService>,
}

/// Open the configured persistence backend
pub async fn connect_gateway(config: &Config) -> Result<Arc<dyn Gateway>> {
    if config.database.is_memory() {
        tracing::warn!("⚠️ Using in-memory gateway, nothing survives a restart");
        return Ok(Arc::new(MemoryGateway::new()));
    }

    // Make sure the directory holding the database file exists
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tracing::info!("📁 Ensuring data directory exists: {}", parent.display());
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;
        }
    }

    tracing::info!("🗄️ Connecting to {}", config.database.url);
    Ok(Arc::new(SqliteGateway::connect(&config.database.url).await?))
}

/// Create the application with all routes and background services
pub async fn create_app(config: Config) -> Result<App> {
    let gateway = connect_gateway(&config).await?;

    tracing::info!("🧩 Initializing step registry");
    let steps = Arc::new(StepRegistry::with_builtins());
    tracing::info!("🧩 {} step types available", steps.len());

    tracing::info!("📊 Initializing flow catalog");
    let flows = Arc::new(FlowCatalog::new(Arc::clone(&gateway), Arc::clone(&steps)));
    flows.init_from_gateway().await
        .map_err(|e| anyhow::anyhow!("Failed to load flows from storage: {}", e))?;

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(gateway, steps, flows));

    if config.runtime.recover_on_start {
        engine.recover().await
            .map_err(|e| anyhow::anyhow!("Failed to recover executions: {}", e))?;
    }

    tracing::info!("⏰ Initializing schedule service");
    let schedules = Arc::new(
        ScheduleService::new(Arc::clone(&engine), &config.runtime.scheduler_tick).await
            .map_err(|e| anyhow::anyhow!("Failed to initialize scheduler: {}", e))?,
    );
    schedules.start().await?;

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let state = AppState {
        engine: Arc::clone(&engine),
        schedules: Arc::clone(&schedules),
    };
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_routes(state));

    tracing::info!("✅ Application initialized successfully");
    Ok(App { router, engine, schedules })
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Flowloom server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    let served = axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = app.schedules.stop().await {
        tracing::warn!("⚠️ Scheduler did not stop cleanly: {}", e);
    }
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("⏹️ Shutdown signal received");
}

/// Liveness probe
async fn health_check() -> &'static str {
    "ok"
}
