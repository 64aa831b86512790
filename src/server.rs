/// Server setup and initialization
///
/// Wires together storage, the DAG registry, the block registry, the
/// execution engine and the HTTP routes.

use crate::{
    api::{create_dag_routes, create_run_routes, AppState},
    config::Config,
    project::{open_pool, ProjectConfigStore},
    runtime::{engine::EngineSettings, executor::BlockRegistry, ExecutionEngine},
    workflow::{registry::DagRegistry, storage::DagStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the application over an already-open database pool
///
/// Uses the built-in block implementations; see [`build_app_with_blocks`]
/// to register extra ones.
pub async fn build_app(pool: SqlitePool, config: &Config) -> Result<Router> {
    build_app_with_blocks(pool, config, BlockRegistry::with_builtins()).await
}

pub async fn build_app_with_blocks(
    pool: SqlitePool,
    config: &Config,
    blocks: BlockRegistry,
) -> Result<Router> {
    tracing::info!("📋 Initializing DAG storage");
    let storage = DagStorage::new(pool.clone());
    storage
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize DAG storage: {}", e))?;

    tracing::info!("🏗️ Initializing project config store");
    let config_store = ProjectConfigStore::new(pool);
    config_store
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize config store: {}", e))?;

    tracing::info!("🧱 Block implementations: {:?}", blocks);
    let blocks = Arc::new(blocks);

    tracing::info!("📊 Initializing DAG registry");
    let registry = Arc::new(DagRegistry::new(storage, Arc::clone(&blocks)));
    tracing::info!("📥 Loading existing DAGs from storage");
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load DAGs from storage: {}", e))?;

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        blocks,
        EngineSettings::from(&config.engine),
    ));

    let state = AppState {
        registry,
        engine,
        config_source: Arc::new(config_store),
        config_scope: config.engine.config_scope.clone(),
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_dag_routes())
        .merge(create_run_routes())
        .with_state(state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Create the application, opening the database under the configured data dir
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Using data directory: {}", config.database.data_dir);
    let pool = open_pool(&config.database.data_dir).await?;
    build_app(pool, &config).await
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Blockway server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
