/// Blockway: DAG-based block workflow engine
///
/// Main entry point for the Blockway server.

use blockway::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - DAG management API at /api/dags/*
/// - Run triggers at /run/{dag_id}/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from BLOCKWAY_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
