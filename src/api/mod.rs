/// HTTP API Layer
///
/// - DAG CRUD with compile-on-write and hot reload
/// - Run triggering: the HTTP request becomes the run's `apiRequest`

use crate::{
    context::config::{ConfigResolver, ConfigSource},
    runtime::engine::ExecutionEngine,
    workflow::registry::DagRegistry,
};
use std::sync::Arc;

// DAG management endpoints (POST/GET/PUT/DELETE)
pub mod dags;

// Run execution endpoints
pub mod runs;

pub use dags::create_dag_routes;
pub use runs::create_run_routes;

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    /// Hot-reload registry (and through it, DAG storage)
    pub registry: Arc<DagRegistry>,
    /// Engine every run goes through
    pub engine: Arc<ExecutionEngine>,
    /// Backend of `getValueByKey`
    pub config_source: Arc<dyn ConfigSource>,
    /// Scope runs resolve config values in
    pub config_scope: String,
}

impl AppState {
    /// Fresh per-run resolver, so cached values never leak between runs
    pub fn resolver(&self) -> Arc<ConfigResolver> {
        Arc::new(ConfigResolver::new(
            Arc::clone(&self.config_source),
            self.config_scope.clone(),
        ))
    }
}
