/// Error taxonomy for DAG loading and context queries
///
/// Configuration errors stop a DAG from ever running. DAO errors are raised to
/// the calling block, which decides whether they make its own invocation fail.
/// Block-level and engine-level failures are not Rust errors at all: they travel
/// as `BlockError` values inside a `BlockResponse` so routing stays uniform.

use thiserror::Error;

/// Malformed DAG definition, detected at load time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Malformed DAG document: {0}")]
    Malformed(String),

    #[error("Block name must not be empty")]
    EmptyName,

    #[error("Duplicate block name: '{0}'")]
    DuplicateName(String),

    #[error("DAG has no source block")]
    NoSource,

    #[error("DAG has multiple source blocks: {}", .0.join(", "))]
    MultipleSources(Vec<String>),

    #[error("Relation '{relation}' on block '{block}' targets unknown block '{target}'")]
    DanglingRelation {
        block: String,
        relation: String,
        target: String,
    },

    #[error("Block '{block}' declares relation '{relation}' more than once (again to '{target}')")]
    DuplicateRelation {
        block: String,
        relation: String,
        target: String,
    },

    #[error("Block '{block}' depends on unknown block '{dependency}'")]
    DanglingDependency { block: String, dependency: String },

    #[error("Block '{block}' has unresolvable type '{block_type}'")]
    UnresolvableBlockType { block: String, block_type: String },

    #[error("Block '{block}' has invalid params for type '{block_type}': {message}")]
    InvalidParams {
        block: String,
        block_type: String,
        message: String,
    },
}

/// Failure of a read against the execution context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaoError {
    #[error("Block '{0}' has not been visited")]
    NotVisited(String),

    #[error("Block '{0}' has no recorded responses")]
    EmptyHistory(String),

    #[error("Unknown data flow: '{0}'")]
    UnknownFlow(String),

    #[error("No data flows registered in this run")]
    NoDataFlows,

    #[error("Config key not found: '{0}'")]
    ConfigNotFound(String),

    #[error("Config backend error: {0}")]
    ConfigBackend(String),
}
