/// Blockway: DAG-based block workflow engine
///
/// Blocks are wired by named relations and conditional routing. Every run
/// shares an append-only execution context that blocks read through a DAO.

// Core configuration and setup
pub mod config;

// Typed configuration and context errors
pub mod error;

// Per-run context store, DAO and config resolution
pub mod context;

// DAG documents, compilation, storage and hot-reload registry
pub mod workflow;

// Block contract, built-in blocks and the execution engine
pub mod runtime;

// Projects and scoped config values
pub mod project;

// HTTP API layer - DAG management and run triggers
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use context::{BlockError, BlockOutput, BlockResponse, ContextStore, Dao, DataFlowRecord};
pub use error::{ConfigError, DaoError};
pub use project::Project;
pub use runtime::{Block, BlockContext, BlockRegistry, ExecutionEngine, FnBlock, RunReport};
pub use server::start_server;
pub use workflow::{CompiledDag, DagDocument};
