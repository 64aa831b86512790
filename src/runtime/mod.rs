/// Runtime Execution Engine
///
/// - The `Block` contract and the context handed to each invocation
/// - Block dispatch with timeout and panic containment
/// - Built-in block implementations (Script, APIRequest, Schema)
/// - The frontier-driven DAG engine

pub mod block;

pub mod blocks;

pub mod engine;

pub mod executor;

pub use block::{Block, BlockContext, FnBlock};
pub use engine::{EngineSettings, ExecutionEngine, Outcome, RunCompletion, RunReport, TraceEntry};
pub use executor::BlockRegistry;
