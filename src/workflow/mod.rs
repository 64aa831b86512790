/// DAG management layer
///
/// - Type definitions: the authoring document and the compiled block config
/// - SQLite persistence of documents with sqlx
/// - Compilation plus a lock-free hot-reload registry using ArcSwap

pub mod types;

pub mod storage;

pub mod registry;

pub use registry::{CompiledDag, DagRegistry};
pub use storage::{DagMetadata, DagStorage};
pub use types::{
    ApiRequest, BlockConfig, BlockDocument, BlockKind, BlockType, DagDocument, ExecutionStrategy,
    Invocation, Relation, Scheduling,
};
