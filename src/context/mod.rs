/// Execution context of a workflow run
///
/// The Context Store owns all per-run state and is written only by the engine.
/// Running blocks read it through the DAO, always over a snapshot.

pub mod config;
pub mod dao;
pub mod response;
pub mod store;

pub use config::{ConfigEntry, ConfigResolver, ConfigSource, StaticConfigSource};
pub use dao::{BodyEntry, CurrentInvocation, Dao};
pub use response::{
    BlockError, BlockOutput, BlockResponse, DataFlowRecord, DataFlowStatus, SuccessRange,
};
pub use store::{Commit, ContextSnapshot, ContextStore, JournalEntry};
