/// Project management module
///
/// Projects form a parent chain of config scopes. `ProjectConfigStore` keeps
/// projects and their config values in SQLite and serves them to runs as a
/// `ConfigSource`.

pub mod database;
pub mod types;

pub use database::{open_pool, ProjectConfigStore};
pub use types::Project;
