/// SQLite-backed project and config value storage
///
/// One database file ({data_dir}/blockway.db) holds DAG documents, projects and
/// config values. `ProjectConfigStore` is the `ConfigSource` runs resolve
/// `getValueByKey` against.

use crate::context::config::ConfigSource;
use crate::project::types::Project;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::path::Path;

/// Open (creating if needed) the engine database under `data_dir`
pub async fn open_pool(data_dir: &str) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))?;
    let db_path = Path::new(data_dir).join("blockway.db");

    tracing::info!("🗄️ Opening database: {}", db_path.display());
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    Ok(SqlitePool::connect_with(options).await?)
}

/// Projects and their scoped config values
#[derive(Debug, Clone)]
pub struct ProjectConfigStore {
    pool: SqlitePool,
}

impl ProjectConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `projects` and `config_values` tables and the default project
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_slug TEXT REFERENCES projects(slug),
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config_values (
                project_slug TEXT NOT NULL REFERENCES projects(slug),
                key TEXT NOT NULL,
                value JSON NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (project_slug, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let default = Project::default_project();
        sqlx::query("INSERT OR IGNORE INTO projects (slug, name) VALUES (?, ?)")
            .bind(&default.slug)
            .bind(&default.name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn save_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (slug, name, parent_slug)
            VALUES (?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                parent_slug = excluded.parent_slug
            "#,
        )
        .bind(&project.slug)
        .bind(&project.name)
        .bind(&project.parent_slug)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_project(&self, slug: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT slug, name, parent_slug FROM projects WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Project {
            slug: row.get("slug"),
            name: row.get("name"),
            parent_slug: row.get("parent_slug"),
        }))
    }

    pub async fn set_value(&self, project_slug: &str, key: &str, value: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config_values (project_slug, key, value, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(project_slug, key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(project_slug)
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_value(&self, project_slug: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM config_values WHERE project_slug = ? AND key = ?")
            .bind(project_slug)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ConfigSource for ProjectConfigStore {
    async fn lookup(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        self.get_value(scope, key).await
    }

    async fn parent_scope(&self, scope: &str) -> Result<Option<String>> {
        Ok(self.get_project(scope).await?.and_then(|p| p.parent_slug))
    }
}
