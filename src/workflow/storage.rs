/// SQLite persistence layer for DAG documents
///
/// Documents are stored as JSON next to a few indexed lookup columns. Storage
/// keeps documents exactly as authored; compilation happens in the registry.

use crate::workflow::types::DagDocument;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-based DAG storage
#[derive(Debug, Clone)]
pub struct DagStorage {
    pool: SqlitePool,
}

impl DagStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `dags` table; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_dags_name ON dags(name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a document
    pub async fn save_dag(&self, document: &DagDocument) -> Result<()> {
        let definition_json = serde_json::to_string(document)?;

        sqlx::query(
            r#"
            INSERT INTO dags (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&document.id)
        .bind(&document.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved DAG document '{}'", document.id);
        Ok(())
    }

    pub async fn get_dag(&self, id: &str) -> Result<Option<DagDocument>> {
        let row = sqlx::query("SELECT definition FROM dags WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// Metadata of all stored DAGs, most recently updated first
    pub async fn list_dags(&self) -> Result<Vec<DagMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM dags ORDER BY updated_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DagMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Every stored document keyed by id
    ///
    /// Rows whose JSON no longer parses are logged and skipped.
    pub async fn load_all_dags(&self) -> Result<HashMap<String, DagDocument>> {
        let rows = sqlx::query("SELECT id, definition FROM dags")
            .fetch_all(&self.pool)
            .await?;

        let mut dags = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match DagDocument::from_json(&definition_json) {
                Ok(document) => {
                    dags.insert(id, document);
                }
                Err(e) => tracing::error!("❌ Stored DAG '{}' is unreadable: {}", id, e),
            }
        }

        Ok(dags)
    }

    pub async fn delete_dag(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Listing entry for a stored DAG
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DagMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage() -> DagStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = DagStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn document(id: &str, name: &str) -> DagDocument {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "blocks": [{ "name": "a", "type": "Script", "source": true, "params": { "script": "return 1" } }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn save_get_list_delete() {
        let storage = storage().await;
        storage.save_dag(&document("d1", "first")).await.unwrap();
        storage.save_dag(&document("d1", "renamed")).await.unwrap();
        storage.save_dag(&document("d2", "second")).await.unwrap();

        let d1 = storage.get_dag("d1").await.unwrap().unwrap();
        assert_eq!(d1.name, "renamed");
        assert_eq!(d1.blocks[0].name, "a");

        assert_eq!(storage.list_dags().await.unwrap().len(), 2);
        assert_eq!(storage.load_all_dags().await.unwrap().len(), 2);

        assert!(storage.delete_dag("d1").await.unwrap());
        assert!(!storage.delete_dag("d1").await.unwrap());
        assert!(storage.get_dag("d1").await.unwrap().is_none());
    }
}
