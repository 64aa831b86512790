/// Config resolution for running blocks
///
/// The key/value store behind `getValueByKey` is an external collaborator
/// reached through `ConfigSource`. A `ConfigResolver` binds a source to the
/// scope of one run and caches what it resolves for the run's lifetime.

use crate::error::DaoError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Resolved config value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
}

/// Scoped key/value backend
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Value stored for `key` directly in `scope`
    async fn lookup(&self, scope: &str, key: &str) -> anyhow::Result<Option<Value>>;

    /// The scope one level above `scope`, if any
    async fn parent_scope(&self, scope: &str) -> anyhow::Result<Option<String>>;
}

/// In-memory config source
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    values: HashMap<(String, String), Value>,
    parents: HashMap<String, String>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, scope: &str, key: &str, value: Value) -> Self {
        self.values.insert((scope.to_string(), key.to_string()), value);
        self
    }

    pub fn with_parent(mut self, scope: &str, parent: &str) -> Self {
        self.parents.insert(scope.to_string(), parent.to_string());
        self
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn lookup(&self, scope: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.get(&(scope.to_string(), key.to_string())).cloned())
    }

    async fn parent_scope(&self, scope: &str) -> anyhow::Result<Option<String>> {
        Ok(self.parents.get(scope).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Level {
    Current,
    Parent,
}

/// Run-scoped, caching view over a `ConfigSource`
pub struct ConfigResolver {
    source: Arc<dyn ConfigSource>,
    scope: String,
    cache: RwLock<HashMap<(Level, String), Value>>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ConfigResolver {
    pub fn new(source: Arc<dyn ConfigSource>, scope: impl Into<String>) -> Self {
        Self {
            source,
            scope: scope.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolver over an empty source; every lookup is `ConfigNotFound`
    pub fn empty() -> Self {
        Self::new(Arc::new(StaticConfigSource::new()), "default")
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Look `key` up in the run's own scope
    pub async fn value_by_key(&self, key: &str) -> Result<ConfigEntry, DaoError> {
        if let Some(value) = self.cached(Level::Current, key).await {
            return Ok(ConfigEntry {
                key: key.to_string(),
                value,
            });
        }

        let value = self
            .source
            .lookup(&self.scope, key)
            .await
            .map_err(|e| DaoError::ConfigBackend(e.to_string()))?
            .ok_or_else(|| DaoError::ConfigNotFound(key.to_string()))?;

        self.remember(Level::Current, key, &value).await;
        Ok(ConfigEntry {
            key: key.to_string(),
            value,
        })
    }

    /// Look `key` up exactly one scope above the run's scope
    ///
    /// Does not walk further up the chain when the parent lacks the key.
    pub async fn parent_value_by_key(&self, key: &str) -> Result<ConfigEntry, DaoError> {
        if let Some(value) = self.cached(Level::Parent, key).await {
            return Ok(ConfigEntry {
                key: key.to_string(),
                value,
            });
        }

        let parent = self
            .source
            .parent_scope(&self.scope)
            .await
            .map_err(|e| DaoError::ConfigBackend(e.to_string()))?
            .ok_or_else(|| DaoError::ConfigNotFound(key.to_string()))?;

        let value = self
            .source
            .lookup(&parent, key)
            .await
            .map_err(|e| DaoError::ConfigBackend(e.to_string()))?
            .ok_or_else(|| DaoError::ConfigNotFound(key.to_string()))?;

        self.remember(Level::Parent, key, &value).await;
        Ok(ConfigEntry {
            key: key.to_string(),
            value,
        })
    }

    async fn cached(&self, level: Level, key: &str) -> Option<Value> {
        self.cache.read().await.get(&(level, key.to_string())).cloned()
    }

    async fn remember(&self, level: Level, key: &str, value: &Value) {
        self.cache
            .write()
            .await
            .insert((level, key.to_string()), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> ConfigResolver {
        let source = StaticConfigSource::new()
            .with_value("team", "timeout", json!(30))
            .with_value("org", "region", json!("eu-west-1"))
            .with_value("root", "vendor", json!("acme"))
            .with_parent("team", "org")
            .with_parent("org", "root");
        ConfigResolver::new(Arc::new(source), "team")
    }

    #[tokio::test]
    async fn resolves_current_scope() {
        let entry = resolver().value_by_key("timeout").await.unwrap();
        assert_eq!(entry, ConfigEntry { key: "timeout".into(), value: json!(30) });
    }

    #[tokio::test]
    async fn current_scope_does_not_fall_back() {
        let err = resolver().value_by_key("region").await.unwrap_err();
        assert_eq!(err, DaoError::ConfigNotFound("region".into()));
    }

    #[tokio::test]
    async fn parent_lookup_walks_exactly_one_level() {
        let resolver = resolver();
        assert_eq!(resolver.parent_value_by_key("region").await.unwrap().value, json!("eu-west-1"));

        // "vendor" lives two levels up
        assert_eq!(
            resolver.parent_value_by_key("vendor").await.unwrap_err(),
            DaoError::ConfigNotFound("vendor".into())
        );
    }

    #[tokio::test]
    async fn parent_lookup_without_parent_scope() {
        let resolver = ConfigResolver::new(
            Arc::new(StaticConfigSource::new().with_value("solo", "k", json!(1))),
            "solo",
        );
        assert!(matches!(
            resolver.parent_value_by_key("k").await,
            Err(DaoError::ConfigNotFound(_))
        ));
    }
}
