/// DAG compilation and the hot-reload DAG registry
///
/// `CompiledDag::compile` turns a `DagDocument` into the immutable, typed form
/// the engine runs, failing closed on the first configuration error. The
/// registry keeps compiled DAGs behind an `ArcSwap`, so updates swap the whole
/// map atomically while runs in flight keep their own `Arc<CompiledDag>`.

use crate::error::ConfigError;
use crate::runtime::{
    blocks::{schema, select_path},
    executor::BlockRegistry,
};
use crate::workflow::{
    storage::DagStorage,
    types::{BlockConfig, BlockKind, DagDocument},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
    visit::Bfs,
};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

/// Validated, immutable DAG ready for execution
#[derive(Debug, Clone)]
pub struct CompiledDag {
    pub id: String,
    pub name: String,
    /// Document the DAG was compiled from
    pub document: DagDocument,
    /// Blocks in declaration order
    blocks: Vec<Arc<BlockConfig>>,
    index: HashMap<String, usize>,
    source: usize,
    /// Static cycles along relations; flagged, not rejected
    pub cycles: Vec<Vec<String>>,
    /// Blocks no relation path from the source reaches
    pub unreachable: Vec<String>,
}

impl CompiledDag {
    /// Validate `document` and build its runtime form
    ///
    /// Checks run in a fixed order and the first violation wins: names, block
    /// types and params, source count, relation targets, dependencies.
    pub fn compile(document: DagDocument, registry: &BlockRegistry) -> Result<Self, ConfigError> {
        tracing::debug!("🏗️ Compiling DAG '{}' with {} blocks", document.id, document.blocks.len());

        let mut index = HashMap::new();
        for (i, block) in document.blocks.iter().enumerate() {
            if block.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if index.insert(block.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateName(block.name.clone()));
            }
        }

        let mut kinds = Vec::with_capacity(document.blocks.len());
        for block in &document.blocks {
            let unresolvable = || ConfigError::UnresolvableBlockType {
                block: block.name.clone(),
                block_type: block.block_type.clone(),
            };
            let invalid = |message: String| ConfigError::InvalidParams {
                block: block.name.clone(),
                block_type: block.block_type.clone(),
                message,
            };

            let kind = BlockKind::from_parts(&block.block_type, &block.params)
                .ok_or_else(unresolvable)?
                .map_err(invalid)?;
            if !registry.supports(kind.block_type()) {
                return Err(unresolvable());
            }
            if let BlockKind::Schema(params) = &kind {
                schema::compile_check(&params.schema).map_err(invalid)?;
            }
            if let Some(path) = &block.input_path {
                select_path(&json!({}), path).map_err(invalid)?;
            }
            kinds.push(kind);
        }

        let sources: Vec<usize> = document
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.source)
            .map(|(i, _)| i)
            .collect();
        let source = match sources.as_slice() {
            [] => return Err(ConfigError::NoSource),
            [only] => *only,
            many => {
                return Err(ConfigError::MultipleSources(
                    many.iter().map(|&i| document.blocks[i].name.clone()).collect(),
                ))
            }
        };

        for block in &document.blocks {
            let mut seen = HashSet::new();
            for relation in &block.relations {
                if !index.contains_key(&relation.target) {
                    return Err(ConfigError::DanglingRelation {
                        block: block.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                }
                if !seen.insert(relation.name.to_ascii_lowercase()) {
                    return Err(ConfigError::DuplicateRelation {
                        block: block.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
            if let Some(dependency) = block.depends_on.iter().find(|d| !index.contains_key(*d)) {
                return Err(ConfigError::DanglingDependency {
                    block: block.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let blocks: Vec<Arc<BlockConfig>> = document
            .blocks
            .iter()
            .zip(kinds)
            .map(|(block, kind)| {
                Arc::new(BlockConfig {
                    name: block.name.clone(),
                    kind,
                    source: block.source,
                    strategy: block.execution_strategy,
                    relations: block.relations.clone(),
                    depends_on: block.depends_on.clone(),
                    terminal: block.terminal,
                    timeout: block.timeout_ms.map(Duration::from_millis),
                    input_path: block.input_path.clone(),
                })
            })
            .collect();

        let (cycles, unreachable) = analyze(&blocks, &index, source);
        for cycle in &cycles {
            tracing::warn!("🔄 DAG '{}' has a relation cycle: {}", document.id, cycle.join(" → "));
        }
        if !unreachable.is_empty() {
            tracing::warn!(
                "🏝️ DAG '{}' has blocks unreachable from the source: {}",
                document.id,
                unreachable.join(", ")
            );
        }

        tracing::debug!("✅ DAG '{}' compiled", document.id);
        Ok(Self {
            id: document.id.clone(),
            name: document.name.clone(),
            document,
            blocks,
            index,
            source,
            cycles,
            unreachable,
        })
    }

    pub fn block(&self, name: &str) -> Option<&Arc<BlockConfig>> {
        self.index.get(name).map(|&i| &self.blocks[i])
    }

    pub fn source(&self) -> &Arc<BlockConfig> {
        &self.blocks[self.source]
    }

    pub fn blocks(&self) -> &[Arc<BlockConfig>] {
        &self.blocks
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// Static relation-graph analysis: cycles and blocks unreachable from source
fn analyze(
    blocks: &[Arc<BlockConfig>],
    index: &HashMap<String, usize>,
    source: usize,
) -> (Vec<Vec<String>>, Vec<String>) {
    let mut graph: DiGraph<&str, &str> = DiGraph::new();
    let nodes: Vec<NodeIndex> = blocks.iter().map(|b| graph.add_node(b.name.as_str())).collect();

    for (i, block) in blocks.iter().enumerate() {
        for relation in &block.relations {
            if let Some(&target) = index.get(&relation.target) {
                graph.add_edge(nodes[i], nodes[target], relation.name.as_str());
            }
        }
    }

    let cycles = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut names: Vec<String> = scc.iter().map(|&n| graph[n].to_string()).collect();
            names.sort();
            names
        })
        .collect();

    let mut reachable = HashSet::new();
    let mut bfs = Bfs::new(&graph, nodes[source]);
    while let Some(node) = bfs.next(&graph) {
        reachable.insert(node);
    }
    let unreachable = nodes
        .iter()
        .filter(|n| !reachable.contains(*n))
        .map(|&n| graph[n].to_string())
        .collect();

    (cycles, unreachable)
}

/// Lock-free registry of compiled DAGs
#[derive(Debug)]
pub struct DagRegistry {
    /// Key: DAG id
    dags: ArcSwap<HashMap<String, Arc<CompiledDag>>>,
    storage: DagStorage,
    blocks: Arc<BlockRegistry>,
}

impl DagRegistry {
    pub fn new(storage: DagStorage, blocks: Arc<BlockRegistry>) -> Self {
        Self {
            dags: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
            blocks,
        }
    }

    pub fn storage(&self) -> &DagStorage {
        &self.storage
    }

    /// Load and compile every stored DAG
    ///
    /// A document that fails to compile is logged and left out; it can never run.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_dags().await?;
        let mut compiled = HashMap::new();

        for (id, document) in stored {
            match CompiledDag::compile(document, &self.blocks) {
                Ok(dag) => {
                    compiled.insert(id, Arc::new(dag));
                }
                Err(e) => tracing::error!("❌ Skipping DAG '{}': {}", id, e),
            }
        }

        self.dags.store(Arc::new(compiled));
        tracing::info!("📚 Initialized DAG registry with {} DAGs", self.dags.load().len());
        Ok(())
    }

    /// Compile without installing
    pub fn compile(&self, document: DagDocument) -> Result<CompiledDag, ConfigError> {
        CompiledDag::compile(document, &self.blocks)
    }

    /// Make a compiled DAG visible to new runs
    pub fn install(&self, dag: CompiledDag) -> Arc<CompiledDag> {
        let dag = Arc::new(dag);
        let id = dag.id.clone();
        self.dags.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(id.clone(), Arc::clone(&dag));
            next
        });
        tracing::info!("🔥 Hot-reloaded DAG: {}", id);
        dag
    }

    /// Re-read one DAG from storage and install it
    pub async fn reload_dag(&self, dag_id: &str) -> Result<Arc<CompiledDag>> {
        let document = self
            .storage
            .get_dag(dag_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("DAG not found: {}", dag_id))?;
        let compiled = self.compile(document)?;
        Ok(self.install(compiled))
    }

    pub fn get_dag(&self, dag_id: &str) -> Option<Arc<CompiledDag>> {
        self.dags.load().get(dag_id).cloned()
    }

    pub fn list_dag_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.dags.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove_dag(&self, dag_id: &str) -> bool {
        let mut removed = false;
        self.dags.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(dag_id).is_some();
            next
        });
        if removed {
            tracing::info!("🗑️ Removed DAG from registry: {}", dag_id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn registry() -> BlockRegistry {
        BlockRegistry::with_builtins()
    }

    fn doc(blocks: Value) -> DagDocument {
        serde_json::from_value(json!({ "id": "dag-1", "name": "test", "blocks": blocks })).unwrap()
    }

    fn script(name: &str) -> Value {
        json!({ "name": name, "type": "Script", "params": { "script": "return input" } })
    }

    fn compile(blocks: Value) -> Result<CompiledDag, ConfigError> {
        CompiledDag::compile(doc(blocks), &registry())
    }

    #[test]
    fn compiles_valid_dag() {
        let dag = compile(json!([
            { "name": "A", "type": "Schema", "source": true, "params": { "schema": {} },
              "relations": [{ "name": "success", "target": "B" }] },
            script("B"),
        ]))
        .unwrap();

        assert_eq!(dag.source().name, "A");
        assert!(dag.block("B").is_some());
        assert!(!dag.has_cycles());
        assert!(dag.unreachable.is_empty());
    }

    #[test]
    fn duplicate_names_fail() {
        let mut x = script("X");
        x["source"] = json!(true);
        assert_eq!(
            compile(json!([x, script("X")])).unwrap_err(),
            ConfigError::DuplicateName("X".into())
        );
    }

    #[test]
    fn empty_name_fails() {
        assert_eq!(compile(json!([script(" ")])).unwrap_err(), ConfigError::EmptyName);
    }

    #[test]
    fn source_count_is_enforced() {
        assert_eq!(compile(json!([script("A")])).unwrap_err(), ConfigError::NoSource);

        let mut a = script("A");
        let mut b = script("B");
        a["source"] = json!(true);
        b["source"] = json!(true);
        assert_eq!(
            compile(json!([a, b])).unwrap_err(),
            ConfigError::MultipleSources(vec!["A".into(), "B".into()])
        );
    }

    #[test]
    fn dangling_and_duplicate_relations_fail() {
        let mut a = script("A");
        a["source"] = json!(true);
        a["relations"] = json!([{ "name": "success", "target": "Z" }]);
        assert!(matches!(
            compile(json!([a.clone()])).unwrap_err(),
            ConfigError::DanglingRelation { target, .. } if target == "Z"
        ));

        a["relations"] = json!([
            { "name": "success", "target": "B" },
            { "name": "success", "target": "B" },
        ]);
        assert!(matches!(
            compile(json!([a.clone(), script("B")])).unwrap_err(),
            ConfigError::DuplicateRelation { .. }
        ));

        // One target per relation name, even across distinct targets
        a["relations"] = json!([
            { "name": "success", "target": "B" },
            { "name": "success", "target": "C" },
        ]);
        assert!(matches!(
            compile(json!([a.clone(), script("B"), script("C")])).unwrap_err(),
            ConfigError::DuplicateRelation { relation, target, .. } if relation == "success" && target == "C"
        ));

        a["relations"] = json!([
            { "name": "failure", "target": "B" },
            { "name": "FAILURE", "target": "C" },
        ]);
        assert!(matches!(
            compile(json!([a.clone(), script("B"), script("C")])).unwrap_err(),
            ConfigError::DuplicateRelation { .. }
        ));

        a["relations"] = json!([
            { "name": "success", "target": "B" },
            { "name": "always", "target": "C" },
        ]);
        assert!(compile(json!([a, script("B"), script("C")])).is_ok());
    }

    #[test]
    fn type_errors() {
        let mut a = script("A");
        a["source"] = json!(true);
        a["type"] = json!("Teleport");
        assert!(matches!(
            compile(json!([a.clone()])).unwrap_err(),
            ConfigError::UnresolvableBlockType { block_type, .. } if block_type == "Teleport"
        ));

        // Known type without a registered implementation
        a["type"] = json!("Kafka");
        a["params"] = json!({ "topic": "orders" });
        assert!(matches!(
            compile(json!([a.clone()])).unwrap_err(),
            ConfigError::UnresolvableBlockType { .. }
        ));

        a["type"] = json!("Schema");
        a["params"] = json!({ "schema": { "type": 12 } });
        assert!(matches!(
            compile(json!([a])).unwrap_err(),
            ConfigError::InvalidParams { .. }
        ));
    }

    #[test]
    fn dangling_dependency_fails() {
        let mut a = script("A");
        a["source"] = json!(true);
        a["dependsOn"] = json!(["ghost"]);
        assert!(matches!(
            compile(json!([a])).unwrap_err(),
            ConfigError::DanglingDependency { dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn cycles_and_islands_are_flagged_not_rejected() {
        let mut a = script("A");
        a["source"] = json!(true);
        a["relations"] = json!([{ "name": "success", "target": "A" }]);
        let dag = compile(json!([a, script("island")])).unwrap();
        assert_eq!(dag.cycles, vec![vec!["A".to_string()]]);
        assert_eq!(dag.unreachable, vec!["island".to_string()]);
    }

    #[tokio::test]
    async fn registry_loads_reloads_and_removes() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = DagStorage::new(pool);
        storage.init_schema().await.unwrap();

        let mut a = script("A");
        a["source"] = json!(true);
        storage.save_dag(&doc(json!([a.clone()]))).await.unwrap();
        let mut broken = doc(json!([script("A")]));
        broken.id = "broken".into();
        storage.save_dag(&broken).await.unwrap();

        let registry = DagRegistry::new(storage, Arc::new(registry()));
        registry.init_from_storage().await.unwrap();
        assert_eq!(registry.list_dag_ids(), vec!["dag-1".to_string()]);

        let mut renamed = doc(json!([a]));
        renamed.name = "renamed".into();
        registry.storage().save_dag(&renamed).await.unwrap();
        let reloaded = registry.reload_dag("dag-1").await.unwrap();
        assert_eq!(reloaded.name, "renamed");
        assert_eq!(registry.get_dag("dag-1").unwrap().name, "renamed");
        assert!(registry.reload_dag("broken").await.is_err());

        assert!(registry.remove_dag("dag-1"));
        assert!(!registry.remove_dag("dag-1"));
        assert!(registry.get_dag("dag-1").is_none());
    }
}
