/// Block dispatch and guarded invocation
///
/// `BlockRegistry` maps each block type to its implementation. `invoke` runs a
/// single invocation on its own tokio task so a timeout can abort it and a
/// panic stays contained. Both outcomes are turned into failure responses.

use crate::context::response::{BlockError, BlockOutput, BlockResponse, DataFlowRecord};
use crate::runtime::{
    block::{Block, BlockContext},
    blocks::{ApiRequestBlock, SchemaBlock, ScriptBlock},
};
use crate::workflow::types::BlockType;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Status used when no implementation is registered for a block's type
pub const NOT_IMPLEMENTED_STATUS: u16 = 501;

/// Block type to implementation lookup
#[derive(Clone, Default)]
pub struct BlockRegistry {
    blocks: HashMap<BlockType, Arc<dyn Block>>,
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.blocks.keys().map(BlockType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("BlockRegistry").field("types", &types).finish()
    }
}

impl BlockRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Script, APIRequest and Schema implementations
    pub fn with_builtins() -> Self {
        Self::new()
            .with(BlockType::Script, ScriptBlock)
            .with(BlockType::ApiRequest, ApiRequestBlock::new())
            .with(BlockType::Schema, SchemaBlock)
    }

    /// Builder form of `register`
    pub fn with(mut self, block_type: BlockType, block: impl Block + 'static) -> Self {
        self.register(block_type, Arc::new(block));
        self
    }

    /// Install or replace the implementation for `block_type`
    pub fn register(&mut self, block_type: BlockType, block: Arc<dyn Block>) {
        if self.blocks.insert(block_type, block).is_some() {
            tracing::debug!("🔁 Replaced block implementation for {}", block_type);
        }
    }

    pub fn resolve(&self, block_type: BlockType) -> Option<Arc<dyn Block>> {
        self.blocks.get(&block_type).cloned()
    }

    pub fn supports(&self, block_type: BlockType) -> bool {
        self.blocks.contains_key(&block_type)
    }
}

/// What one invocation handed back
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub responses: Vec<BlockResponse>,
    pub data_flows: Vec<DataFlowRecord>,
}

/// Run one invocation with timeout and panic containment
///
/// Responses always carry the invoking block's name, whatever the
/// implementation put there.
pub async fn invoke(
    block: Option<Arc<dyn Block>>,
    ctx: BlockContext,
    timeout: Option<Duration>,
) -> InvocationOutcome {
    let name = ctx.block_name().to_string();

    let Some(block) = block else {
        tracing::error!("❌ No implementation registered for block '{}' ({})", name, ctx.config().block_type());
        return InvocationOutcome {
            responses: vec![BlockResponse::failed(
                &name,
                BlockError::new(
                    NOT_IMPLEMENTED_STATUS,
                    format!("No implementation registered for type '{}'", ctx.config().block_type()),
                ),
            )],
            data_flows: vec![],
        };
    };

    let task_ctx = ctx.clone();
    let mut handle = tokio::spawn(async move { block.execute(&task_ctx).await });

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // Aborting the task cannot stop a blocking thread it spawned
                ctx.cancellation().cancel();
                handle.abort();
                tracing::warn!("⏰ Block '{}' timed out after {:?}", name, limit);
                return InvocationOutcome {
                    responses: vec![BlockResponse::failed(&name, BlockError::timeout(&name, limit))],
                    data_flows: ctx.take_data_flows(),
                };
            }
        },
        None => handle.await,
    };

    let responses = match output {
        Ok(output) => normalize(&name, output),
        Err(join_error) => {
            tracing::error!("💥 Block '{}' panicked: {}", name, join_error);
            vec![BlockResponse::failed(
                &name,
                BlockError::internal(format!("Block '{}' aborted: {}", name, join_error)),
            )]
        }
    };

    InvocationOutcome {
        responses,
        data_flows: ctx.take_data_flows(),
    }
}

fn normalize(name: &str, output: BlockOutput) -> Vec<BlockResponse> {
    output
        .into_responses()
        .into_iter()
        .map(|mut response| {
            if response.block_name != name {
                response.block_name = name.to_string();
            }
            response
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{config::ConfigResolver, response::SuccessRange, store::ContextStore};
    use crate::runtime::block::FnBlock;
    use crate::workflow::types::{ApiRequest, BlockConfig, BlockKind, ExecutionStrategy, ScriptParams};
    use serde_json::json;

    fn context(name: &str) -> BlockContext {
        let config = Arc::new(BlockConfig {
            name: name.into(),
            kind: BlockKind::Script(ScriptParams { script: String::new() }),
            source: true,
            strategy: ExecutionStrategy::default(),
            relations: vec![],
            depends_on: vec![],
            terminal: false,
            timeout: None,
            input_path: None,
        });
        let store = ContextStore::new(
            ApiRequest::default(),
            SuccessRange::default(),
            Arc::new(ConfigResolver::empty()),
        );
        BlockContext::new(config, json!(null), vec![], store.dao())
    }

    #[test]
    fn builtins_are_registered() {
        let registry = BlockRegistry::with_builtins();
        assert!(registry.supports(BlockType::Script));
        assert!(registry.supports(BlockType::ApiRequest));
        assert!(registry.supports(BlockType::Schema));
        assert!(!registry.supports(BlockType::Kafka));
    }

    #[tokio::test]
    async fn timeout_becomes_504() {
        let slow: Arc<dyn Block> = Arc::new(FnBlock::new(|ctx: BlockContext| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            BlockOutput::from(ctx.respond(json!("late")))
        }));

        let ctx = context("slow");
        let outcome = invoke(Some(slow), ctx.clone(), Some(Duration::from_millis(20))).await;
        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(outcome.responses[0].status, 504);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn finished_invocation_is_not_cancelled() {
        let quick: Arc<dyn Block> = Arc::new(FnBlock::new(|ctx: BlockContext| async move {
            BlockOutput::from(ctx.respond(json!("fast")))
        }));

        let ctx = context("quick");
        let outcome = invoke(Some(quick), ctx.clone(), Some(Duration::from_secs(5))).await;
        assert_eq!(outcome.responses[0].status, 200);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn panic_becomes_500() {
        let broken: Arc<dyn Block> = Arc::new(FnBlock::new(|ctx: BlockContext| async move {
            if ctx.scalar_input().is_null() {
                panic!("boom");
            }
            BlockOutput::from(ctx.respond(json!(null)))
        }));

        let outcome = invoke(Some(broken), context("broken"), None).await;
        assert_eq!(outcome.responses[0].status, 500);
        assert!(outcome.responses[0].error.is_some());
    }

    #[tokio::test]
    async fn missing_implementation_becomes_501() {
        let outcome = invoke(None, context("ghost"), None).await;
        assert_eq!(outcome.responses[0].status, NOT_IMPLEMENTED_STATUS);
    }

    #[tokio::test]
    async fn responses_are_renamed_to_the_invoking_block() {
        let block: Arc<dyn Block> = Arc::new(FnBlock::new(|_ctx: BlockContext| async move {
            BlockOutput::Bulk(vec![
                BlockResponse::ok("whatever", json!(1)),
                BlockResponse::ok("", json!(2)),
            ])
        }));

        let outcome = invoke(Some(block), context("named"), None).await;
        assert!(outcome.responses.iter().all(|r| r.block_name == "named"));
    }
}
