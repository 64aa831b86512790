/// The Block contract
///
/// Every block type implements `Block::execute`. The engine hands each
/// invocation a `BlockContext` holding its upstream data and a DAO over the
/// snapshot taken when the invocation started. Blocks never write the Context
/// Store; they return responses and register data flows on the context, and the
/// engine commits both once the invocation is over.

use crate::context::{
    dao::Dao,
    response::{BlockError, BlockOutput, BlockResponse, DataFlowRecord},
};
use crate::workflow::types::{ApiRequest, BlockConfig, BlockKind};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};
use tokio_util::sync::CancellationToken;

/// Polymorphic unit of work
#[async_trait]
pub trait Block: Send + Sync {
    /// Run one invocation. Failures are reported as responses with a populated
    /// `error`, never as panics.
    async fn execute(&self, ctx: &BlockContext) -> BlockOutput;
}

/// Read-only input view of a single invocation
///
/// Cloning is cheap; clones share the data-flow buffer and the cancellation
/// token.
#[derive(Debug, Clone)]
pub struct BlockContext {
    config: Arc<BlockConfig>,
    scalar_input: Value,
    block_responses: Vec<BlockResponse>,
    dao: Dao,
    element_index: Option<usize>,
    data_flows: Arc<Mutex<Vec<DataFlowRecord>>>,
    cancel: CancellationToken,
}

impl BlockContext {
    pub fn new(
        config: Arc<BlockConfig>,
        scalar_input: Value,
        block_responses: Vec<BlockResponse>,
        dao: Dao,
    ) -> Self {
        Self {
            config,
            scalar_input,
            block_responses,
            dao,
            element_index: None,
            data_flows: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Mark the context as one element of a bulk invocation
    pub fn for_element(mut self, index: usize) -> Self {
        self.element_index = Some(index);
        self
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    pub fn block_name(&self) -> &str {
        &self.config.name
    }

    pub fn params(&self) -> &BlockKind {
        &self.config.kind
    }

    pub fn scalar_input(&self) -> &Value {
        &self.scalar_input
    }

    /// Responses of the upstream block(s) that routed here
    pub fn block_responses(&self) -> &[BlockResponse] {
        &self.block_responses
    }

    pub fn api_request(&self) -> &ApiRequest {
        self.dao.api_request()
    }

    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    /// Position in the bulk collection, `None` for scalar invocations
    pub fn element_index(&self) -> Option<usize> {
        self.element_index
    }

    /// Fired when the invocation is abandoned, e.g. on timeout
    ///
    /// Work that outlives task abortion (blocking threads) should poll it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Correlate an external or asynchronous operation with this run
    pub fn register_data_flow(&self, record: DataFlowRecord) {
        tracing::debug!("🔗 Block '{}' registered data flow '{}'", self.block_name(), record.flow_id);
        self.data_flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Drain the data flows registered so far
    pub fn take_data_flows(&self) -> Vec<DataFlowRecord> {
        std::mem::take(&mut *self.data_flows.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Successful 200 response named after this block
    pub fn respond(&self, body: Value) -> BlockResponse {
        BlockResponse::ok(self.block_name(), body)
    }

    /// Failed response named after this block
    pub fn fail(&self, code: u16, message: impl Into<String>) -> BlockResponse {
        BlockResponse::failed(self.block_name(), BlockError::new(code, message))
    }
}

/// Closure-backed block
///
/// ```ignore
/// let echo = FnBlock::new(|ctx: BlockContext| async move {
///     BlockOutput::from(ctx.respond(ctx.scalar_input().clone()))
/// });
/// ```
pub struct FnBlock<F> {
    f: F,
}

impl<F, Fut> FnBlock<F>
where
    F: Fn(BlockContext) -> Fut + Send + Sync,
    Fut: Future<Output = BlockOutput> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Block for FnBlock<F>
where
    F: Fn(BlockContext) -> Fut + Send + Sync,
    Fut: Future<Output = BlockOutput> + Send,
{
    async fn execute(&self, ctx: &BlockContext) -> BlockOutput {
        (self.f)(ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{config::ConfigResolver, response::SuccessRange, store::ContextStore};
    use crate::workflow::types::{ExecutionStrategy, ScriptParams};
    use serde_json::json;

    fn context() -> BlockContext {
        let config = Arc::new(BlockConfig {
            name: "enrich".into(),
            kind: BlockKind::Script(ScriptParams { script: "return input".into() }),
            source: true,
            strategy: ExecutionStrategy::default(),
            relations: vec![],
            depends_on: vec![],
            terminal: false,
            timeout: None,
            input_path: None,
        });
        let store = ContextStore::new(
            ApiRequest::from_body(json!({ "id": 9 })),
            SuccessRange::default(),
            Arc::new(ConfigResolver::empty()),
        );
        BlockContext::new(config, json!({ "id": 9 }), vec![], store.dao())
    }

    #[tokio::test]
    async fn fn_block_sees_context() {
        let block = FnBlock::new(|ctx: BlockContext| async move {
            let id = ctx.api_request().body["id"].clone();
            BlockOutput::from(ctx.respond(json!({ "seen": id, "index": ctx.element_index() })))
        });

        let ctx = context().for_element(2);
        let output = block.execute(&ctx).await;
        let responses = output.into_responses();
        assert_eq!(responses[0].block_name, "enrich");
        assert_eq!(responses[0].body, json!({ "seen": 9, "index": 2 }));
    }

    #[tokio::test]
    async fn data_flows_survive_clones() {
        let block = FnBlock::new(|ctx: BlockContext| async move {
            ctx.register_data_flow(DataFlowRecord::completed("call-1", json!({})));
            BlockOutput::from(ctx.fail(409, "conflict"))
        });

        let ctx = context();
        let responses = block.execute(&ctx).await.into_responses();
        assert_eq!(responses[0].status, 409);

        let flows = ctx.take_data_flows();
        assert_eq!(flows.len(), 1);
        assert!(ctx.take_data_flows().is_empty());
    }
}
