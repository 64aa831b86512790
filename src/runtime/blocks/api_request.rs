/// APIRequest block: outbound HTTP call
///
/// Expected params: { "url": "https://api.example.com/orders", "method": "POST",
///                    "headers": { "x-api-key": "..." }, "bodyPath": "$.order",
///                    "trackFlow": true }
///
/// POST, PUT and PATCH send the scalar input (or the `bodyPath` selection of it)
/// as a JSON body. A non-2xx answer fails the invocation with the upstream
/// status as error code; a transport failure fails it with 502.

use crate::context::response::{BlockError, BlockOutput, BlockResponse, DataFlowRecord};
use crate::runtime::{
    block::{Block, BlockContext},
    blocks::select_path,
};
use crate::workflow::types::{ApiRequestParams, BlockKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

/// Status used when the remote end could not be reached
pub const BAD_GATEWAY_STATUS: u16 = 502;

#[derive(Debug, Clone, Default)]
pub struct ApiRequestBlock {
    client: reqwest::Client,
}

impl ApiRequestBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn call(&self, ctx: &BlockContext, params: &ApiRequestParams) -> BlockResponse {
        let method = match reqwest::Method::from_bytes(params.method.to_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return ctx.fail(400, format!("Unsupported HTTP method: {}", params.method));
            }
        };

        tracing::debug!("🌍 HTTP Request: {} {}", method, params.url);
        let mut request = self.client.request(method.clone(), &params.url);
        for (key, value) in &params.headers {
            request = request.header(key, value);
        }

        if matches!(method, reqwest::Method::POST | reqwest::Method::PUT | reqwest::Method::PATCH) {
            let body = match &params.body_path {
                Some(path) => match select_path(ctx.scalar_input(), path) {
                    Ok(body) => body,
                    Err(e) => return ctx.fail(400, e),
                },
                None => ctx.scalar_input().clone(),
            };
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("📡 HTTP request from '{}' failed: {}", ctx.block_name(), e);
                return ctx.fail(BAD_GATEWAY_STATUS, format!("HTTP request failed: {}", e));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return ctx.fail(BAD_GATEWAY_STATUS, format!("Failed to read response body: {}", e));
            }
        };
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, params.url, status);

        if status.is_success() {
            BlockResponse::with_status(ctx.block_name(), status.as_u16(), data)
        } else {
            BlockResponse::failed(
                ctx.block_name(),
                BlockError::new(status.as_u16(), format!("{} {} answered {}", method, params.url, status)),
            )
            .with_body(data)
        }
    }
}

#[async_trait]
impl Block for ApiRequestBlock {
    async fn execute(&self, ctx: &BlockContext) -> BlockOutput {
        let BlockKind::ApiRequest(params) = ctx.params() else {
            return ctx.fail(500, "APIRequest block invoked with foreign params").into();
        };

        let response = self.call(ctx, params).await;

        if params.track_flow {
            let flow_id = format!("{}:{}", ctx.block_name(), Uuid::new_v4());
            let data = json!({
                "method": params.method,
                "url": params.url,
                "status": response.status,
                "body": response.body,
            });
            let record = match &response.error {
                Some(error) => DataFlowRecord::failed(flow_id, data, error.clone()),
                None => DataFlowRecord::completed(flow_id, data),
            };
            ctx.register_data_flow(record);
        }

        response.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{config::ConfigResolver, response::SuccessRange, store::ContextStore};
    use crate::workflow::types::{ApiRequest, BlockConfig, ExecutionStrategy};
    use std::{collections::HashMap, sync::Arc};

    fn context(params: ApiRequestParams) -> BlockContext {
        let config = Arc::new(BlockConfig {
            name: "call".into(),
            kind: BlockKind::ApiRequest(params),
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
        BlockContext::new(config, json!({ "order": { "id": 1 } }), vec![], store.dao())
    }

    fn params(url: &str, method: &str) -> ApiRequestParams {
        ApiRequestParams {
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            body_path: None,
            track_flow: true,
        }
    }

    #[tokio::test]
    async fn unsupported_method_is_400() {
        let ctx = context(params("http://127.0.0.1:9", "NOT A METHOD"));
        let responses = ApiRequestBlock::new().execute(&ctx).await.into_responses();
        assert_eq!(responses[0].status, 400);
    }

    #[tokio::test]
    async fn unreachable_host_is_502_and_tracked() {
        // Port 9 (discard) is not expected to accept connections
        let ctx = context(params("http://127.0.0.1:9/orders", "POST"));
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap();
        let responses = ApiRequestBlock::with_client(client)
            .execute(&ctx)
            .await
            .into_responses();
        assert_eq!(responses[0].status, BAD_GATEWAY_STATUS);

        let flows = ctx.take_data_flows();
        assert_eq!(flows.len(), 1);
        assert!(flows[0].flow_id.starts_with("call:"));
        assert!(flows[0].has_error());
    }
}
