/// Schema block: validates the scalar input against a JSON Schema
///
/// Expected params: { "schema": { "type": "object", "required": ["id"] } }
/// On success the input passes through unchanged as the response body.

use crate::context::response::BlockOutput;
use crate::runtime::block::{Block, BlockContext};
use crate::workflow::types::BlockKind;
use async_trait::async_trait;
use serde_json::Value;

/// Status of a failed validation
pub const VALIDATION_FAILED_STATUS: u16 = 422;

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaBlock;

/// Check that `schema` compiles; used when a DAG is loaded
pub fn compile_check(schema: &Value) -> Result<(), String> {
    jsonschema::validator_for(schema)
        .map(|_| ())
        .map_err(|e| format!("invalid JSON Schema: {}", e))
}

#[async_trait]
impl Block for SchemaBlock {
    async fn execute(&self, ctx: &BlockContext) -> BlockOutput {
        let BlockKind::Schema(params) = ctx.params() else {
            return ctx.fail(500, "Schema block invoked with foreign params").into();
        };

        let validator = match jsonschema::validator_for(&params.schema) {
            Ok(validator) => validator,
            Err(e) => return ctx.fail(500, format!("Invalid schema: {}", e)).into(),
        };

        let input = ctx.scalar_input();
        let messages: Vec<String> = validator
            .iter_errors(input)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if messages.is_empty() {
            tracing::debug!("✅ Schema validation passed for '{}'", ctx.block_name());
            ctx.respond(input.clone()).into()
        } else {
            tracing::debug!(
                "🚫 Schema validation failed for '{}' with {} error(s)",
                ctx.block_name(),
                messages.len()
            );
            ctx.fail(VALIDATION_FAILED_STATUS, messages.join("; ")).into()
        }
    }
}
