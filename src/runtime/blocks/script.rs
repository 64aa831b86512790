/// Script block: sandboxed Lua 5.4
///
/// Expected params: { "script": "return { doubled = input.n * 2 }" }
///
/// Globals available to the script:
/// - `input`: the scalar input
/// - `responses`: upstream block responses
/// - `request`: the run's API request
/// - `index`: bulk element index (nil for scalar invocations)
/// - `block_out(name)`, `body(name)`, `status(name)`, `input_of(name)`,
///   `is_success(name)`, `has_error(name)`, `visited(name)`: DAO reads
/// - `flow_body(id)`, `latest_flow()`: data-flow reads
/// - `fail(code, message)`: mark the invocation failed
/// - `flow(id, data, failed)`: register a data flow
///
/// DAO failures raise Lua errors so a script can `pcall` them. The returned
/// value becomes the response body.

use crate::context::{
    dao::Dao,
    response::{BlockError, BlockOutput, BlockResponse, DataFlowRecord},
};
use crate::runtime::block::{Block, BlockContext};
use crate::workflow::types::BlockKind;
use async_trait::async_trait;
use mlua::{Lua, LuaSerdeExt};
use serde_json::Value;
use std::{cell::RefCell, rc::Rc};

/// Status of a script that raised an error
pub const SCRIPT_ERROR_STATUS: u16 = 500;

const CANCEL_CHECK_INSTRUCTIONS: u32 = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptBlock;

#[async_trait]
impl Block for ScriptBlock {
    async fn execute(&self, ctx: &BlockContext) -> BlockOutput {
        let BlockKind::Script(params) = ctx.params() else {
            return ctx.fail(500, "Script block invoked with foreign params").into();
        };

        tracing::debug!("🧠 Executing Lua script for '{}'", ctx.block_name());
        let script = params.script.clone();
        let task_ctx = ctx.clone();

        // Lua state and errors are not Send; both stay on the blocking thread
        let joined = tokio::task::spawn_blocking(move || {
            run_script(&task_ctx, &script).map_err(|e| e.to_string())
        })
        .await;

        match joined {
            Ok(Ok(response)) => response.into(),
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Lua script in '{}' failed: {}", ctx.block_name(), e);
                ctx.fail(SCRIPT_ERROR_STATUS, format!("Lua script failed: {}", e))
                    .into()
            }
            Err(e) => ctx
                .fail(SCRIPT_ERROR_STATUS, format!("Lua worker aborted: {}", e))
                .into(),
        }
    }
}

fn run_script(ctx: &BlockContext, script: &str) -> mlua::Result<BlockResponse> {
    let lua = Lua::new();
    let globals = lua.globals();

    // Remove dangerous globals
    for name in ["os", "io", "debug", "package", "require", "dofile", "loadfile", "load"] {
        globals.set(name, mlua::Nil)?;
    }

    globals.set("input", lua.to_value(ctx.scalar_input())?)?;
    globals.set("responses", lua.to_value(ctx.block_responses())?)?;
    globals.set("request", lua.to_value(ctx.api_request())?)?;
    globals.set("index", ctx.element_index())?;

    install_dao(&lua, ctx.dao())?;

    // Abandoned invocations stop at the next instruction batch
    let cancel = ctx.cancellation().clone();
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(CANCEL_CHECK_INSTRUCTIONS),
        move |_, _| {
            if cancel.is_cancelled() {
                Err(mlua::Error::runtime("script cancelled"))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    )?;

    let failure: Rc<RefCell<Option<BlockError>>> = Rc::new(RefCell::new(None));
    let fail_slot = Rc::clone(&failure);
    globals.set(
        "fail",
        lua.create_function(move |_, (code, message): (u16, String)| {
            *fail_slot.borrow_mut() = Some(BlockError::new(code, message));
            Ok(())
        })?,
    )?;

    let flow_ctx = ctx.clone();
    globals.set(
        "flow",
        lua.create_function(
            move |_, (id, data, failed): (String, mlua::Value, Option<bool>)| {
                let data = lua_to_json(data)?;
                let record = if failed.unwrap_or(false) {
                    DataFlowRecord::failed(
                        id,
                        data,
                        BlockError::new(SCRIPT_ERROR_STATUS, "flow reported failure by script"),
                    )
                } else {
                    DataFlowRecord::completed(id, data)
                };
                flow_ctx.register_data_flow(record);
                Ok(())
            },
        )?,
    )?;

    let result: mlua::Value = lua.load(script).eval()?;
    let body = lua_to_json(result)?;

    let failure = failure.borrow_mut().take();
    Ok(match failure {
        Some(error) => BlockResponse::failed(ctx.block_name(), error).with_body(body),
        None => ctx.respond(body),
    })
}

fn install_dao(lua: &Lua, dao: &Dao) -> mlua::Result<()> {
    let globals = lua.globals();

    let d = dao.clone();
    globals.set(
        "block_out",
        lua.create_function(move |lua, name: String| {
            let out = d.get_block_out(&name).map_err(mlua::Error::external)?;
            lua.to_value(&out)
        })?,
    )?;

    let d = dao.clone();
    globals.set(
        "body",
        lua.create_function(move |lua, name: String| {
            let entry = d.get_body(&name).map_err(mlua::Error::external)?;
            lua.to_value(&entry.neo_body)
        })?,
    )?;

    let d = dao.clone();
    globals.set(
        "status",
        lua.create_function(move |_, name: String| d.get_status(&name).map_err(mlua::Error::external))?,
    )?;

    let d = dao.clone();
    globals.set(
        "input_of",
        lua.create_function(move |lua, name: Option<String>| {
            let input = d.get_out(name.as_deref()).map_err(mlua::Error::external)?;
            lua.to_value(&input)
        })?,
    )?;

    let d = dao.clone();
    globals.set(
        "is_success",
        lua.create_function(move |_, name: String| Ok(d.is_success(&name)))?,
    )?;

    let d = dao.clone();
    globals.set(
        "has_error",
        lua.create_function(move |_, name: String| Ok(d.has_error(&name)))?,
    )?;

    let d = dao.clone();
    globals.set(
        "visited",
        lua.create_function(move |_, name: String| Ok(d.has_block_been_visited(&name)))?,
    )?;

    let d = dao.clone();
    globals.set(
        "flow_body",
        lua.create_function(move |lua, id: String| {
            let data = d.get_data_flow_body(&id).map_err(mlua::Error::external)?;
            lua.to_value(&data)
        })?,
    )?;

    let d = dao.clone();
    globals.set(
        "latest_flow",
        lua.create_function(move |lua, ()| {
            let record = d.get_latest_data_flow_out().map_err(mlua::Error::external)?;
            lua.to_value(&record)
        })?,
    )?;

    Ok(())
}

/// Convert a Lua value to JSON
///
/// Tables with keys 1..n are arrays, everything else an object. Functions and
/// userdata become null.
fn lua_to_json(lua_value: mlua::Value) -> mlua::Result<Value> {
    match lua_value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::LightUserData(ud) if ud.0.is_null() => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Number(serde_json::Number::from(i))),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        mlua::Value::Table(table) => {
            let mut is_array = true;
            let mut max_index = 0;
            let mut count = 0;

            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut arr = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    arr.push(lua_to_json(table.get(i)?)?);
                }
                Ok(Value::Array(arr))
            } else {
                let mut obj = serde_json::Map::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, value) = pair?;
                    let key = match key {
                        mlua::Value::String(s) => s.to_str()?.to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    obj.insert(key, lua_to_json(value)?);
                }
                Ok(Value::Object(obj))
            }
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        config::ConfigResolver,
        response::SuccessRange,
        store::{Commit, ContextStore},
    };
    use crate::workflow::types::{ApiRequest, BlockConfig, ExecutionStrategy, ScriptParams};
    use serde_json::json;
    use std::sync::Arc;

    fn context_with(store: &ContextStore, script: &str, input: Value) -> BlockContext {
        let config = Arc::new(BlockConfig {
            name: "calc".into(),
            kind: BlockKind::Script(ScriptParams { script: script.into() }),
            source: false,
            strategy: ExecutionStrategy::default(),
            relations: vec![],
            depends_on: vec![],
            terminal: false,
            timeout: None,
            input_path: None,
        });
        BlockContext::new(config, input, vec![], store.dao())
    }

    fn store() -> ContextStore {
        ContextStore::new(
            ApiRequest::from_body(json!({ "user": "ada" })),
            SuccessRange::default(),
            Arc::new(ConfigResolver::empty()),
        )
    }

    #[tokio::test]
    async fn returns_table_as_body() {
        let store = store();
        let ctx = context_with(&store, "return { doubled = input.n * 2, tags = { 'a', 'b' } }", json!({ "n": 21 }));
        let responses = ScriptBlock.execute(&ctx).await.into_responses();
        assert_eq!(responses[0].status, 200);
        assert_eq!(responses[0].body, json!({ "doubled": 42, "tags": ["a", "b"] }));
    }

    #[tokio::test]
    async fn reads_prior_blocks_through_dao() {
        let store = store();
        store.commit(Commit {
            block: "lookup".into(),
            input: json!(null),
            responses: vec![BlockResponse::ok("lookup", json!({ "score": 7 }))],
            data_flows: vec![],
        });

        let ctx = context_with(
            &store,
            r#"
            local ok, err = pcall(status, "never")
            return {
                score = body("lookup").score,
                visited = visited("lookup"),
                missing_ok = ok,
                user = request.body.user,
            }
            "#,
            json!(null),
        );
        let responses = ScriptBlock.execute(&ctx).await.into_responses();
        assert_eq!(
            responses[0].body,
            json!({ "score": 7, "visited": true, "missing_ok": false, "user": "ada" })
        );
    }

    #[tokio::test]
    async fn fail_and_flow_are_reported() {
        let store = store();
        let ctx = context_with(
            &store,
            r#"
            flow("charge-1", { amount = 10 })
            fail(402, "card declined")
            return { attempted = true }
            "#,
            json!(null),
        );
        let responses = ScriptBlock.execute(&ctx).await.into_responses();
        let error = responses[0].error.clone().unwrap();
        assert_eq!(error, BlockError::new(402, "card declined"));
        assert_eq!(responses[0].body, json!({ "attempted": true }));

        let flows = ctx.take_data_flows();
        assert_eq!(flows[0].flow_id, "charge-1");
        assert_eq!(flows[0].data, json!({ "amount": 10 }));
    }

    #[tokio::test]
    async fn cancelled_script_stops_looping() {
        let store = store();
        let ctx = context_with(&store, "while true do end", json!(null));
        let task_ctx = ctx.clone();
        let running = tokio::spawn(async move { ScriptBlock.execute(&task_ctx).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ctx.cancellation().cancel();

        let output = tokio::time::timeout(std::time::Duration::from_secs(2), running)
            .await
            .expect("script thread should exit once cancelled")
            .unwrap();
        let responses = output.into_responses();
        assert_eq!(responses[0].status, SCRIPT_ERROR_STATUS);
        assert!(responses[0].error.as_ref().unwrap().message.contains("cancelled"));
    }

    #[tokio::test]
    async fn sandbox_hides_os() {
        let store = store();
        let ctx = context_with(&store, "return os.time()", json!(null));
        let responses = ScriptBlock.execute(&ctx).await.into_responses();
        assert_eq!(responses[0].status, SCRIPT_ERROR_STATUS);
    }
}
