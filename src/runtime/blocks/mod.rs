/// Built-in block implementations
///
/// Script, APIRequest and Schema ship with the engine. Every other block type
/// is provided by the embedding application through `BlockRegistry::register`.

pub mod api_request;
pub mod schema;
pub mod script;

pub use api_request::ApiRequestBlock;
pub use schema::SchemaBlock;
pub use script::ScriptBlock;

use serde_json::Value;

/// Apply a JSONPath to `data`
///
/// No match yields `null`, one match the value itself, several an array.
pub fn select_path(data: &Value, path: &str) -> Result<Value, String> {
    let mut matches = jsonpath_lib::select(data, path)
        .map_err(|e| format!("invalid JSONPath '{}': {:?}", path, e))?;

    Ok(match matches.len() {
        0 => Value::Null,
        1 => matches.remove(0).clone(),
        _ => Value::Array(matches.into_iter().cloned().collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_path_shapes() {
        let data = json!({ "order": { "id": 7, "lines": [{ "sku": "a" }, { "sku": "b" }] } });
        assert_eq!(select_path(&data, "$.order.id").unwrap(), json!(7));
        assert_eq!(select_path(&data, "$.order.lines[*].sku").unwrap(), json!(["a", "b"]));
        assert_eq!(select_path(&data, "$.missing").unwrap(), Value::Null);
    }
}
