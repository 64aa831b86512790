/// Run trigger endpoints
///
/// `/run/{dag_id}` and `/run/{dag_id}/{*path}` accept any method. Headers,
/// query string, path captures and the JSON body become the run's `apiRequest`;
/// the response is the run summary with per-block status histories.

use crate::api::AppState;
use crate::workflow::types::ApiRequest;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::any,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Create run trigger routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/run/{dag_id}", any(run_dag))
        .route("/run/{dag_id}/{*path}", any(run_dag))
}

/// Lower-cased header map; non-UTF-8 values are skipped
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Empty body is `null`, anything else must be JSON
fn parse_body(body: &str) -> Result<Value, serde_json::Error> {
    if body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str(body)
    }
}

/// Execute a DAG for an incoming request
async fn run_dag(
    State(state): State<AppState>,
    Path(mut captures): Path<HashMap<String, String>>,
    Query(query_params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let dag_id = captures.remove("dag_id").unwrap_or_default();
    tracing::info!("🎯 Run triggered for DAG: {}", dag_id);

    let dag = state.registry.get_dag(&dag_id).ok_or_else(|| {
        tracing::warn!("DAG not found: {}", dag_id);
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("DAG '{}' not found", dag_id) })),
        )
    })?;

    let body = parse_body(&body).map_err(|e| {
        tracing::warn!("Invalid JSON payload for DAG {}: {}", dag_id, e);
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid JSON body: {}", e) })),
        )
    })?;

    let request = ApiRequest {
        headers: collect_headers(&headers),
        query_params,
        path_params: captures,
        body,
    };

    let report = state
        .engine
        .execute_to_completion(&dag, request, state.resolver())
        .await;

    tracing::info!(
        "✅ Run {} of DAG {} finished: {} block(s) visited",
        report.run_id,
        dag_id,
        report.visited_blocks().len()
    );
    Ok(Json(report.summary()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn empty_body_is_null() {
        assert_eq!(parse_body("").unwrap(), Value::Null);
        assert_eq!(parse_body("  \n").unwrap(), Value::Null);
        assert_eq!(parse_body(r#"{"a":1}"#).unwrap(), json!({ "a": 1 }));
        assert!(parse_body("{not json").is_err());
    }

    #[test]
    fn headers_are_lower_cased() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Trace-Id", HeaderValue::from_static("abc"));
        let collected = collect_headers(&headers);
        assert_eq!(collected.get("x-trace-id").map(String::as_str), Some("abc"));
    }
}
