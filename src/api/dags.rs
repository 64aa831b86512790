/// DAG management REST API endpoints
///
/// Documents are compiled before they are stored: a DAG that would fail to
/// load is answered with 422 and never reaches storage or the registry.

use crate::api::AppState;
use crate::workflow::types::DagDocument;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error reply: status plus a JSON `{ "error": ... }` body
type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Response for DAG creation/update operations
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DagResponse {
    pub id: String,
    pub message: String,
    /// Static relation cycles found while compiling
    pub cycles: Vec<Vec<String>>,
    /// Blocks unreachable from the source
    pub unreachable: Vec<String>,
}

/// Request body for DAG creation and update
#[derive(Debug, Deserialize)]
pub struct DagRequest {
    pub dag: DagDocument,
}

/// Create DAG management routes
pub fn create_dag_routes() -> Router<AppState> {
    Router::new()
        .route("/api/dags", get(list_dags).post(create_dag))
        .route("/api/dags/{id}", get(get_dag).put(update_dag).delete(delete_dag))
}

/// Compile, persist and install a document
async fn store_and_install(state: &AppState, document: DagDocument) -> Result<DagResponse, ApiError> {
    let compiled = state.registry.compile(document.clone()).map_err(|e| {
        tracing::warn!("🚫 Rejected DAG '{}': {}", document.id, e);
        api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
    })?;

    if let Err(e) = state.registry.storage().save_dag(&document).await {
        tracing::error!("Failed to save DAG {}: {}", document.id, e);
        return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save DAG"));
    }

    let dag = state.registry.install(compiled);
    Ok(DagResponse {
        id: dag.id.clone(),
        message: String::new(),
        cycles: dag.cycles.clone(),
        unreachable: dag.unreachable.clone(),
    })
}

/// Create a new DAG
///
/// POST /api/dags
/// Body: { "dag": { "id": "...", "name": "...", "blocks": [...] } }
async fn create_dag(
    State(state): State<AppState>,
    Json(payload): Json<DagRequest>,
) -> Result<Json<DagResponse>, ApiError> {
    let document = payload.dag;

    if document.id.is_empty() || document.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "DAG id and name are required"));
    }

    match state.registry.storage().get_dag(&document.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("DAG '{}' already exists", document.id),
            ))
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to look up DAG {}: {}", document.id, e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage failure"));
        }
    }

    let name = document.name.clone();
    let mut response = store_and_install(&state, document).await?;
    response.message = format!("DAG '{}' created successfully", name);

    tracing::info!("🔥 Created DAG: {} ({})", response.id, name);
    Ok(Json(response))
}

/// List all stored DAGs
///
/// GET /api/dags
async fn list_dags(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.registry.storage().list_dags().await {
        Ok(dags) => Ok(Json(json!({ "dags": dags, "active": state.registry.list_dag_ids() }))),
        Err(e) => {
            tracing::error!("Failed to list DAGs: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Get a DAG document by ID
///
/// GET /api/dags/{id}
async fn get_dag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DagDocument>, StatusCode> {
    match state.registry.storage().get_dag(&id).await {
        Ok(Some(document)) => Ok(Json(document)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get DAG {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Replace an existing DAG
///
/// PUT /api/dags/{id}
/// Body: { "dag": { ... } }; the id in the URL wins
async fn update_dag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DagRequest>,
) -> Result<Json<DagResponse>, ApiError> {
    let mut document = payload.dag;
    document.id = id.clone();

    match state.registry.storage().get_dag(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, format!("DAG '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to look up DAG {}: {}", id, e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage failure"));
        }
    }

    let name = document.name.clone();
    let mut response = store_and_install(&state, document).await?;
    response.message = format!("DAG '{}' updated successfully", name);

    tracing::info!("🔥 Hot-reloaded DAG: {} ({})", id, name);
    Ok(Json(response))
}

/// Delete a DAG
///
/// DELETE /api/dags/{id}
async fn delete_dag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.registry.remove_dag(&id);

    match state.registry.storage().delete_dag(&id).await {
        Ok(true) => {
            tracing::info!("Deleted DAG: {}", id);
            Ok(Json(json!({ "message": "DAG deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete DAG: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
