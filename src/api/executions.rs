/// Execution inspection and control endpoints

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::gateway::Execution;
use crate::runtime::engine::ResumeSignal;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Body of `POST /api/executions/{id}/resume`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub node_id: String,
    #[serde(default)]
    pub resume_data: Map<String, Value>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/resume", post(resume_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
}

/// GET /api/executions/{id}
/// Returns: { "execution": {...}, "stepResults": [...] }
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let gateway = state.engine.gateway();
    let execution = gateway.get_execution(&id).await?
        .ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))?;
    let step_results = gateway.list_step_results(&id).await?;

    Ok(Json(json!({ "execution": execution, "stepResults": step_results })))
}

/// POST /api/executions/{id}/resume
/// Body: { "nodeId": "approve", "resumeData": { "approved": true } }
async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ResumeRequest>,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    let signal = ResumeSignal {
        execution_id: id,
        node_id: payload.node_id,
        resume_data: payload.resume_data,
    };
    let execution = state.engine.spawn_resume(signal).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// POST /api/executions/{id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state.engine.cancel(&id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}
