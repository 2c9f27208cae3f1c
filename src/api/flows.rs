/// Flow management REST API endpoints
///
/// Upserts are validated by compiling the flow before anything is stored,
/// and the catalog hot-reloads the compiled graph for new executions.

use crate::api::{ApiError, AppState};
use crate::flow::types::FlowDefinition;
use crate::gateway::{Execution, ExecutionStatus, FlowRecord, Schedule};
use crate::step::contract::StepDefinition;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Body of `PUT /api/flows/{id}`
#[derive(Debug, Deserialize)]
pub struct UpsertFlowRequest {
    pub flow: FlowDefinition,
    #[serde(default)]
    pub description: String,
}

/// Body of `PUT /api/flows/{id}/active`
#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// Body of `POST /api/flows/{id}/executions`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default)]
    pub trigger_node_id: Option<String>,
}

/// Body of `POST /api/flows/{id}/schedules`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub cron_expression: String,
}

pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/steps", get(list_steps))
        .route("/api/flows", get(list_flows))
        .route("/api/flows/{id}", get(get_flow).put(upsert_flow).delete(delete_flow))
        .route("/api/flows/{id}/active", put(set_flow_active))
        .route("/api/flows/{id}/executions", post(trigger_flow))
        .route("/api/flows/{id}/schedules", post(create_schedule))
        .route("/api/schedules", get(list_schedules))
        .route("/api/schedules/{id}", delete(delete_schedule))
}

/// GET /api/steps
async fn list_steps(State(state): State<AppState>) -> Json<Vec<StepDefinition>> {
    Json(state.engine.steps().definitions())
}

/// GET /api/flows
async fn list_flows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let flows = state.engine.gateway().list_flows().await?;
    Ok(Json(json!({ "flows": flows })))
}

/// GET /api/flows/{id}
async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowRecord>, ApiError> {
    state.engine.gateway().get_flow(&id).await?
        .map(Json)
        .ok_or_else(|| crate::error::EngineError::FlowNotFound(id).into())
}

/// PUT /api/flows/{id}
/// Body: { "flow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn upsert_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpsertFlowRequest>,
) -> Result<Json<FlowRecord>, ApiError> {
    let mut flow = payload.flow;
    flow.id = id;

    if flow.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Flow name must not be empty".to_string()));
    }

    let record = state.engine.flows().save(flow, payload.description).await?;
    tracing::info!("🔥 Saved flow: {} ({})", record.id(), record.definition.name);
    Ok(Json(record))
}

/// DELETE /api/flows/{id}
/// Also removes the flow's schedules
async fn delete_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let gateway = state.engine.gateway();
    for schedule in gateway.list_schedules().await? {
        if schedule.flow_id == id {
            gateway.delete_schedule(&schedule.id).await?;
        }
    }

    if !state.engine.flows().remove(&id).await? {
        return Err(crate::error::EngineError::FlowNotFound(id).into());
    }
    Ok(Json(json!({ "message": "Flow deleted successfully" })))
}

/// PUT /api/flows/{id}/active
/// Body: { "active": false }
async fn set_flow_active(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<FlowRecord>, ApiError> {
    Ok(Json(state.engine.flows().set_active(&id, payload.active).await?))
}

/// POST /api/flows/{id}/executions
/// Body: { "triggerData": {...}, "triggerNodeId": "optional" }
async fn trigger_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    let execution = state.engine
        .trigger(&id, payload.trigger_data, payload.trigger_node_id)
        .await?;

    if execution.status == ExecutionStatus::Pending {
        state.engine.spawn(&execution.id);
    }
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// POST /api/flows/{id}/schedules
/// Body: { "cronExpression": "0 */15 * * * *" }
async fn create_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let schedule = state.schedules.create_schedule(&id, &payload.cron_expression).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// GET /api/schedules
async fn list_schedules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let schedules = state.engine.gateway().list_schedules().await?;
    Ok(Json(json!({ "schedules": schedules })))
}

/// DELETE /api/schedules/{id}
async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.gateway().delete_schedule(&id).await? {
        tracing::info!("🗑️ Deleted schedule: {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
