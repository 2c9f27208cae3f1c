/// HTTP API Layer
///
/// REST endpoints that drive the engine as a service:
/// - Flow upsert/list/get/delete and the step catalog
/// - Triggering, resuming, cancelling and inspecting executions
/// - Schedule management
/// - Webhook trigger nodes

pub mod executions;

pub mod flows;

pub mod webhooks;

use crate::error::EngineError;
use crate::runtime::{engine::ExecutionEngine, scheduler::ScheduleService};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

pub use executions::create_execution_routes;
pub use flows::create_flow_routes;
pub use webhooks::create_webhook_routes;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Engine owning the gateway, step registry and flow catalog
    pub engine: Arc<ExecutionEngine>,
    /// Cron schedule management
    pub schedules: Arc<ScheduleService>,
}

/// All API routes with state applied
pub fn create_api_routes(state: AppState) -> Router {
    Router::new()
        .merge(create_flow_routes())
        .merge(create_execution_routes())
        .merge(create_webhook_routes())
        .with_state(state)
}

/// Error returned by every handler, rendered as `{ "code", "message" }`
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        ApiError::Engine(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Engine(EngineError::Infrastructure(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
            ApiError::Engine(error) => {
                let (status, code) = match &error {
                    EngineError::ExecutionNotFound(_)
                    | EngineError::FlowNotFound(_)
                    | EngineError::WebhookNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    EngineError::NotSuspended { .. }
                    | EngineError::NodeMismatch { .. }
                    | EngineError::FlowInactive(_) => {
                        (StatusCode::CONFLICT, "CONFLICT")
                    }
                    EngineError::Flow(_) | EngineError::InvalidSchedule { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
                    }
                    EngineError::Infrastructure(e) => {
                        tracing::error!("❌ Request failed: {:#}", e);
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, error.to_string())
            }
        };

        (status, Json(json!({ "code": code, "message": message }))).into_response()
    }
}
