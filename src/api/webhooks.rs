/// Webhook trigger endpoints
///
/// A single catch-all route serves every `trigger.webhook` node. The node is
/// matched on its configured `path` and `method`; the JSON body becomes the
/// execution's trigger data and the run continues in the background.

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::flow::graph::CompiledFlow;
use crate::gateway::{Execution, ExecutionStatus};
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::Json,
    routing::{any, Router},
};
use serde_json::Value;

const WEBHOOK_TRIGGER: &str = "trigger.webhook";

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        // Format: /webhook/{flow_id}/{webhook_path}
        .route("/webhook/{flow_id}/{*path}", any(execute_webhook))
}

/// ANY /webhook/{flow_id}/{webhook_path}
/// Body: JSON payload (may be empty) that becomes the trigger data
async fn execute_webhook(
    State(state): State<AppState>,
    Path((flow_id, webhook_path)): Path<(String, String)>,
    method: Method,
    body: String,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    tracing::info!("📥 Webhook request received: {} {}/{}", method, flow_id, webhook_path);

    let payload: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid JSON payload for webhook {}/{}: {}", flow_id, webhook_path, e);
            ApiError::BadRequest(format!("Invalid JSON payload: {}", e))
        })?
    };

    let flow = state.engine.flows().load(&flow_id).await?;
    let node_id = find_webhook_trigger(&flow, &normalize_path(&webhook_path), method.as_str())
        .ok_or_else(|| {
            tracing::warn!("❌ No webhook trigger for {} /{} in flow '{}'", method, webhook_path, flow_id);
            EngineError::WebhookNotFound {
                flow_id: flow_id.clone(),
                method: method.to_string(),
                path: webhook_path.clone(),
            }
        })?;

    let execution = state.engine.trigger(&flow_id, payload, Some(node_id)).await?;
    if execution.status == ExecutionStatus::Pending {
        state.engine.spawn(&execution.id);
    }
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Webhook trigger node whose configured path and method match the request
fn find_webhook_trigger(flow: &CompiledFlow, webhook_path: &str, method: &str) -> Option<String> {
    flow.triggers().iter()
        .filter_map(|id| flow.node(id))
        .filter(|node| node.step_type == WEBHOOK_TRIGGER)
        .find(|node| {
            let path = node.config.get("path").and_then(Value::as_str).map(normalize_path);
            let expected = node.config.get("method").and_then(Value::as_str).unwrap_or("POST");
            tracing::debug!("  🔍 Checking webhook node '{}' with path: {:?}", node.id, path);
            path.as_deref() == Some(webhook_path) && expected.eq_ignore_ascii_case(method)
        })
        .map(|node| node.id.clone())
}
