/// Persisted record shapes
///
/// Row-level structures shared by every gateway implementation. They are
/// storage-agnostic; the SQLite gateway maps them to tables with JSON columns.

use crate::flow::types::FlowDefinition;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// Stored flow definition plus authoring metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    pub definition: FlowDefinition,
    #[serde(default)]
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowRecord {
    pub fn new(definition: FlowDefinition) -> Self {
        let now = stored_now();
        Self {
            definition,
            description: String::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// Current time at the millisecond precision timestamps are stored with, so
/// a record read back compares equal to the one that was written
pub fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Suspended,
    Cancelled,
}

impl ExecutionStatus {
    pub const NON_TERMINAL: [ExecutionStatus; 3] =
        [ExecutionStatus::Pending, ExecutionStatus::Running, ExecutionStatus::Suspended];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Suspended => "suspended",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled executions never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => ExecutionStatus::Pending,
            "running" => ExecutionStatus::Running,
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            "suspended" => ExecutionStatus::Suspended,
            "cancelled" => ExecutionStatus::Cancelled,
            other => return Err(anyhow::anyhow!("Unknown execution status: {}", other)),
        })
    }
}

/// One run of a flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub flow_id: String,
    pub status: ExecutionStatus,
    pub trigger_data: Value,
    /// Trigger node that fired; `None` activates every trigger node
    pub trigger_node_id: Option<String>,
    pub current_node_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub suspend_reason: Option<String>,
    pub suspend_metadata: Option<Map<String, Value>>,
    /// Resume payloads keyed by the node they resumed, merged into that node's variables when it re-runs
    #[serde(default)]
    pub resume_data: Map<String, Value>,
}

impl Execution {
    /// New pending execution for a trigger invocation
    pub fn pending(flow_id: &str, trigger_data: Value, trigger_node_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            status: ExecutionStatus::Pending,
            trigger_data,
            trigger_node_id,
            current_node_id: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            suspend_reason: None,
            suspend_metadata: None,
            resume_data: Map::new(),
        }
    }
}

/// Outcome recorded for a single node visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResultStatus {
    Completed,
    Failed,
    Suspended,
}

impl StepResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepResultStatus::Completed => "completed",
            StepResultStatus::Failed => "failed",
            StepResultStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for StepResultStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "completed" => StepResultStatus::Completed,
            "failed" => StepResultStatus::Failed,
            "suspended" => StepResultStatus::Suspended,
            other => return Err(anyhow::anyhow!("Unknown step result status: {}", other)),
        })
    }
}

/// Audit row and resume checkpoint for one node visit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub step_type: String,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub status: StepResultStatus,
    /// Branch selected on success, replayed when a walk restores this node
    pub branch: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Cron rule that creates executions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub flow_id: String,
    pub cron_expression: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Suspended,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn only_completed_failed_cancelled_are_terminal() {
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Suspended.is_terminal());
        assert!(ExecutionStatus::NON_TERMINAL.iter().all(|s| !s.is_terminal()));
    }
}
