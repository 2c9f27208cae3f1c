/// In-memory persistence gateway
///
/// All state sits behind one async mutex, which makes every trait method
/// trivially atomic. Nothing survives the process.

use crate::gateway::{
    Execution, ExecutionStatus, FlowRecord, Gateway, Schedule, StepResult,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    flows: HashMap<String, FlowRecord>,
    executions: HashMap<String, Execution>,
    step_results: Vec<StepResult>,
    schedules: HashMap<String, Schedule>,
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn save_flow(&self, flow: &FlowRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut record = flow.clone();
        if let Some(existing) = state.flows.get(flow.id()) {
            record.created_at = existing.created_at;
        }
        state.flows.insert(flow.id().to_string(), record);
        Ok(())
    }

    async fn get_flow(&self, id: &str) -> Result<Option<FlowRecord>> {
        Ok(self.state.lock().await.flows.get(id).cloned())
    }

    async fn list_flows(&self) -> Result<Vec<FlowRecord>> {
        let mut flows: Vec<FlowRecord> = self.state.lock().await.flows.values().cloned().collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(flows)
    }

    async fn delete_flow(&self, id: &str) -> Result<bool> {
        Ok(self.state.lock().await.flows.remove(id).is_some())
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.executions.contains_key(&execution.id) {
            return Err(anyhow::anyhow!("Execution already exists: {}", execution.id));
        }
        state.executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        Ok(self.state.lock().await.executions.get(id).cloned())
    }

    async fn list_executions(&self, status: ExecutionStatus) -> Result<Vec<Execution>> {
        let mut executions: Vec<Execution> = self.state.lock().await.executions.values()
            .filter(|execution| execution.status == status)
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(executions)
    }

    async fn compare_and_set(
        &self,
        execution: &Execution,
        expected: &[ExecutionStatus],
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.executions.get_mut(&execution.id) {
            Some(stored) if expected.contains(&stored.status) => {
                stored.status = execution.status;
                stored.current_node_id = execution.current_node_id.clone();
                stored.completed_at = execution.completed_at;
                stored.error = execution.error.clone();
                stored.suspend_reason = execution.suspend_reason.clone();
                stored.suspend_metadata = execution.suspend_metadata.clone();
                stored.resume_data = execution.resume_data.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_step_result(&self, result: &StepResult) -> Result<()> {
        self.state.lock().await.step_results.push(result.clone());
        Ok(())
    }

    async fn list_step_results(&self, execution_id: &str) -> Result<Vec<StepResult>> {
        Ok(self.state.lock().await.step_results.iter()
            .filter(|result| result.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.state.lock().await.schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self.state.lock().await.schedules.values().cloned().collect();
        schedules.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        Ok(schedules)
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool> {
        Ok(self.state.lock().await.schedules.remove(id).is_some())
    }

    async fn claim_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        execution: &Execution,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.schedules.get_mut(&schedule.id) else {
            return Ok(false);
        };
        if !stored.active || stored.next_run_at != schedule.next_run_at {
            return Ok(false);
        }
        stored.next_run_at = next_run_at;
        stored.last_run_at = Some(now);
        state.executions.insert(execution.id.clone(), execution.clone());
        Ok(true)
    }
}
