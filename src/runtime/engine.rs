/// Petgraph-based DAG execution engine
///
/// Walks a compiled flow in topological order for one execution, resolving
/// inputs, invoking steps and persisting a StepResult per visited node. Every
/// walk rebuilds its context from persisted results, so the same code path
/// serves the first run, a resume and crash recovery.
///
/// Status transitions are compare-and-set writes through the gateway:
/// claiming requires `pending` (or `suspended` for a resume) and every write
/// made during a walk requires `running`. A cancel landing mid-walk therefore
/// wins, and the walk stops at its next write.

use crate::error::{EngineError, FlowError};
use crate::flow::{catalog::FlowCatalog, graph::CompiledFlow};
use crate::gateway::{Execution, ExecutionStatus, Gateway, StepResult, StepResultStatus};
use crate::runtime::{context::ExecutionContext, resolve::resolve_inputs};
use crate::step::{
    contract::{Step, StepOutcome},
    registry::StepRegistry,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;

/// Request to continue a suspended execution at a specific node
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSignal {
    pub execution_id: String,
    pub node_id: String,
    #[serde(default)]
    pub resume_data: Map<String, Value>,
}

pub struct ExecutionEngine {
    gateway: Arc<dyn Gateway>,
    steps: Arc<StepRegistry>,
    flows: Arc<FlowCatalog>,
}

impl ExecutionEngine {
    pub fn new(gateway: Arc<dyn Gateway>, steps: Arc<StepRegistry>, flows: Arc<FlowCatalog>) -> Self {
        Self { gateway, steps, flows }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn steps(&self) -> &Arc<StepRegistry> {
        &self.steps
    }

    pub fn flows(&self) -> &Arc<FlowCatalog> {
        &self.flows
    }

    /// Create a pending execution for a trigger invocation.
    ///
    /// `trigger_node_id` narrows the run to one trigger; `None` fires every
    /// trigger of the flow. Inactive flows are refused. A flow that no longer
    /// compiles yields an execution that is already failed.
    pub async fn trigger(
        &self,
        flow_id: &str,
        trigger_data: Value,
        trigger_node_id: Option<String>,
    ) -> Result<Execution, EngineError> {
        let mut execution = Execution::pending(flow_id, trigger_data, trigger_node_id);

        match self.flows.load_active(flow_id).await {
            Ok(flow) => {
                if let Some(node_id) = &execution.trigger_node_id {
                    if !flow.triggers().contains(node_id) {
                        return Err(FlowError::UnknownTrigger(node_id.clone()).into());
                    }
                }
            }
            Err(EngineError::Flow(e)) => {
                tracing::error!("❌ Flow '{}' is misconfigured: {}", flow_id, e);
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(e.to_string());
                execution.completed_at = Some(Utc::now());
            }
            Err(e) => return Err(e),
        }

        self.gateway.insert_execution(&execution).await?;
        tracing::info!("📥 Created execution {} for flow '{}' ({})", execution.id, flow_id, execution.status);
        Ok(execution)
    }

    /// Claim a pending execution and walk it to its next stable state.
    ///
    /// Losing the claim is not an error: the current status is returned and
    /// nothing runs.
    pub async fn run(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError> {
        let mut execution = self.fetch(execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            tracing::debug!("⏭️ Execution {} is {}, not claiming", execution_id, execution.status);
            return Ok(execution.status);
        }

        execution.status = ExecutionStatus::Running;
        if !self.gateway.compare_and_set(&execution, &[ExecutionStatus::Pending]).await? {
            tracing::debug!("⏭️ Execution {} was claimed elsewhere", execution_id);
            return Ok(self.fetch(execution_id).await?.status);
        }

        self.walk(execution).await
    }

    /// Resume a suspended execution and walk it inline
    pub async fn resume(&self, signal: ResumeSignal) -> Result<ExecutionStatus, EngineError> {
        let execution = self.claim_suspended(signal).await?;
        self.walk(execution).await
    }

    /// Resume a suspended execution on a background task.
    ///
    /// The claim happens before returning, so a rejected signal is reported
    /// to the caller.
    pub async fn spawn_resume(self: &Arc<Self>, signal: ResumeSignal) -> Result<Execution, EngineError> {
        let execution = self.claim_suspended(signal).await?;
        let claimed = execution.clone();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let id = execution.id.clone();
            if let Err(e) = engine.walk(execution).await {
                tracing::error!("❌ Resumed execution {} stopped: {}", id, e);
            }
        });
        Ok(claimed)
    }

    /// Move any non-terminal execution to `cancelled`.
    ///
    /// Returns false when the execution was already terminal.
    pub async fn cancel(&self, execution_id: &str) -> Result<bool, EngineError> {
        loop {
            let mut execution = self.fetch(execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(false);
            }

            execution.status = ExecutionStatus::Cancelled;
            execution.completed_at = Some(Utc::now());
            if self.gateway.compare_and_set(&execution, &ExecutionStatus::NON_TERMINAL).await? {
                tracing::info!("🛑 Cancelled execution {}", execution_id);
                return Ok(true);
            }
        }
    }

    /// Run an execution on its own task
    pub fn spawn(self: &Arc<Self>, execution_id: &str) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let id = execution_id.to_string();
        tokio::spawn(async move {
            match engine.run(&id).await {
                Ok(status) => tracing::debug!("🏁 Execution {} settled as {}", id, status),
                Err(e) => tracing::error!("❌ Execution {} stopped: {}", id, e),
            }
        })
    }

    /// Restart work orphaned by a previous process.
    ///
    /// Runs stuck in `running` lost their runner with that process; they go
    /// back to `pending` and every pending execution is spawned again.
    /// Assumes this is the only engine process using the store.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, EngineError> {
        for mut execution in self.gateway.list_executions(ExecutionStatus::Running).await? {
            execution.status = ExecutionStatus::Pending;
            if self.gateway.compare_and_set(&execution, &[ExecutionStatus::Running]).await? {
                tracing::warn!("♻️ Reclaimed orphaned execution {}", execution.id);
            }
        }

        let pending = self.gateway.list_executions(ExecutionStatus::Pending).await?;
        for execution in &pending {
            self.spawn(&execution.id);
        }
        tracing::info!("♻️ Recovered {} pending executions", pending.len());
        Ok(pending.len())
    }

    async fn fetch(&self, execution_id: &str) -> Result<Execution, EngineError> {
        self.gateway.get_execution(execution_id).await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn claim_suspended(&self, signal: ResumeSignal) -> Result<Execution, EngineError> {
        let mut execution = self.fetch(&signal.execution_id).await?;
        if execution.status != ExecutionStatus::Suspended {
            return Err(EngineError::NotSuspended {
                id: execution.id,
                status: execution.status,
            });
        }
        let current = execution.current_node_id.clone().unwrap_or_default();
        if current != signal.node_id {
            return Err(EngineError::NodeMismatch {
                id: execution.id,
                current,
                requested: signal.node_id,
            });
        }

        // Resume payloads are kept per node and only reach the node they resumed
        let slot = execution.resume_data
            .entry(signal.node_id.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(fields) => fields.extend(signal.resume_data),
            other => *other = Value::Object(signal.resume_data),
        }
        execution.status = ExecutionStatus::Running;
        execution.suspend_reason = None;
        execution.suspend_metadata = None;

        if !self.gateway.compare_and_set(&execution, &[ExecutionStatus::Suspended]).await? {
            let status = self.fetch(&execution.id).await?.status;
            return Err(EngineError::NotSuspended { id: execution.id, status });
        }

        tracing::info!("▶️ Resuming execution {} at node '{}'", execution.id, signal.node_id);
        Ok(execution)
    }

    /// One walk over the graph for a claimed (`running`) execution
    async fn walk(&self, mut execution: Execution) -> Result<ExecutionStatus, EngineError> {
        let walk_start_time = std::time::Instant::now();

        let flow = match self.flows.load(&execution.flow_id).await {
            Ok(flow) => flow,
            Err(EngineError::Flow(e)) => return self.fail(&mut execution, e.to_string()).await,
            Err(EngineError::FlowNotFound(id)) => {
                return self.fail(&mut execution, format!("Flow not found: {}", id)).await
            }
            Err(e) => return Err(e),
        };

        tracing::info!("🚀 Walking execution {} of flow '{}'", execution.id, flow.id());

        // Latest persisted result per node
        let history = self.gateway.list_step_results(&execution.id).await?;
        let mut latest: HashMap<String, StepResult> = HashMap::new();
        for result in history {
            latest.insert(result.node_id.clone(), result);
        }

        let mut context = ExecutionContext::seed(
            &execution.id,
            &execution.flow_id,
            &flow.definition.variables,
            &execution.trigger_data,
        );

        // Settled nodes and the branch each one selected
        let mut settled: HashMap<String, Option<String>> = HashMap::new();

        for node_id in flow.order() {
            let Some(node) = flow.node(node_id) else { continue };
            let Some(step) = self.steps.get(&node.step_type) else {
                let error = FlowError::UnknownStepType {
                    node: node.id.clone(),
                    step_type: node.step_type.clone(),
                };
                return self.fail(&mut execution, error.to_string()).await;
            };

            if flow.triggers().contains(node_id) {
                if execution.trigger_node_id.as_ref().is_some_and(|fired| fired != node_id) {
                    continue;
                }
                match self.fire_trigger(&flow, node_id, &context).await {
                    Ok((outputs, branch)) => {
                        context.record_output(node_id, outputs);
                        settled.insert(node_id.clone(), branch);
                    }
                    Err(error) => return self.fail(&mut execution, error).await,
                }
                continue;
            }

            let activated = flow.incoming(node_id).iter().any(|edge| {
                settled.get(&edge.source).is_some_and(|branch| edge.carries(branch.as_deref()))
            });
            if !activated {
                tracing::debug!("⏭️ Skipping node '{}', no live incoming edge", node_id);
                continue;
            }

            let previous = latest.get(node_id);
            match previous.map(|result| result.status) {
                Some(StepResultStatus::Completed) => {
                    if let Some(result) = previous {
                        tracing::debug!("♻️ Restoring completed node '{}'", node_id);
                        context.record_output(node_id, result.outputs.clone());
                        settled.insert(node_id.clone(), result.branch.clone());
                    }
                    continue;
                }
                Some(StepResultStatus::Failed) => {
                    let error = previous.and_then(|result| result.error.clone()).unwrap_or_default();
                    return self.fail(&mut execution, node_failure(node_id, &error)).await;
                }
                _ => {}
            }

            // A suspended node re-runs with the inputs it suspended with
            let suspended = previous.filter(|result| result.status == StepResultStatus::Suspended);
            let inputs = match suspended {
                Some(result) => result.inputs.clone(),
                None => match resolve_inputs(node, step.definition(), flow.ancestors(node_id), &context) {
                    Ok(inputs) => inputs,
                    Err(e) => return self.fail(&mut execution, e.to_string()).await,
                },
            };

            execution.current_node_id = Some(node_id.clone());
            if !self.advance(&execution).await? {
                return self.interrupted(&execution.id).await;
            }

            tracing::info!("📍 Executing node '{}' (type: {})", node_id, node.step_type);
            let node_start_time = std::time::Instant::now();
            let started_at = Utc::now();

            let step_context = match suspended.and(execution.resume_data.get(node_id)).and_then(Value::as_object) {
                Some(payload) => context.resumed_with(payload),
                None => context.clone(),
            };
            let outcome = invoke(step, inputs.clone(), step_context).await;

            let mut result = StepResult {
                id: uuid::Uuid::new_v4().to_string(),
                execution_id: execution.id.clone(),
                node_id: node_id.clone(),
                step_type: node.step_type.clone(),
                inputs,
                outputs: Map::new(),
                status: StepResultStatus::Completed,
                branch: None,
                started_at,
                completed_at: Some(Utc::now()),
                error: None,
            };

            match outcome {
                StepOutcome::Success { outputs, branch } => {
                    result.outputs = outputs.clone();
                    result.branch = branch.clone();
                    self.gateway.append_step_result(&result).await?;

                    tracing::info!("✅ Node '{}' completed in {:?}", node_id, node_start_time.elapsed());
                    context.record_output(node_id, outputs);
                    settled.insert(node_id.clone(), branch);
                }
                StepOutcome::Failure { error, outputs } => {
                    result.status = StepResultStatus::Failed;
                    result.outputs = outputs;
                    result.error = Some(error.clone());
                    self.gateway.append_step_result(&result).await?;

                    return self.fail(&mut execution, node_failure(node_id, &error)).await;
                }
                StepOutcome::Suspend { reason, metadata } => {
                    result.status = StepResultStatus::Suspended;
                    result.completed_at = None;
                    self.gateway.append_step_result(&result).await?;

                    execution.status = ExecutionStatus::Suspended;
                    execution.suspend_reason = Some(reason.clone());
                    execution.suspend_metadata = Some(metadata);
                    if !self.advance(&execution).await? {
                        return self.interrupted(&execution.id).await;
                    }

                    tracing::info!("⏸️ Execution {} suspended at '{}': {}", execution.id, node_id, reason);
                    return Ok(ExecutionStatus::Suspended);
                }
            }
        }

        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(Utc::now());
        if !self.advance(&execution).await? {
            return self.interrupted(&execution.id).await;
        }

        tracing::info!("🎉 Execution {} completed in {:?}", execution.id, walk_start_time.elapsed());
        Ok(ExecutionStatus::Completed)
    }

    /// Invoke a trigger step to shape the trigger payload into outputs
    async fn fire_trigger(
        &self,
        flow: &CompiledFlow,
        node_id: &str,
        context: &ExecutionContext,
    ) -> Result<(Map<String, Value>, Option<String>), String> {
        let node = flow.node(node_id).ok_or_else(|| format!("Unknown node '{}'", node_id))?;
        let step = self.steps.get(&node.step_type)
            .ok_or_else(|| format!("Node '{}' uses unknown step type '{}'", node_id, node.step_type))?;

        let inputs = resolve_inputs(node, step.definition(), &[], context).map_err(|e| e.to_string())?;
        tracing::debug!("🎯 Firing trigger '{}'", node_id);

        match invoke(step, inputs, context.clone()).await {
            StepOutcome::Success { outputs, branch } => Ok((outputs, branch)),
            StepOutcome::Failure { error, .. } => Err(node_failure(node_id, &error)),
            StepOutcome::Suspend { .. } => Err(format!("Trigger node '{}' cannot suspend", node_id)),
        }
    }

    /// Persist a write made during a walk; false means the run was taken over
    async fn advance(&self, execution: &Execution) -> Result<bool, EngineError> {
        Ok(self.gateway.compare_and_set(execution, &[ExecutionStatus::Running]).await?)
    }

    async fn fail(&self, execution: &mut Execution, error: String) -> Result<ExecutionStatus, EngineError> {
        tracing::error!("❌ Execution {} failed: {}", execution.id, error);
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(error);
        execution.completed_at = Some(Utc::now());
        if !self.advance(execution).await? {
            return self.interrupted(&execution.id).await;
        }
        Ok(ExecutionStatus::Failed)
    }

    async fn interrupted(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError> {
        let status = self.fetch(execution_id).await?.status;
        tracing::warn!("🛑 Execution {} became {} mid-walk, stopping", execution_id, status);
        Ok(status)
    }
}

/// Run a step on its own task. An `Err` or a panic becomes a `Failure`,
/// so a broken step fails its node instead of stranding the execution in
/// `running`.
async fn invoke(step: Arc<dyn Step>, inputs: Map<String, Value>, context: ExecutionContext) -> StepOutcome {
    let task = tokio::spawn(async move { step.execute(&inputs, &context).await });
    match task.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => StepOutcome::failure(e.to_string()),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload.downcast_ref::<&str>()
                .map(|text| text.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            StepOutcome::failure(format!("Step panicked: {}", message))
        }
        Err(e) => StepOutcome::failure(e.to_string()),
    }
}

fn node_failure(node_id: &str, error: &str) -> String {
    format!("Node '{}' failed: {}", node_id, error)
}
