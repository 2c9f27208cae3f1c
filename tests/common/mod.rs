#![allow(dead_code)]

use async_trait::async_trait;
use flowloom::flow::{catalog::FlowCatalog, types::{FlowDefinition, FlowEdge, FlowNode}};
use chrono::{DateTime, Utc};
use flowloom::gateway::{Execution, ExecutionStatus, FlowRecord, Gateway, MemoryGateway, Schedule, StepResult};
use flowloom::runtime::{context::ExecutionContext, engine::ExecutionEngine};
use flowloom::step::{
    builtin::wait::{ProbeReading, StatusProbe},
    contract::{FieldType, OutputField, Step, StepCategory, StepDefinition, StepOutcome},
    registry::StepRegistry,
};
use serde_json::{json, Map, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Notify;

pub struct Harness {
    pub gateway: Arc<MemoryGateway>,
    pub engine: Arc<ExecutionEngine>,
}

pub fn harness() -> Harness {
    harness_with(StepRegistry::with_builtins())
}

pub fn harness_with(steps: StepRegistry) -> Harness {
    let gateway = Arc::new(MemoryGateway::new());
    let steps = Arc::new(steps);
    let flows = Arc::new(FlowCatalog::new(gateway.clone(), Arc::clone(&steps)));
    let engine = Arc::new(ExecutionEngine::new(gateway.clone(), steps, flows));
    Harness { gateway, engine }
}

impl Harness {
    pub async fn save(&self, definition: FlowDefinition) {
        self.engine.flows().save(definition, String::new()).await.unwrap();
    }

    pub async fn execution(&self, id: &str) -> Execution {
        self.gateway.get_execution(id).await.unwrap().unwrap()
    }

    pub async fn results(&self, id: &str) -> Vec<StepResult> {
        self.gateway.list_step_results(id).await.unwrap()
    }

    /// Node ids of the recorded step results, in append order
    pub async fn visited(&self, id: &str) -> Vec<String> {
        self.results(id).await.into_iter().map(|r| r.node_id).collect()
    }

    /// Every execution in the store, whatever its status
    pub async fn all_executions(&self) -> Vec<Execution> {
        let mut all = Vec::new();
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Suspended,
            ExecutionStatus::Cancelled,
        ] {
            all.extend(self.gateway.list_executions(status).await.unwrap());
        }
        all
    }

    /// Poll until a background walk leaves `pending`/`running`
    pub async fn settled(&self, id: &str) -> Execution {
        settled(self.gateway.as_ref(), id).await
    }
}

/// Poll a gateway until a background walk leaves `pending`/`running`
pub async fn settled(gateway: &dyn Gateway, id: &str) -> Execution {
    for _ in 0..500 {
        let execution = gateway.get_execution(id).await.unwrap().unwrap();
        if !matches!(execution.status, ExecutionStatus::Pending | ExecutionStatus::Running) {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} never settled", id);
}

pub fn node(id: &str, step_type: &str, config: Value) -> FlowNode {
    FlowNode {
        id: id.into(),
        step_type: step_type.into(),
        position: Default::default(),
        label: id.into(),
        config: config.as_object().cloned().unwrap_or_default(),
    }
}

pub fn edge(source: &str, target: &str) -> FlowEdge {
    FlowEdge {
        id: format!("{source}->{target}"),
        source: source.into(),
        source_handle: None,
        target: target.into(),
    }
}

pub fn branch_edge(source: &str, handle: &str, target: &str) -> FlowEdge {
    FlowEdge {
        source_handle: Some(handle.into()),
        id: format!("{source}:{handle}->{target}"),
        ..edge(source, target)
    }
}

pub fn flow(id: &str, nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> FlowDefinition {
    FlowDefinition {
        id: id.into(),
        name: id.into(),
        nodes,
        edges,
        variables: Vec::new(),
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Counts its invocations; registered as `test.count`
pub struct CountingStep {
    definition: StepDefinition,
    pub calls: Arc<AtomicUsize>,
}

impl CountingStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "test.count".into(),
                name: "Count".into(),
                description: String::new(),
                category: StepCategory::Logic,
                icon: String::new(),
                inputs: Vec::new(),
                outputs: vec![OutputField::new("count", FieldType::Number, "Invocation number")],
            },
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Step for CountingStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, _inputs: &Map<String, Value>, _context: &ExecutionContext) -> anyhow::Result<StepOutcome> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StepOutcome::success(object(json!({ "count": count }))))
    }
}

/// Signals `started` and then waits for `release`; registered as `test.block`
pub struct BlockingStep {
    definition: StepDefinition,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl BlockingStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "test.block".into(),
                name: "Block".into(),
                description: String::new(),
                category: StepCategory::Logic,
                icon: String::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Step for BlockingStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, _inputs: &Map<String, Value>, _context: &ExecutionContext) -> anyhow::Result<StepOutcome> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(StepOutcome::success(Map::new()))
    }
}

/// Panics inside `execute`; registered as `test.panic`
pub struct PanickingStep {
    definition: StepDefinition,
}

impl PanickingStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "test.panic".into(),
                name: "Panic".into(),
                description: String::new(),
                category: StepCategory::Logic,
                icon: String::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Step for PanickingStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, _inputs: &Map<String, Value>, _context: &ExecutionContext) -> anyhow::Result<StepOutcome> {
        panic!("step blew up");
    }
}

/// Always reports the same external state
pub struct FixedStatus {
    pub state: &'static str,
    pub checks: AtomicUsize,
}

impl FixedStatus {
    pub fn new(state: &'static str) -> Arc<Self> {
        Arc::new(Self { state, checks: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl StatusProbe for FixedStatus {
    async fn check(&self, _inputs: &Map<String, Value>) -> anyhow::Result<ProbeReading> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeReading { state: self.state.to_string(), detail: json!({ "status": self.state }) })
    }
}

/// Memory gateway whose `append_step_result` fails on chosen calls
pub struct FlakyGateway {
    pub inner: MemoryGateway,
    appends: AtomicUsize,
    /// 1-based append calls that fail
    failing: Vec<usize>,
}

impl FlakyGateway {
    pub fn failing_appends(failing: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryGateway::new(),
            appends: AtomicUsize::new(0),
            failing: failing.to_vec(),
        })
    }
}

#[async_trait]
impl Gateway for FlakyGateway {
    async fn save_flow(&self, flow: &FlowRecord) -> anyhow::Result<()> {
        self.inner.save_flow(flow).await
    }

    async fn get_flow(&self, id: &str) -> anyhow::Result<Option<FlowRecord>> {
        self.inner.get_flow(id).await
    }

    async fn list_flows(&self) -> anyhow::Result<Vec<FlowRecord>> {
        self.inner.list_flows().await
    }

    async fn delete_flow(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.delete_flow(id).await
    }

    async fn insert_execution(&self, execution: &Execution) -> anyhow::Result<()> {
        self.inner.insert_execution(execution).await
    }

    async fn get_execution(&self, id: &str) -> anyhow::Result<Option<Execution>> {
        self.inner.get_execution(id).await
    }

    async fn list_executions(&self, status: ExecutionStatus) -> anyhow::Result<Vec<Execution>> {
        self.inner.list_executions(status).await
    }

    async fn compare_and_set(&self, execution: &Execution, expected: &[ExecutionStatus]) -> anyhow::Result<bool> {
        self.inner.compare_and_set(execution, expected).await
    }

    async fn append_step_result(&self, result: &StepResult) -> anyhow::Result<()> {
        let call = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.contains(&call) {
            anyhow::bail!("disk full");
        }
        self.inner.append_step_result(result).await
    }

    async fn list_step_results(&self, execution_id: &str) -> anyhow::Result<Vec<StepResult>> {
        self.inner.list_step_results(execution_id).await
    }

    async fn save_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        self.inner.save_schedule(schedule).await
    }

    async fn list_schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        self.inner.list_schedules().await
    }

    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.delete_schedule(id).await
    }

    async fn claim_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        execution: &Execution,
    ) -> anyhow::Result<bool> {
        self.inner.claim_schedule(schedule, now, next_run_at, execution).await
    }
}

/// Engine over any gateway, with the built-ins plus `extra` steps
pub fn engine_over(gateway: Arc<dyn Gateway>, extra: Vec<Arc<dyn Step>>) -> Arc<ExecutionEngine> {
    let mut steps = StepRegistry::with_builtins();
    for step in extra {
        steps.register(step).unwrap();
    }
    let steps = Arc::new(steps);
    let flows = Arc::new(FlowCatalog::new(Arc::clone(&gateway), Arc::clone(&steps)));
    Arc::new(ExecutionEngine::new(gateway, steps, flows))
}
