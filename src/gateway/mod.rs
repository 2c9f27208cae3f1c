/// Persistence Gateway
///
/// The narrow storage contract the engine and scheduler depend on. Each
/// mutating call is atomic on its own: claiming an execution, appending a
/// step result and advancing a schedule never leave partial state behind.
///
/// - `sqlite`: durable sqlx implementation
/// - `memory`: process-local implementation for tests and throwaway runs

pub mod records;

pub mod sqlite;

pub mod memory;

pub use memory::MemoryGateway;
pub use records::{
    Execution, ExecutionStatus, FlowRecord, Schedule, StepResult, StepResultStatus,
};
pub use sqlite::SqliteGateway;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Insert or replace a flow definition
    async fn save_flow(&self, flow: &FlowRecord) -> Result<()>;

    async fn get_flow(&self, id: &str) -> Result<Option<FlowRecord>>;

    async fn list_flows(&self) -> Result<Vec<FlowRecord>>;

    async fn delete_flow(&self, id: &str) -> Result<bool>;

    async fn insert_execution(&self, execution: &Execution) -> Result<()>;

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>>;

    async fn list_executions(&self, status: ExecutionStatus) -> Result<Vec<Execution>>;

    /// Overwrite the mutable fields of `execution` only if the stored status is
    /// one of `expected`. Returns false when the stored status did not match.
    async fn compare_and_set(
        &self,
        execution: &Execution,
        expected: &[ExecutionStatus],
    ) -> Result<bool>;

    async fn append_step_result(&self, result: &StepResult) -> Result<()>;

    /// Step results of an execution in append order
    async fn list_step_results(&self, execution_id: &str) -> Result<Vec<StepResult>>;

    async fn save_schedule(&self, schedule: &Schedule) -> Result<()>;

    async fn list_schedules(&self) -> Result<Vec<Schedule>>;

    async fn delete_schedule(&self, id: &str) -> Result<bool>;

    /// Advance a due schedule to `next_run_at` and insert `execution` in one
    /// transaction. The schedule is matched on its current `next_run_at`, so
    /// of two racing claimers exactly one returns true.
    async fn claim_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        execution: &Execution,
    ) -> Result<bool>;
}
