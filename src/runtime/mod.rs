/// Runtime
///
/// - `context`: per-run state handed to every step
/// - `resolve`: input resolution and schema validation for a node
/// - `engine`: the DAG walk and the execution state machine
/// - `scheduler`: cron schedules that create executions

pub mod context;

pub mod engine;

pub mod resolve;

pub mod scheduler;

pub use context::ExecutionContext;
pub use engine::{ExecutionEngine, ResumeSignal};
pub use scheduler::ScheduleService;
