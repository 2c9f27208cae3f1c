/// Flowloom: flow-based workflow orchestration engine
///
/// Executes graphs of typed steps against persisted execution records, with
/// suspend/resume for long-running and human-in-the-loop steps and cron
/// based re-triggering.

// Core configuration and setup
pub mod config;

// Structured error types
pub mod error;

// Flow definitions, DAG compilation and the hot-reload catalog
pub mod flow;

// Step contract, registry and the built-in step library
pub mod step;

// Persistence gateway trait and its SQLite and in-memory implementations
pub mod gateway;

// Runtime execution engine and scheduler
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, FlowError, InputError};
pub use flow::{CompiledFlow, FlowCatalog, FlowDefinition};
pub use gateway::{Execution, ExecutionStatus, Gateway, StepResult};
pub use runtime::{ExecutionContext, ExecutionEngine, ResumeSignal, ScheduleService};
pub use server::start_server;
pub use step::{Step, StepOutcome, StepRegistry};
