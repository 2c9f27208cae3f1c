/// Flow definitions, compilation and the hot-reload catalog
///
/// - `types`: serde shapes of flows, nodes, edges and variables
/// - `graph`: validation and compilation into a petgraph DAG
/// - `catalog`: lock-free cache of compiled flows backed by the gateway

pub mod catalog;
pub mod graph;
pub mod types;

pub use catalog::FlowCatalog;
pub use graph::CompiledFlow;
pub use types::{FlowDefinition, FlowEdge, FlowNode, Position, Variable, DEFAULT_HANDLE};
