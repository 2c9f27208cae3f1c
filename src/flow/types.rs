/// Core flow type definitions
///
/// A flow is a graph of nodes (each bound to a step type plus static config)
/// joined by directed edges. Definitions are stored as JSON and compiled into
/// petgraph DAGs for execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete flow definition
///
/// Immutable per version: the authoring surface writes a new definition,
/// the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowDefinition {
    /// Unique flow identifier (e.g., "flow-review")
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    /// Nodes in this flow
    pub nodes: Vec<FlowNode>,
    /// Edges connecting nodes
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    /// Flow-level inputs seeded into the execution context
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// A single node in the flow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    /// Unique node identifier within the flow (e.g., "n1", "approve")
    pub id: String,
    /// Step registry key (e.g., "logic.delay")
    pub step_type: String,
    /// Editor position, ignored by the engine
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub label: String,
    /// Static step configuration
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Connection between two nodes
///
/// `source_handle` selects which branch of the source step feeds this edge.
/// `None` is the unconditional default branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub target: String,
}

impl FlowEdge {
    /// Whether this edge is walked when its source reports `branch`
    pub fn carries(&self, branch: Option<&str>) -> bool {
        match (self.source_handle.as_deref(), branch) {
            (None | Some(DEFAULT_HANDLE), None | Some(DEFAULT_HANDLE)) => true,
            (handle, Some(branch)) => handle == Some(branch),
            (Some(_), None) => false,
        }
    }
}

/// Handle name equivalent to "no handle"
pub const DEFAULT_HANDLE: &str = "default";

/// Declared flow variable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FlowDefinition {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(handle: Option<&str>) -> FlowEdge {
        FlowEdge {
            id: "e".into(),
            source: "a".into(),
            source_handle: handle.map(str::to_string),
            target: "b".into(),
        }
    }

    #[test]
    fn default_branch_walks_unlabelled_edges_only() {
        assert!(edge(None).carries(None));
        assert!(edge(Some("default")).carries(None));
        assert!(!edge(Some("success")).carries(None));
    }

    #[test]
    fn named_branch_walks_matching_handle_only() {
        assert!(edge(Some("failure")).carries(Some("failure")));
        assert!(!edge(Some("success")).carries(Some("failure")));
        assert!(!edge(None).carries(Some("failure")));
    }

    #[test]
    fn default_branch_is_the_unlabelled_branch() {
        assert!(edge(None).carries(Some("default")));
        assert!(edge(Some("default")).carries(Some("default")));
        assert!(!edge(Some("success")).carries(Some("default")));
    }

    #[test]
    fn definition_parses_editor_json() {
        let json = serde_json::json!({
            "id": "f1",
            "name": "Review",
            "nodes": [
                {"id": "t", "stepType": "trigger.manual", "position": {"x": 0.0, "y": 10.0}},
                {"id": "a", "stepType": "logic.echo", "label": "Say", "config": {"message": "hi"}}
            ],
            "edges": [{"id": "e1", "source": "t", "target": "a"}],
            "variables": [{"name": "repo", "type": "string", "defaultValue": "main"}]
        });
        let flow: FlowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(flow.nodes[1].config["message"], "hi");
        assert_eq!(flow.edges[0].source_handle, None);
        assert_eq!(flow.variables[0].default_value, Some(Value::from("main")));
    }
}
