/// Runtime execution context passed to every step
///
/// Holds the run identifiers, flow variables, the trigger payload and the
/// outputs of every node completed so far. Only the engine mutates it; steps
/// receive a shared reference.

use crate::flow::types::Variable;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: String,
    pub flow_id: String,
    /// Declared variables and trigger overrides, plus the resume payload
    /// while a resumed node re-runs
    pub variables: Map<String, Value>,
    /// Raw payload of the trigger invocation
    pub trigger_data: Value,
    /// Outputs keyed by node id
    previous_outputs: HashMap<String, Map<String, Value>>,
}

impl ExecutionContext {
    /// Seed a context for a walk.
    ///
    /// Variables start from declared defaults, overridden by trigger data
    /// fields with a declared name.
    pub fn seed(execution_id: &str, flow_id: &str, declared: &[Variable], trigger_data: &Value) -> Self {
        let mut variables = Map::new();
        for variable in declared {
            let value = trigger_data
                .get(&variable.name)
                .cloned()
                .or_else(|| variable.default_value.clone())
                .unwrap_or(Value::Null);
            variables.insert(variable.name.clone(), value);
        }

        Self {
            execution_id: execution_id.to_string(),
            flow_id: flow_id.to_string(),
            variables,
            trigger_data: trigger_data.clone(),
            previous_outputs: HashMap::new(),
        }
    }

    /// Outputs of a completed node
    pub fn output(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.previous_outputs.get(node_id)
    }

    /// Copy of this context for re-running the node a resume signal targeted.
    /// The payload (which may add new keys) is visible to that node only.
    pub fn resumed_with(&self, payload: &Map<String, Value>) -> Self {
        let mut context = self.clone();
        for (key, value) in payload {
            context.variables.insert(key.clone(), value.clone());
        }
        context
    }

    /// Store a node's outputs. Replacing an existing entry only happens when
    /// a resumed node re-executes.
    pub(crate) fn record_output(&mut self, node_id: &str, outputs: Map<String, Value>) {
        if self.previous_outputs.insert(node_id.to_string(), outputs).is_some() {
            tracing::debug!("♻️ Replaced outputs of node '{}' in execution {}", node_id, self.execution_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seed_layers_defaults_and_trigger_data() {
        let declared = vec![
            Variable { name: "repo".into(), kind: "string".into(), default_value: Some(json!("main")) },
            Variable { name: "limit".into(), kind: "number".into(), default_value: Some(json!(5)) },
            Variable { name: "owner".into(), kind: "string".into(), default_value: None },
        ];
        let trigger = json!({"limit": 9, "unrelated": true});

        let ctx = ExecutionContext::seed("x", "f", &declared, &trigger);
        assert_eq!(ctx.variables["repo"], json!("main"));
        assert_eq!(ctx.variables["limit"], json!(9));
        assert_eq!(ctx.variables["owner"], Value::Null);
        assert!(!ctx.variables.contains_key("unrelated"));
    }

    #[test]
    fn resume_payload_stays_on_the_resumed_copy() {
        let ctx = ExecutionContext::seed("x", "f", &[], &Value::Null);
        let resumed = ctx.resumed_with(json!({"approved": true}).as_object().unwrap());
        assert_eq!(resumed.variables["approved"], json!(true));
        assert!(!ctx.variables.contains_key("approved"));
    }
}
