/// Human-in-the-loop approval
///
/// Suspends until an operator resumes the execution with a boolean under the
/// node's `decisionVariable`, then takes the `approved` or `rejected` handle.

use crate::runtime::context::ExecutionContext;
use crate::step::contract::{
    FieldType, InputField, OutputField, Step, StepCategory, StepDefinition, StepOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub const AWAITING_APPROVAL: &str = "awaiting approval";

pub struct ApprovalStep {
    definition: StepDefinition,
}

impl ApprovalStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "human.approval".into(),
                name: "Approval".into(),
                description: "Pauses until a person approves or rejects".into(),
                category: StepCategory::Human,
                icon: "user-check".into(),
                inputs: vec![
                    InputField::optional("prompt", FieldType::String, "Prompt")
                        .with_default(json!("Approval required")),
                    InputField::optional("assignee", FieldType::String, "Assignee"),
                    InputField::optional("decisionVariable", FieldType::String, "Decision variable")
                        .with_default(json!("approved")),
                ],
                outputs: vec![
                    OutputField::new("approved", FieldType::Boolean, "Decision"),
                    OutputField::new("comment", FieldType::String, "Reviewer comment"),
                ],
            },
        }
    }
}

#[async_trait]
impl Step for ApprovalStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, context: &ExecutionContext) -> Result<StepOutcome> {
        let variable = inputs.get("decisionVariable").and_then(Value::as_str).unwrap_or("approved");

        if let Some(approved) = context.variables.get(variable).and_then(Value::as_bool) {
            tracing::info!("🧑‍⚖️ Approval '{}' decided: {}", variable, approved);
            let mut outputs = Map::new();
            outputs.insert("approved".to_string(), json!(approved));
            outputs.insert(
                "comment".to_string(),
                context.variables.get("comment").cloned().unwrap_or(json!("")),
            );
            return Ok(StepOutcome::branch(outputs, if approved { "approved" } else { "rejected" }));
        }

        let mut metadata = Map::new();
        metadata.insert("prompt".to_string(), inputs.get("prompt").cloned().unwrap_or(Value::Null));
        metadata.insert("assignee".to_string(), inputs.get("assignee").cloned().unwrap_or(Value::Null));
        metadata.insert("decisionVariable".to_string(), json!(variable));
        Ok(StepOutcome::suspend(AWAITING_APPROVAL, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> Map<String, Value> {
        json!({"prompt": "Ship it?", "decisionVariable": "approved"}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn suspends_until_a_decision_exists() {
        let ctx = ExecutionContext::seed("x", "f", &[], &Value::Null);
        match ApprovalStep::new().execute(&inputs(), &ctx).await.unwrap() {
            StepOutcome::Suspend { reason, metadata } => {
                assert_eq!(reason, AWAITING_APPROVAL);
                assert_eq!(metadata["prompt"], json!("Ship it?"));
                assert_eq!(metadata["decisionVariable"], json!("approved"));
            }
            other => panic!("expected suspend, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn decision_picks_the_branch() {
        let resume = json!({"approved": false, "comment": "needs tests"}).as_object().unwrap().clone();
        let ctx = ExecutionContext::seed("x", "f", &[], &Value::Null).resumed_with(&resume);
        let outcome = ApprovalStep::new().execute(&inputs(), &ctx).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::branch(
                json!({"approved": false, "comment": "needs tests"}).as_object().unwrap().clone(),
                "rejected"
            )
        );
    }
}
