/// Trigger steps
///
/// Entry points of a flow. The engine runs them to shape the trigger payload
/// into node outputs and records no step result for them.

use crate::runtime::context::ExecutionContext;
use crate::step::contract::{
    FieldType, InputField, OutputField, Step, StepCategory, StepDefinition, StepOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// The payload is exposed whole under `data`. Downstream nodes read fields
/// through `$trigger.` references or declared variables, never by name
/// collision with their own inputs.
fn payload_outputs(trigger_data: &Value) -> Map<String, Value> {
    let mut outputs = Map::new();
    outputs.insert("data".to_string(), trigger_data.clone());
    outputs
}

/// Started explicitly through the API
pub struct ManualTrigger {
    definition: StepDefinition,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "trigger.manual".into(),
                name: "Manual Trigger".into(),
                description: "Starts the flow on demand with the supplied trigger data".into(),
                category: StepCategory::Trigger,
                icon: "play".into(),
                inputs: Vec::new(),
                outputs: vec![OutputField::new("data", FieldType::Json, "Trigger payload")],
            },
        }
    }
}

#[async_trait]
impl Step for ManualTrigger {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, _inputs: &Map<String, Value>, context: &ExecutionContext) -> Result<StepOutcome> {
        Ok(StepOutcome::success(payload_outputs(&context.trigger_data)))
    }
}

/// Started by an HTTP request on `/webhook/{flow_id}/{path}`
pub struct WebhookTrigger {
    definition: StepDefinition,
}

impl WebhookTrigger {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "trigger.webhook".into(),
                name: "Webhook Trigger".into(),
                description: "Starts the flow when its webhook path receives a request".into(),
                category: StepCategory::Trigger,
                icon: "webhook".into(),
                inputs: vec![
                    InputField::required("path", FieldType::String, "Path"),
                    InputField::optional("method", FieldType::Select, "Method")
                        .with_options(&["GET", "POST", "PUT", "PATCH", "DELETE"])
                        .with_default(json!("POST")),
                ],
                outputs: vec![OutputField::new("data", FieldType::Json, "Request body")],
            },
        }
    }
}

#[async_trait]
impl Step for WebhookTrigger {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, _inputs: &Map<String, Value>, context: &ExecutionContext) -> Result<StepOutcome> {
        Ok(StepOutcome::success(payload_outputs(&context.trigger_data)))
    }
}

/// Marks a flow as schedulable; schedules themselves live in the gateway
pub struct ScheduleTrigger {
    definition: StepDefinition,
}

impl ScheduleTrigger {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "trigger.schedule".into(),
                name: "Schedule Trigger".into(),
                description: "Starts the flow from a cron schedule".into(),
                category: StepCategory::Trigger,
                icon: "clock".into(),
                inputs: Vec::new(),
                outputs: vec![
                    OutputField::new("trigger", FieldType::String, "Trigger kind"),
                    OutputField::new("data", FieldType::Json, "Trigger payload"),
                ],
            },
        }
    }
}

#[async_trait]
impl Step for ScheduleTrigger {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, _inputs: &Map<String, Value>, context: &ExecutionContext) -> Result<StepOutcome> {
        let mut outputs = payload_outputs(&context.trigger_data);
        outputs.insert("trigger".to_string(), json!("schedule"));
        Ok(StepOutcome::success(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_trigger_exposes_only_the_payload() {
        let ctx = ExecutionContext::seed("x", "f", &[], &json!({"ticket": 42, "message": "hi"}));
        let outcome = ManualTrigger::new().execute(&Map::new(), &ctx).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::success(json!({"data": {"ticket": 42, "message": "hi"}}).as_object().unwrap().clone())
        );
    }

    #[tokio::test]
    async fn schedule_trigger_declares_every_output() {
        let ctx = ExecutionContext::seed("x", "f", &[], &json!({}));
        let step = ScheduleTrigger::new();
        let StepOutcome::Success { outputs, .. } = step.execute(&Map::new(), &ctx).await.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(outputs["trigger"], json!("schedule"));
        assert!(outputs.keys().all(|key| step.definition().declares_output(key)));
    }
}
