/// Logic steps: delay, echo, condition and set

use crate::runtime::context::ExecutionContext;
use crate::step::contract::{
    FieldType, InputField, OutputField, Step, StepCategory, StepDefinition, StepOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Sleeps for `duration` seconds
pub struct DelayStep {
    definition: StepDefinition,
}

impl DelayStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "logic.delay".into(),
                name: "Delay".into(),
                description: "Waits for a number of seconds".into(),
                category: StepCategory::Logic,
                icon: "hourglass".into(),
                inputs: vec![InputField::required("duration", FieldType::Number, "Duration (seconds)")],
                outputs: vec![OutputField::new("waited", FieldType::Number, "Seconds waited")],
            },
        }
    }
}

#[async_trait]
impl Step for DelayStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, _context: &ExecutionContext) -> Result<StepOutcome> {
        let duration = inputs.get("duration").cloned().unwrap_or(json!(0));
        let seconds = duration.as_f64().unwrap_or(0.0);
        let Ok(wait) = Duration::try_from_secs_f64(seconds) else {
            return Ok(StepOutcome::failure(format!("Invalid delay duration: {}", duration)));
        };

        tracing::debug!("⏳ Delaying for {}s", seconds);
        tokio::time::sleep(wait).await;

        let mut outputs = Map::new();
        outputs.insert("waited".to_string(), duration);
        Ok(StepOutcome::success(outputs))
    }
}

/// Returns its `message` input unchanged
pub struct EchoStep {
    definition: StepDefinition,
}

impl EchoStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "logic.echo".into(),
                name: "Echo".into(),
                description: "Outputs its message input".into(),
                category: StepCategory::Logic,
                icon: "message".into(),
                inputs: vec![InputField::optional("message", FieldType::Json, "Message").with_default(json!(""))],
                outputs: vec![OutputField::new("message", FieldType::Json, "Message")],
            },
        }
    }
}

#[async_trait]
impl Step for EchoStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, _context: &ExecutionContext) -> Result<StepOutcome> {
        let mut outputs = Map::new();
        outputs.insert("message".to_string(), inputs.get("message").cloned().unwrap_or(json!("")));
        Ok(StepOutcome::success(outputs))
    }
}

/// Compares `value` against `compareTo` and takes the `true` or `false` branch
pub struct ConditionStep {
    definition: StepDefinition,
}

impl ConditionStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "logic.condition".into(),
                name: "Condition".into(),
                description: "Routes to the 'true' or 'false' handle".into(),
                category: StepCategory::Logic,
                icon: "split".into(),
                inputs: vec![
                    InputField::optional("value", FieldType::Json, "Value"),
                    InputField::optional("operator", FieldType::Select, "Operator")
                        .with_options(&[
                            "equals",
                            "not_equals",
                            "greater_than",
                            "less_than",
                            "contains",
                            "exists",
                            "truthy",
                        ])
                        .with_default(json!("truthy")),
                    InputField::optional("compareTo", FieldType::Json, "Compare to"),
                ],
                outputs: vec![OutputField::new("result", FieldType::Boolean, "Result")],
            },
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn compare(operator: &str, value: &Value, other: &Value) -> bool {
    match operator {
        "equals" => value == other,
        "not_equals" => value != other,
        "greater_than" => matches!((value.as_f64(), other.as_f64()), (Some(a), Some(b)) if a > b),
        "less_than" => matches!((value.as_f64(), other.as_f64()), (Some(a), Some(b)) if a < b),
        "contains" => match (value, other) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            (Value::Object(fields), Value::String(key)) => fields.contains_key(key),
            _ => false,
        },
        "exists" => !value.is_null(),
        _ => truthy(value),
    }
}

#[async_trait]
impl Step for ConditionStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, _context: &ExecutionContext) -> Result<StepOutcome> {
        let value = inputs.get("value").unwrap_or(&Value::Null);
        let other = inputs.get("compareTo").unwrap_or(&Value::Null);
        let operator = inputs.get("operator").and_then(Value::as_str).unwrap_or("truthy");

        let result = compare(operator, value, other);
        tracing::debug!("🔀 Condition {} -> {}", operator, result);

        let mut outputs = Map::new();
        outputs.insert("result".to_string(), json!(result));
        Ok(StepOutcome::branch(outputs, if result { "true" } else { "false" }))
    }
}

/// Emits the fields of its `values` object as outputs
pub struct SetStep {
    definition: StepDefinition,
}

impl SetStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "logic.set".into(),
                name: "Set Values".into(),
                description: "Outputs each field of the values object".into(),
                category: StepCategory::Logic,
                icon: "pencil".into(),
                inputs: vec![InputField::required("values", FieldType::Json, "Values")],
                outputs: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Step for SetStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, _context: &ExecutionContext) -> Result<StepOutcome> {
        match inputs.get("values") {
            Some(Value::Object(fields)) => Ok(StepOutcome::success(fields.clone())),
            other => Ok(StepOutcome::failure(format!(
                "'values' must be an object, got {}",
                other.cloned().unwrap_or(Value::Null)
            ))),
        }
    }
}
