/// Step contract shared by the engine and every step implementation
///
/// A step declares its metadata and typed input/output schema and implements
/// `execute`. The engine treats `execute` as opaque: side effects, internal
/// retries and deadlines are the step's own business.

use crate::runtime::context::ExecutionContext;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Step category, used by the engine to recognise entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCategory {
    Trigger,
    Logic,
    Integration,
    /// Steps that wait on an external agent or system
    Swarm,
    Human,
}

/// Declared type of an input or output field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Json,
    Select,
}

impl FieldType {
    /// Whether `value` is acceptable for this type (select options are checked separately)
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String | FieldType::Select => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Json => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Json => "json",
            FieldType::Select => "select",
        }
    }
}

/// One declared input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub label: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl InputField {
    pub fn required(name: &str, kind: FieldType, label: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            label: label.to_string(),
            required: true,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn optional(name: &str, kind: FieldType, label: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, label)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

/// One declared output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub label: String,
}

impl OutputField {
    pub fn new(name: &str, kind: FieldType, label: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            label: label.to_string(),
        }
    }
}

/// Everything a step declares about itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Registry key, stable across versions
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: StepCategory,
    pub icon: String,
    pub inputs: Vec<InputField>,
    pub outputs: Vec<OutputField>,
}

impl StepDefinition {
    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|field| field.name == name)
    }
}

/// Outcome of one `execute` call
///
/// Suspend metadata only exists on the `Suspend` variant, so a successful or
/// failed step can never carry it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success {
        outputs: Map<String, Value>,
        /// Source handle to walk next; `None` is the default branch
        branch: Option<String>,
    },
    Failure {
        error: String,
        outputs: Map<String, Value>,
    },
    Suspend {
        reason: String,
        metadata: Map<String, Value>,
    },
}

impl StepOutcome {
    pub fn success(outputs: Map<String, Value>) -> Self {
        StepOutcome::Success {
            outputs,
            branch: None,
        }
    }

    pub fn branch(outputs: Map<String, Value>, branch: impl Into<String>) -> Self {
        StepOutcome::Success {
            outputs,
            branch: Some(branch.into()),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        StepOutcome::Failure {
            error: error.into(),
            outputs: Map::new(),
        }
    }

    pub fn suspend(reason: impl Into<String>, metadata: Map<String, Value>) -> Self {
        StepOutcome::Suspend {
            reason: reason.into(),
            metadata,
        }
    }
}

/// The executable unit every registered step implements
#[async_trait]
pub trait Step: Send + Sync {
    fn definition(&self) -> &StepDefinition;

    /// Run the step against already validated inputs.
    ///
    /// Returning `Err` is equivalent to `StepOutcome::Failure` with the error text.
    async fn execute(
        &self,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<StepOutcome>;
}
