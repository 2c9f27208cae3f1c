pub mod builtin;
pub mod contract;
pub mod registry;

pub use contract::{
    FieldType, InputField, OutputField, Step, StepCategory, StepDefinition, StepOutcome,
};
pub use registry::StepRegistry;
