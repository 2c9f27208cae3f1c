/// Built-in step library
///
/// Everything registered by `StepRegistry::with_builtins()`.

pub mod http;
pub mod human;
pub mod logic;
pub mod trigger;
pub mod wait;

use crate::step::contract::Step;
use std::sync::Arc;

pub use http::HttpRequestStep;
pub use human::ApprovalStep;
pub use logic::{ConditionStep, DelayStep, EchoStep, SetStep};
pub use trigger::{ManualTrigger, ScheduleTrigger, WebhookTrigger};
pub use wait::{HttpStatusProbe, ProbeReading, StatusProbe, WaitForCompletionStep};

pub fn all() -> Vec<Arc<dyn Step>> {
    vec![
        Arc::new(ManualTrigger::new()),
        Arc::new(WebhookTrigger::new()),
        Arc::new(ScheduleTrigger::new()),
        Arc::new(DelayStep::new()),
        Arc::new(EchoStep::new()),
        Arc::new(ConditionStep::new()),
        Arc::new(SetStep::new()),
        Arc::new(HttpRequestStep::new()),
        Arc::new(WaitForCompletionStep::new()),
        Arc::new(ApprovalStep::new()),
    ]
}
