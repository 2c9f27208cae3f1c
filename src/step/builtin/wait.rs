/// Wait-for-external-completion step
///
/// Polls an external system until it reports a terminal state. Success and
/// failure states end the step; running out of time suspends the execution
/// for manual intervention instead of failing it. The step owns its deadline,
/// the engine never times it out.

use crate::runtime::context::ExecutionContext;
use crate::step::contract::{
    FieldType, InputField, OutputField, Step, StepCategory, StepDefinition, StepOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

pub const TIMEOUT_REASON: &str = "timeout - awaiting manual intervention";

/// One observation of the external system
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReading {
    pub state: String,
    /// Full payload the state was read from
    pub detail: Value,
}

/// Reads the current state of whatever the step is waiting on
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn check(&self, inputs: &Map<String, Value>) -> Result<ProbeReading>;
}

/// GETs `url` and reads the dotted `statusField` path from the JSON body
pub struct HttpStatusProbe {
    client: reqwest::Client,
}

impl HttpStatusProbe {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn check(&self, inputs: &Map<String, Value>) -> Result<ProbeReading> {
        let url = inputs.get("url").and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Wait step missing 'url' input"))?;
        let field = inputs.get("statusField").and_then(Value::as_str).unwrap_or("status");

        let detail: Value = self.client.get(url).send().await?.error_for_status()?.json().await?;
        let state = field
            .split('.')
            .try_fold(&detail, |current, segment| current.get(segment))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(ProbeReading { state, detail })
    }
}

pub struct WaitForCompletionStep {
    definition: StepDefinition,
    probe: Arc<dyn StatusProbe>,
}

impl WaitForCompletionStep {
    /// Step polling over HTTP
    pub fn new() -> Self {
        Self::with_probe(Arc::new(HttpStatusProbe::new()))
    }

    pub fn with_probe(probe: Arc<dyn StatusProbe>) -> Self {
        Self {
            definition: StepDefinition {
                id: "swarm.wait_for_completion".into(),
                name: "Wait for Completion".into(),
                description: "Polls an external system until its work reaches a terminal state".into(),
                category: StepCategory::Swarm,
                icon: "radar".into(),
                inputs: vec![
                    InputField::required("url", FieldType::String, "Status URL"),
                    InputField::optional("statusField", FieldType::String, "Status field")
                        .with_default(json!("status")),
                    InputField::optional("successStates", FieldType::Json, "Success states")
                        .with_default(json!(["completed", "done", "success", "merged"])),
                    InputField::optional("failureStates", FieldType::Json, "Failure states")
                        .with_default(json!(["failed", "error", "cancelled"])),
                    InputField::optional("timeout", FieldType::Number, "Timeout (seconds)")
                        .with_default(json!(3600)),
                    InputField::optional("pollInterval", FieldType::Number, "Poll interval (seconds)")
                        .with_default(json!(10)),
                    InputField::optional("overrideVariable", FieldType::String, "Manual outcome variable")
                        .with_default(json!("waitOutcome")),
                ],
                outputs: vec![
                    OutputField::new("state", FieldType::String, "Final external state"),
                    OutputField::new("detail", FieldType::Json, "Last status payload"),
                    OutputField::new("polls", FieldType::Number, "Number of polls"),
                ],
            },
            probe,
        }
    }
}

fn states(inputs: &Map<String, Value>, key: &str) -> Vec<String> {
    inputs.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Non-positive values fall back; values too large for a `Duration` are an error
fn seconds(inputs: &Map<String, Value>, key: &str, fallback: f64) -> Result<Duration, String> {
    let value = inputs.get(key).and_then(Value::as_f64).unwrap_or(fallback);
    let value = if value.is_finite() && value > 0.0 { value } else { fallback };
    Duration::try_from_secs_f64(value).map_err(|_| format!("'{}' of {} seconds is out of range", key, value))
}

#[async_trait]
impl Step for WaitForCompletionStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, context: &ExecutionContext) -> Result<StepOutcome> {
        // An operator resolving the wait by hand short-circuits polling
        let override_key = inputs.get("overrideVariable").and_then(Value::as_str).unwrap_or("waitOutcome");
        match context.variables.get(override_key).and_then(Value::as_str) {
            Some("success") => {
                let mut outputs = Map::new();
                outputs.insert("state".to_string(), json!("manual_success"));
                outputs.insert("detail".to_string(), Value::Null);
                outputs.insert("polls".to_string(), json!(0));
                return Ok(StepOutcome::success(outputs));
            }
            Some("failure") => return Ok(StepOutcome::failure("Marked as failed by operator")),
            _ => {}
        }

        let success_states = states(inputs, "successStates");
        let failure_states = states(inputs, "failureStates");
        let (timeout, poll_interval) = match (seconds(inputs, "timeout", 3600.0), seconds(inputs, "pollInterval", 10.0)) {
            (Ok(timeout), Ok(poll_interval)) => (timeout, poll_interval),
            (Err(e), _) | (_, Err(e)) => return Ok(StepOutcome::failure(e)),
        };
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(StepOutcome::failure(format!("Timeout of {:?} is out of range", timeout)));
        };
        let mut polls: u64 = 0;
        let mut last = ProbeReading { state: String::new(), detail: Value::Null };

        loop {
            polls += 1;
            match self.probe.check(inputs).await {
                Ok(reading) => {
                    tracing::debug!("📡 Poll #{} state: '{}'", polls, reading.state);
                    if success_states.contains(&reading.state) {
                        let mut outputs = Map::new();
                        outputs.insert("state".to_string(), json!(reading.state));
                        outputs.insert("detail".to_string(), reading.detail);
                        outputs.insert("polls".to_string(), json!(polls));
                        return Ok(StepOutcome::success(outputs));
                    }
                    if failure_states.contains(&reading.state) {
                        let error = reading.detail.get("error")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("External work ended in state '{}'", reading.state));
                        let mut outputs = Map::new();
                        outputs.insert("state".to_string(), json!(reading.state));
                        outputs.insert("detail".to_string(), reading.detail);
                        outputs.insert("polls".to_string(), json!(polls));
                        return Ok(StepOutcome::Failure { error, outputs });
                    }
                    last = reading;
                }
                // Probe errors count as "not terminal yet"
                Err(e) => tracing::warn!("⚠️ Poll #{} failed: {}", polls, e),
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::info!("⏰ Wait timed out after {} polls, suspending", polls);
                let mut metadata = Map::new();
                metadata.insert("lastState".to_string(), json!(last.state));
                metadata.insert("lastDetail".to_string(), last.detail);
                metadata.insert("polls".to_string(), json!(polls));
                metadata.insert("timeoutSeconds".to_string(), json!(timeout.as_secs_f64()));
                metadata.insert("overrideVariable".to_string(), json!(override_key));
                return Ok(StepOutcome::suspend(TIMEOUT_REASON, metadata));
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed script of states, repeating the last one forever
    struct ScriptedProbe {
        states: Mutex<Vec<&'static str>>,
    }

    impl ScriptedProbe {
        fn new(states: &[&'static str]) -> Arc<Self> {
            let mut states = states.to_vec();
            states.reverse();
            Arc::new(Self { states: Mutex::new(states) })
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn check(&self, _inputs: &Map<String, Value>) -> Result<ProbeReading> {
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 { states.pop().unwrap() } else { states[0] };
            Ok(ProbeReading { state: state.to_string(), detail: json!({"status": state, "error": "boom"}) })
        }
    }

    fn inputs(timeout: u64, poll: u64) -> Map<String, Value> {
        json!({
            "url": "http://agent.local/status",
            "successStates": ["completed"],
            "failureStates": ["failed"],
            "timeout": timeout,
            "pollInterval": poll,
            "overrideVariable": "waitOutcome"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::seed("x", "f", &[], &Value::Null)
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_suspends_at_the_deadline_not_before() {
        let step = WaitForCompletionStep::with_probe(ScriptedProbe::new(&["running"]));
        let started = Instant::now();

        let outcome = step.execute(&inputs(5, 1), &ctx()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(5), "suspended early: {:?}", elapsed);
        assert!(elapsed <= Duration::from_secs(6), "suspended late: {:?}", elapsed);
        match outcome {
            StepOutcome::Suspend { reason, metadata } => {
                assert_eq!(reason, TIMEOUT_REASON);
                assert_eq!(metadata["lastState"], json!("running"));
                assert_eq!(metadata["polls"], json!(6));
            }
            other => panic!("expected suspend, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_success_returns_immediately() {
        let step = WaitForCompletionStep::with_probe(ScriptedProbe::new(&["running", "running", "completed"]));
        let started = Instant::now();
        let outcome = step.execute(&inputs(60, 1), &ctx()).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        match outcome {
            StepOutcome::Success { outputs, .. } => {
                assert_eq!(outputs["state"], json!("completed"));
                assert_eq!(outputs["polls"], json!(3));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_carries_external_error() {
        let step = WaitForCompletionStep::with_probe(ScriptedProbe::new(&["failed"]));
        let outcome = step.execute(&inputs(60, 1), &ctx()).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Failure { ref error, .. } if error == "boom"));
    }

    #[tokio::test]
    async fn unrepresentable_timeouts_fail_instead_of_polling() {
        let step = WaitForCompletionStep::with_probe(ScriptedProbe::new(&["running"]));
        for timeout in [json!(1e20), json!(1e19)] {
            let mut inputs = inputs(5, 1);
            inputs.insert("timeout".into(), timeout.clone());
            let outcome = step.execute(&inputs, &ctx()).await.unwrap();
            assert!(matches!(outcome, StepOutcome::Failure { .. }), "timeout {} should fail", timeout);
        }
    }

    #[tokio::test]
    async fn operator_override_skips_polling() {
        let step = WaitForCompletionStep::with_probe(ScriptedProbe::new(&["running"]));
        let mut context = ctx();
        context.variables.insert("waitOutcome".into(), json!("success"));
        let outcome = step.execute(&inputs(5, 1), &context).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Success { ref outputs, .. } if outputs["polls"] == json!(0)));
    }
}
