/// HTTP request step for calling external APIs
///
/// Expected inputs: { "url": "https://api.example.com/data", "method": "POST",
/// "headers": {...}, "body": {...} }. JSON response bodies are parsed, other
/// bodies are returned as text.

use crate::runtime::context::ExecutionContext;
use crate::step::contract::{
    FieldType, InputField, OutputField, Step, StepCategory, StepDefinition, StepOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub struct HttpRequestStep {
    definition: StepDefinition,
    client: reqwest::Client,
}

impl HttpRequestStep {
    pub fn new() -> Self {
        Self {
            definition: StepDefinition {
                id: "integration.http_request".into(),
                name: "HTTP Request".into(),
                description: "Calls an HTTP endpoint and returns its response".into(),
                category: StepCategory::Integration,
                icon: "globe".into(),
                inputs: vec![
                    InputField::required("url", FieldType::String, "URL"),
                    InputField::optional("method", FieldType::Select, "Method")
                        .with_options(&["GET", "POST", "PUT", "PATCH", "DELETE"])
                        .with_default(json!("GET")),
                    InputField::optional("headers", FieldType::Json, "Headers"),
                    InputField::optional("body", FieldType::Json, "Body"),
                    InputField::optional("failOnError", FieldType::Boolean, "Fail on non-2xx")
                        .with_default(json!(true)),
                ],
                outputs: vec![
                    OutputField::new("status", FieldType::Number, "Status code"),
                    OutputField::new("ok", FieldType::Boolean, "2xx response"),
                    OutputField::new("body", FieldType::Json, "Response body"),
                    OutputField::new("headers", FieldType::Json, "Response headers"),
                ],
            },
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Step for HttpRequestStep {
    fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    async fn execute(&self, inputs: &Map<String, Value>, _context: &ExecutionContext) -> Result<StepOutcome> {
        let url = inputs.get("url").and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("HTTP request missing 'url' input"))?;
        let method = inputs.get("method").and_then(Value::as_str).unwrap_or("GET");
        let fail_on_error = inputs.get("failOnError").and_then(Value::as_bool).unwrap_or(true);

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request_builder = match method {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method)),
        };

        if let Some(Value::Object(headers)) = inputs.get("headers") {
            for (key, value) in headers {
                if let Some(header_value) = value.as_str() {
                    request_builder = request_builder.header(key, header_value);
                }
            }
        }

        match inputs.get("body") {
            Some(body @ (Value::Object(_) | Value::Array(_))) => {
                request_builder = request_builder.json(body);
            }
            Some(Value::String(text)) => {
                request_builder = request_builder
                    .header("Content-Type", "text/plain")
                    .body(text.clone());
            }
            _ => {}
        }

        let response = request_builder.send().await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        let headers_map: HashMap<String, String> = response.headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let response_text = response.text().await
            .map_err(|e| anyhow::anyhow!("Failed to read response body: {}", e))?;
        let body = serde_json::from_str::<Value>(&response_text).unwrap_or(Value::String(response_text));

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

        let mut outputs = Map::new();
        outputs.insert("status".to_string(), json!(status.as_u16()));
        outputs.insert("ok".to_string(), json!(status.is_success()));
        outputs.insert("body".to_string(), body);
        outputs.insert("headers".to_string(), json!(headers_map));

        if fail_on_error && !status.is_success() {
            return Ok(StepOutcome::Failure {
                error: format!("{} {} returned {}", method, url, status),
                outputs,
            });
        }
        Ok(StepOutcome::success(outputs))
    }
}
