/// Runtime input resolution for a node
///
/// Precedence, highest first:
/// 1. outputs of completed ancestors for a declared input name (nearest ancestor wins)
/// 2. static node config, with reference strings expanded
/// 3. context variables
/// 4. schema defaults
///
/// Reference strings are whole config values of the form `$vars.name`,
/// `$trigger.field` or `$node.<id>.field`, with dotted paths into objects.
/// `$node.` only sees ancestors of the node being resolved.

use crate::error::InputError;
use crate::flow::types::FlowNode;
use crate::runtime::context::ExecutionContext;
use crate::step::contract::{FieldType, StepDefinition};
use serde_json::{Map, Value};

pub fn resolve_inputs(
    node: &FlowNode,
    step: &StepDefinition,
    ancestors: &[String],
    context: &ExecutionContext,
) -> Result<Map<String, Value>, InputError> {
    let mut resolved = Map::new();

    for (key, value) in &node.config {
        resolved.insert(key.clone(), expand(value, ancestors, context));
    }

    for input in &step.inputs {
        let upstream = ancestors
            .iter()
            .filter_map(|ancestor| context.output(ancestor))
            .filter_map(|outputs| outputs.get(&input.name))
            .last();
        if let Some(value) = upstream {
            tracing::debug!("🔌 Node '{}' input '{}' taken from upstream output", node.id, input.name);
            resolved.insert(input.name.clone(), value.clone());
            continue;
        }

        if is_unset(resolved.get(&input.name)) {
            let fallback = context
                .variables
                .get(&input.name)
                .filter(|value| !value.is_null())
                .or(input.default.as_ref());
            if let Some(value) = fallback {
                resolved.insert(input.name.clone(), value.clone());
            }
        }
    }

    validate(node, step, &resolved)?;
    Ok(resolved)
}

fn is_unset(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_null)
}

/// Check every declared input against its schema
fn validate(node: &FlowNode, step: &StepDefinition, inputs: &Map<String, Value>) -> Result<(), InputError> {
    for input in &step.inputs {
        let value = match inputs.get(&input.name) {
            Some(value) if !value.is_null() => value,
            _ if input.required => {
                return Err(InputError::Missing {
                    node: node.id.clone(),
                    input: input.name.clone(),
                })
            }
            _ => continue,
        };

        if !input.kind.accepts(value) {
            return Err(InputError::WrongType {
                node: node.id.clone(),
                input: input.name.clone(),
                expected: input.kind.name().to_string(),
                actual: type_name(value).to_string(),
            });
        }

        if input.kind == FieldType::Select && !input.options.is_empty() {
            let choice = value.as_str().unwrap_or_default();
            if !input.options.iter().any(|option| option == choice) {
                return Err(InputError::NotAnOption {
                    node: node.id.clone(),
                    input: input.name.clone(),
                    value: choice.to_string(),
                    options: input.options.clone(),
                });
            }
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Expand reference strings anywhere inside a config value
fn expand(value: &Value, ancestors: &[String], context: &ExecutionContext) -> Value {
    match value {
        Value::String(text) => expand_reference(text, ancestors, context).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|item| expand(item, ancestors, context)).collect()),
        Value::Object(fields) => Value::Object(
            fields.iter()
                .map(|(key, item)| (key.clone(), expand(item, ancestors, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `None` means the string is a plain literal
fn expand_reference(text: &str, ancestors: &[String], context: &ExecutionContext) -> Option<Value> {
    if let Some(path) = text.strip_prefix("$vars.") {
        let (name, rest) = split_first(path);
        let root = context.variables.get(name).cloned().unwrap_or(Value::Null);
        return Some(lookup(&root, rest));
    }

    if text == "$trigger" {
        return Some(context.trigger_data.clone());
    }
    if let Some(path) = text.strip_prefix("$trigger.") {
        return Some(lookup(&context.trigger_data, Some(path)));
    }

    if let Some(path) = text.strip_prefix("$node.") {
        let (node_id, rest) = split_first(path);
        if !ancestors.iter().any(|ancestor| ancestor == node_id) {
            tracing::warn!("⚠️ Reference '{}' points at a node that is not upstream", text);
            return Some(Value::Null);
        }
        let root = context.output(node_id)
            .map(|outputs| Value::Object(outputs.clone()))
            .unwrap_or(Value::Null);
        return Some(lookup(&root, rest));
    }

    None
}

fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Walk a dotted path through objects (and numeric array indexes)
fn lookup(root: &Value, path: Option<&str>) -> Value {
    let Some(path) = path else {
        return root.clone();
    };
    let mut current = root;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::contract::{InputField, StepCategory};
    use serde_json::json;

    fn step(inputs: Vec<InputField>) -> StepDefinition {
        StepDefinition {
            id: "test.step".into(),
            name: "Test".into(),
            description: String::new(),
            category: StepCategory::Logic,
            icon: String::new(),
            inputs,
            outputs: Vec::new(),
        }
    }

    fn node(config: Value) -> FlowNode {
        FlowNode {
            id: "n".into(),
            step_type: "test.step".into(),
            position: Default::default(),
            label: String::new(),
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext::seed("x", "f", &[], &json!({"user": {"name": "ada"}}))
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn upstream_output_beats_static_config() {
        let step = step(vec![InputField::required("x", FieldType::Number, "X")]);
        let mut ctx = context();
        ctx.record_output("up", obj(json!({"x": 2})));

        let inputs = resolve_inputs(&node(json!({"x": 1})), &step, &["up".into()], &ctx).unwrap();
        assert_eq!(inputs["x"], json!(2));
    }

    #[test]
    fn nearest_ancestor_wins_and_non_ancestors_are_invisible() {
        let step = step(vec![InputField::required("x", FieldType::Number, "X")]);
        let mut ctx = context();
        ctx.record_output("far", obj(json!({"x": 1})));
        ctx.record_output("near", obj(json!({"x": 2})));
        ctx.record_output("sibling", obj(json!({"x": 3})));

        let ancestors = vec!["far".to_string(), "near".to_string()];
        let inputs = resolve_inputs(&node(json!({})), &step, &ancestors, &ctx).unwrap();
        assert_eq!(inputs["x"], json!(2));
    }

    #[test]
    fn variables_then_defaults_fill_unresolved_inputs() {
        let step = step(vec![
            InputField::required("repo", FieldType::String, "Repo"),
            InputField::optional("limit", FieldType::Number, "Limit").with_default(json!(10)),
        ]);
        let mut ctx = context();
        ctx.variables.insert("repo".into(), json!("flowloom"));

        let inputs = resolve_inputs(&node(json!({})), &step, &[], &ctx).unwrap();
        assert_eq!(inputs["repo"], json!("flowloom"));
        assert_eq!(inputs["limit"], json!(10));
    }

    #[test]
    fn missing_required_input_is_reported_with_node() {
        let step = step(vec![InputField::required("repo", FieldType::String, "Repo")]);
        let err = resolve_inputs(&node(json!({})), &step, &[], &context()).unwrap_err();
        assert_eq!(err, InputError::Missing { node: "n".into(), input: "repo".into() });
    }

    #[test]
    fn wrong_types_and_unknown_options_are_rejected() {
        let number = step(vec![InputField::required("x", FieldType::Number, "X")]);
        assert!(matches!(
            resolve_inputs(&node(json!({"x": "two"})), &number, &[], &context()),
            Err(InputError::WrongType { .. })
        ));

        let select = step(vec![
            InputField::required("mode", FieldType::Select, "Mode").with_options(&["fast", "slow"]),
        ]);
        assert!(matches!(
            resolve_inputs(&node(json!({"mode": "medium"})), &select, &[], &context()),
            Err(InputError::NotAnOption { .. })
        ));
        assert!(resolve_inputs(&node(json!({"mode": "slow"})), &select, &[], &context()).is_ok());
    }

    #[test]
    fn reference_strings_expand_against_context() {
        let step = step(vec![InputField::optional("payload", FieldType::Json, "Payload")]);
        let mut ctx = context();
        ctx.variables.insert("env".into(), json!({"region": "eu"}));
        ctx.record_output("fetch", obj(json!({"items": [{"id": 7}]})));

        let config = json!({
            "payload": {
                "who": "$trigger.user.name",
                "where": "$vars.env.region",
                "first": "$node.fetch.items.0.id",
                "ghost": "$node.other.value",
                "plain": "hello"
            }
        });
        let inputs = resolve_inputs(&node(config), &step, &["fetch".into()], &ctx).unwrap();
        assert_eq!(
            inputs["payload"],
            json!({"who": "ada", "where": "eu", "first": 7, "ghost": null, "plain": "hello"})
        );
    }
}
