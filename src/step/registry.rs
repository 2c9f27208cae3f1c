/// Step registry
///
/// Maps step-type ids to implementations. Built once at process start and
/// shared read-only behind an `Arc`, so concurrent lookups need no locking.
/// Tests build a fresh registry each.

use crate::step::contract::{Step, StepDefinition};
use anyhow::Result;
use std::{collections::HashMap, sync::Arc};

#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in step
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for step in crate::step::builtin::all() {
            // Built-in ids are unique, a clash here is a programming error caught by tests
            if let Err(e) = registry.register(step) {
                tracing::error!("❌ Failed to register built-in step: {}", e);
            }
        }
        registry
    }

    /// Add a step; ids must be unique
    pub fn register(&mut self, step: Arc<dyn Step>) -> Result<()> {
        let id = step.definition().id.clone();
        if self.steps.contains_key(&id) {
            return Err(anyhow::anyhow!("Step type already registered: {}", id));
        }
        tracing::debug!("🧩 Registered step type: {}", id);
        self.steps.insert(id, step);
        Ok(())
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(step_type).cloned()
    }

    pub fn definition(&self, step_type: &str) -> Option<&StepDefinition> {
        self.steps.get(step_type).map(|step| step.definition())
    }

    /// Catalog of all step definitions, sorted by id
    pub fn definitions(&self) -> Vec<StepDefinition> {
        let mut definitions: Vec<StepDefinition> = self
            .steps
            .values()
            .map(|step| step.definition().clone())
            .collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.steps.keys().collect();
        ids.sort();
        f.debug_struct("StepRegistry").field("steps", &ids).finish()
    }
}
