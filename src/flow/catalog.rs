/// Hot-reload flow catalog using ArcSwap
///
/// The gateway is the source of truth; the catalog caches compiled graphs
/// keyed by flow id and swaps the whole map on every change, so walks in
/// progress keep the `Arc<CompiledFlow>` they started with. A cached entry is
/// reused only while its `updated_at` matches the stored record.

use crate::error::EngineError;
use crate::flow::{graph::CompiledFlow, types::FlowDefinition};
use crate::gateway::{records::stored_now, FlowRecord, Gateway};
use crate::step::registry::StepRegistry;
use anyhow::Result;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone)]
struct CachedFlow {
    updated_at: DateTime<Utc>,
    compiled: Arc<CompiledFlow>,
}

pub struct FlowCatalog {
    flows: ArcSwap<HashMap<String, CachedFlow>>,
    gateway: Arc<dyn Gateway>,
    steps: Arc<StepRegistry>,
}

impl FlowCatalog {
    pub fn new(gateway: Arc<dyn Gateway>, steps: Arc<StepRegistry>) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            gateway,
            steps,
        }
    }

    /// Compile every stored flow. Invalid flows are logged and left out;
    /// executions against them fail when they are walked.
    pub async fn init_from_gateway(&self) -> Result<()> {
        let records = self.gateway.list_flows().await?;
        let mut compiled = HashMap::new();

        for record in records {
            match CompiledFlow::compile(record.definition.clone(), &self.steps) {
                Ok(flow) => {
                    compiled.insert(record.id().to_string(), CachedFlow {
                        updated_at: record.updated_at,
                        compiled: Arc::new(flow),
                    });
                }
                Err(e) => tracing::warn!("⚠️ Stored flow '{}' does not compile: {}", record.id(), e),
            }
        }

        self.flows.store(Arc::new(compiled));
        tracing::info!("📚 Initialized flow catalog with {} flows", self.flows.load().len());
        Ok(())
    }

    /// Validate and persist a definition (insert or replace)
    pub async fn save(&self, definition: FlowDefinition, description: String) -> Result<FlowRecord, EngineError> {
        let compiled = CompiledFlow::compile(definition.clone(), &self.steps)?;

        let mut record = FlowRecord::new(definition);
        record.description = description;
        if let Some(existing) = self.gateway.get_flow(record.id()).await? {
            record.created_at = existing.created_at;
            record.active = existing.active;
        }
        self.gateway.save_flow(&record).await?;

        self.cache(record.id(), record.updated_at, Arc::new(compiled));
        tracing::info!("🔥 Hot-reloaded flow: {}", record.id());
        Ok(record)
    }

    /// Compiled graph for a stored flow, recompiling when the record changed
    pub async fn load(&self, flow_id: &str) -> Result<Arc<CompiledFlow>, EngineError> {
        self.fetch(flow_id, false).await
    }

    /// Like `load`, but refuses flows that are switched off. New executions
    /// go through here; walks of existing ones use `load`.
    pub async fn load_active(&self, flow_id: &str) -> Result<Arc<CompiledFlow>, EngineError> {
        self.fetch(flow_id, true).await
    }

    /// Switch a stored flow on or off without touching its definition
    pub async fn set_active(&self, flow_id: &str, active: bool) -> Result<FlowRecord, EngineError> {
        let mut record = self.gateway.get_flow(flow_id).await?
            .ok_or_else(|| EngineError::FlowNotFound(flow_id.to_string()))?;
        let previous = record.updated_at;
        record.active = active;
        record.updated_at = stored_now();
        self.gateway.save_flow(&record).await?;

        // Same definition, so a cached graph stays valid under the new timestamp
        if let Some(cached) = self.flows.load().get(flow_id).filter(|cached| cached.updated_at == previous) {
            self.cache(flow_id, record.updated_at, Arc::clone(&cached.compiled));
        }

        tracing::info!("🔀 Flow '{}' is now {}", flow_id, if active { "active" } else { "inactive" });
        Ok(record)
    }

    async fn fetch(&self, flow_id: &str, require_active: bool) -> Result<Arc<CompiledFlow>, EngineError> {
        let record = self.gateway.get_flow(flow_id).await?
            .ok_or_else(|| EngineError::FlowNotFound(flow_id.to_string()))?;
        if require_active && !record.active {
            return Err(EngineError::FlowInactive(flow_id.to_string()));
        }

        if let Some(cached) = self.flows.load().get(flow_id) {
            if cached.updated_at == record.updated_at {
                return Ok(Arc::clone(&cached.compiled));
            }
        }

        tracing::debug!("🔄 Recompiling flow '{}'", flow_id);
        let compiled = Arc::new(CompiledFlow::compile(record.definition, &self.steps)?);
        self.cache(flow_id, record.updated_at, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Cached graph without touching the gateway
    pub fn get(&self, flow_id: &str) -> Option<Arc<CompiledFlow>> {
        self.flows.load().get(flow_id).map(|cached| Arc::clone(&cached.compiled))
    }

    pub async fn remove(&self, flow_id: &str) -> Result<bool> {
        let removed = self.gateway.delete_flow(flow_id).await?;

        let current = self.flows.load();
        if current.contains_key(flow_id) {
            let mut next = (**current).clone();
            next.remove(flow_id);
            self.flows.store(Arc::new(next));
        }

        if removed {
            tracing::info!("🗑️ Removed flow: {}", flow_id);
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.flows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.load().is_empty()
    }

    fn cache(&self, flow_id: &str, updated_at: DateTime<Utc>, compiled: Arc<CompiledFlow>) {
        self.flows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(flow_id.to_string(), CachedFlow {
                updated_at,
                compiled: Arc::clone(&compiled),
            });
            next
        });
    }
}
