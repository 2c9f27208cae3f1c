/// Flow compilation into a petgraph DAG
///
/// Validates a flow definition against the step registry and precomputes
/// everything the engine needs per walk: topological order, entry points,
/// incoming edges and ancestor sets.

use crate::error::FlowError;
use crate::flow::types::{FlowDefinition, FlowEdge, FlowNode};
use crate::step::{contract::StepCategory, registry::StepRegistry};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Execution-ready flow
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    pub definition: FlowDefinition,
    /// Node weights are node ids, edge weights index into `definition.edges`
    graph: DiGraph<String, usize>,
    node_id_to_index: HashMap<String, NodeIndex>,
    order: Vec<String>,
    triggers: Vec<String>,
    /// Transitive predecessors per node, in topological order
    ancestors: HashMap<String, Vec<String>>,
}

impl CompiledFlow {
    /// Validate and compile a definition
    pub fn compile(definition: FlowDefinition, steps: &StepRegistry) -> Result<Self, FlowError> {
        tracing::debug!("🏗️ Compiling flow '{}' ({} nodes, {} edges)",
            definition.id, definition.nodes.len(), definition.edges.len());

        if definition.nodes.is_empty() {
            return Err(FlowError::Empty);
        }

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();
        let mut triggers = Vec::new();

        for node in &definition.nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(FlowError::DuplicateNode(node.id.clone()));
            }
            let step = steps.definition(&node.step_type).ok_or_else(|| FlowError::UnknownStepType {
                node: node.id.clone(),
                step_type: node.step_type.clone(),
            })?;
            if step.category == StepCategory::Trigger {
                triggers.push(node.id.clone());
            }
            let index = graph.add_node(node.id.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        for (position, edge) in definition.edges.iter().enumerate() {
            let lookup = |id: &str| {
                node_id_to_index.get(id).copied().ok_or_else(|| FlowError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: id.to_string(),
                })
            };
            let from = lookup(&edge.source)?;
            let to = lookup(&edge.target)?;
            graph.add_edge(from, to, position);
        }

        if triggers.is_empty() {
            return Err(FlowError::NoTrigger);
        }
        for trigger in &triggers {
            let index = node_id_to_index[trigger];
            if graph.edges_directed(index, Direction::Incoming).next().is_some() {
                return Err(FlowError::TriggerHasIncoming(trigger.clone()));
            }
        }

        let topo = toposort(&graph, None)
            .map_err(|cycle| FlowError::Cycle(graph[cycle.node_id()].clone()))?;
        let order: Vec<String> = topo.iter().map(|&index| graph[index].clone()).collect();

        // Ancestors accumulate along topological order so predecessors are always ready
        let position: HashMap<&str, usize> = order.iter().enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut ancestor_sets: HashMap<String, HashSet<String>> = HashMap::new();
        for &index in &topo {
            let mut set = HashSet::new();
            for predecessor in graph.neighbors_directed(index, Direction::Incoming) {
                let id = &graph[predecessor];
                set.insert(id.clone());
                if let Some(inherited) = ancestor_sets.get(id) {
                    set.extend(inherited.iter().cloned());
                }
            }
            ancestor_sets.insert(graph[index].clone(), set);
        }
        let ancestors = ancestor_sets.into_iter()
            .map(|(id, set)| {
                let mut list: Vec<String> = set.into_iter().collect();
                list.sort_by_key(|ancestor| position[ancestor.as_str()]);
                (id, list)
            })
            .collect();

        let compiled = Self {
            definition,
            graph,
            node_id_to_index,
            order,
            triggers,
            ancestors,
        };
        compiled.check_ambiguous_inputs(steps)?;

        tracing::debug!("✅ Flow '{}' compiled, order: {:?}", compiled.definition.id, compiled.order);
        Ok(compiled)
    }

    /// Two direct predecessors producing the same consumed key make resolution
    /// depend on arrival order, which is rejected up front.
    fn check_ambiguous_inputs(&self, steps: &StepRegistry) -> Result<(), FlowError> {
        for node in &self.definition.nodes {
            let Some(step) = steps.definition(&node.step_type) else { continue };
            let predecessors = self.predecessors(&node.id);
            for input in &step.inputs {
                let producers: Vec<&str> = predecessors.iter()
                    .filter(|p| steps.definition(&p.step_type)
                        .is_some_and(|d| d.category != StepCategory::Trigger && d.declares_output(&input.name)))
                    .map(|p| p.id.as_str())
                    .collect();
                if let [first, second, ..] = producers.as_slice() {
                    return Err(FlowError::AmbiguousInput {
                        node: node.id.clone(),
                        input: input.name.clone(),
                        first: first.to_string(),
                        second: second.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Distinct direct predecessors of a node, in topological order
    fn predecessors(&self, node_id: &str) -> Vec<&FlowNode> {
        let mut ids: Vec<&str> = self.incoming(node_id).iter().map(|e| e.source.as_str()).collect();
        ids.sort();
        ids.dedup();
        let mut nodes: Vec<&FlowNode> = ids.into_iter().filter_map(|id| self.definition.node(id)).collect();
        nodes.sort_by_key(|n| self.order.iter().position(|id| id == &n.id));
        nodes
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Node ids in execution order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.definition.node(id)
    }

    /// Incoming edges of a node, in definition order
    pub fn incoming(&self, node_id: &str) -> Vec<&FlowEdge> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| *edge.weight())
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|p| &self.definition.edges[p]).collect()
    }

    /// All transitive predecessors of a node, in topological order
    pub fn ancestors(&self, node_id: &str) -> &[String] {
        self.ancestors.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }
}
