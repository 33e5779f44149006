mod error;

pub use crate::error::DagError;

use catalog::SyncMapping;
use log::info;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::prelude::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Instant;

pub type DagResult<T> = Result<T, DagError>;

#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyEdge;

/// One mapping in the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DagNode {
    pub name: String,
    pub entity_type: String,
    pub active: bool,
    /// Entity types that must be synced first.
    pub dependencies: BTreeSet<String>,
}

/// Sync order of mappings derived from their `dependencies` hints.
///
/// Edges point from a dependency to its dependent, so a topological order
/// syncs every entity type before the mappings that reference it.
#[derive(Debug, Default)]
pub struct MappingDag {
    pub graph: DiGraph<DagNode, EmptyEdge>,
    pub ref_to_index: HashMap<String, NodeIndex>,
    entity_to_index: HashMap<String, Vec<NodeIndex>>,
}

impl MappingDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(mappings: &[SyncMapping]) -> DagResult<Self> {
        let started = Instant::now();
        let mut dag = Self::new();

        // First pass - one node per mapping
        for mapping in mappings {
            if dag.ref_to_index.contains_key(&mapping.name) {
                return Err(DagError::DuplicateNode(mapping.name.clone()));
            }
            let idx = dag.graph.add_node(DagNode {
                name: mapping.name.clone(),
                entity_type: mapping.entity_type.clone(),
                active: mapping.active,
                dependencies: mapping.mapping_config.dependencies.iter().cloned().collect(),
            });
            dag.ref_to_index.insert(mapping.name.clone(), idx);
            dag.entity_to_index
                .entry(mapping.entity_type.clone())
                .or_default()
                .push(idx);
        }

        // Second pass - dependency edges
        let nodes: Vec<NodeIndex> = dag.graph.node_indices().collect();
        for idx in nodes {
            let node = dag.graph[idx].clone();
            for dep in &node.dependencies {
                let providers = dag.entity_to_index.get(dep).cloned().ok_or_else(|| {
                    DagError::MissingDependency {
                        mapping: node.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                for provider in providers {
                    if provider == idx {
                        return Err(DagError::CycleDetected(vec![node.name.clone()]));
                    }
                    dag.graph.update_edge(provider, idx, EmptyEdge);
                }
            }
        }

        dag.toposort()?;
        info!(
            "Built mapping DAG with {} nodes and {} edges in {:?}",
            dag.graph.node_count(),
            dag.graph.edge_count(),
            started.elapsed()
        );
        Ok(dag)
    }

    pub fn get(&self, name: &str) -> Option<&DagNode> {
        self.ref_to_index.get(name).map(|idx| &self.graph[*idx])
    }

    pub fn toposort(&self) -> Result<Vec<NodeIndex>, DagError> {
        let order = toposort(&self.graph, None).map_err(|_| {
            // Attempt to extract cycle from SCC (strongly connected components)
            let cyclic_refs = kosaraju_scc(&self.graph)
                .into_iter()
                .find(|scc| scc.len() > 1)
                .unwrap_or_default();

            let mut cycle: Vec<String> = cyclic_refs
                .into_iter()
                .map(|idx| self.graph[idx].name.clone())
                .collect();
            cycle.sort();

            DagError::CycleDetected(cycle)
        })?;

        Ok(order)
    }

    /// Every mapping, dependencies first. Ties are broken by name so the
    /// order is the same on every run.
    pub fn execution_order(&self) -> DagResult<Vec<&DagNode>> {
        self.ordered(None)
    }

    /// `key` (a mapping name or entity type) and everything it depends on,
    /// dependencies first.
    pub fn order_for(&self, key: &str) -> DagResult<Vec<&DagNode>> {
        let starts: Vec<NodeIndex> = match self.ref_to_index.get(key) {
            Some(idx) => vec![*idx],
            None => self
                .entity_to_index
                .get(key)
                .cloned()
                .ok_or_else(|| DagError::NotFound(key.to_string()))?,
        };

        let mut included = BTreeSet::new();
        for start in starts {
            included.insert(start);
            included.extend(self.traverse(start, Direction::Incoming));
        }
        self.ordered(Some(&included))
    }

    pub fn traverse(&self, start: NodeIndex, direction: Direction) -> BTreeSet<NodeIndex> {
        let mut visited = BTreeSet::new();
        let mut stack = VecDeque::new();
        stack.push_back(start);

        while let Some(current_idx) = stack.pop_back() {
            for dep_idx in self.graph.neighbors_directed(current_idx, direction) {
                if visited.insert(dep_idx) {
                    stack.push_back(dep_idx);
                }
            }
        }

        visited
    }

    /// Kahn's algorithm with a name-ordered ready set.
    fn ordered(&self, included: Option<&BTreeSet<NodeIndex>>) -> DagResult<Vec<&DagNode>> {
        let keep = |idx: &NodeIndex| included.map_or(true, |set| set.contains(idx));

        let mut pending: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .filter(keep)
            .map(|idx| {
                let deps = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .filter(keep)
                    .count();
                (idx, deps)
            })
            .collect();

        let mut ready: BTreeSet<(&str, NodeIndex)> = pending
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(idx, _)| (self.graph[*idx].name.as_str(), *idx))
            .collect();

        let mut order = Vec::with_capacity(pending.len());
        while let Some((_, idx)) = ready.pop_first() {
            pending.remove(&idx);
            order.push(&self.graph[idx]);
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let next = edge.target();
                if let Some(deps) = pending.get_mut(&next) {
                    *deps -= 1;
                    if *deps == 0 {
                        ready.insert((self.graph[next].name.as_str(), next));
                    }
                }
            }
        }

        if !pending.is_empty() {
            self.toposort()?;
        }
        Ok(order)
    }

    /// Produce a DOT-format string representing the DAG. Handy for quick terminal debugging.
    pub fn to_dot_string(&self) -> String {
        let mut dot = String::from("digraph {\n    rankdir=LR;\n");
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            dot.push_str(&format!(
                "    {} [label=\"{} ({})\"];\n",
                idx.index(),
                node.name,
                node.entity_type
            ));
        }
        for edge in self.graph.edge_references() {
            dot.push_str(&format!(
                "    {} -> {};\n",
                edge.source().index(),
                edge.target().index()
            ));
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{Getter, MemoryCatalog, Register};
    use common::config::{MappingConfig, MappingDefinition};
    use serde_json::json;

    fn init_logs() {
        let _ = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
    }

    fn mappings(decls: &[(&str, &str, &[&str])]) -> Vec<SyncMapping> {
        let catalog = MemoryCatalog::new();
        for (name, entity, deps) in decls {
            let def = MappingDefinition {
                name: name.to_string(),
                entity_type: entity.to_string(),
                source: "legacy_erp".into(),
                target: "pyerp".into(),
                source_config: json!({}),
                target_config: json!({}),
                mapping_config: MappingConfig {
                    dependencies: deps.iter().map(|d| d.to_string()).collect(),
                    ..Default::default()
                },
                active: true,
            };
            catalog.register_mapping(def).unwrap();
        }
        catalog.list_mappings()
    }

    fn names(nodes: Vec<&DagNode>) -> Vec<&str> {
        nodes.into_iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn dependencies_come_first() -> Result<(), DagError> {
        init_logs();
        let dag = MappingDag::build(&mappings(&[
            ("sales_orders", "sales_order", &["customer", "product"]),
            ("products", "product", &["product_category"]),
            ("customers", "customer", &[]),
            ("categories", "product_category", &[]),
        ]))?;

        assert_eq!(
            names(dag.execution_order()?),
            vec!["categories", "customers", "products", "sales_orders"]
        );
        assert_eq!(
            names(dag.order_for("product")?),
            vec!["categories", "products"]
        );
        assert_eq!(names(dag.order_for("customers")?), vec!["customers"]);
        assert!(matches!(dag.order_for("invoice"), Err(DagError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn cycles_are_reported_with_their_members() {
        let err = MappingDag::build(&mappings(&[
            ("a", "alpha", &["beta"]),
            ("b", "beta", &["alpha"]),
            ("c", "gamma", &[]),
        ]))
        .unwrap_err();
        assert_eq!(err, DagError::CycleDetected(vec!["a".into(), "b".into()]));

        let err = MappingDag::build(&mappings(&[("a", "alpha", &["alpha"])])).unwrap_err();
        assert_eq!(err, DagError::CycleDetected(vec!["a".into()]));
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let err = MappingDag::build(&mappings(&[("products", "product", &["supplier"])]))
            .unwrap_err();
        assert_eq!(
            err,
            DagError::MissingDependency {
                mapping: "products".into(),
                dependency: "supplier".into()
            }
        );
    }

    #[test]
    fn dot_output_lists_edges() -> Result<(), DagError> {
        let dag = MappingDag::build(&mappings(&[
            ("products", "product", &["customer"]),
            ("customers", "customer", &[]),
        ]))?;
        let dot = dag.to_dot_string();
        assert!(dot.contains("rankdir=LR"));
        assert!(dot.contains("->"));
        Ok(())
    }
}
