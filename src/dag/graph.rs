// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::errors::{CidagError, Result};
use crate::matrix::{InstanceId, JobInstance};
use crate::workflow::JobName;

/// Internal node structure: indices of immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    deps: Vec<usize>,
    dependents: Vec<usize>,
}

/// Dependency graph among job instances, indexed like the instance list it
/// was built from.
///
/// An instance depends on every instance of each job it `needs`. A needed job
/// with no instances (empty matrix, or filtered out) contributes no edges.
#[derive(Debug, Clone)]
pub struct InstanceGraph {
    nodes: Vec<DagNode>,
    index: HashMap<InstanceId, usize>,
}

impl InstanceGraph {
    /// Build the graph and reject cycles.
    pub fn build(instances: &[JobInstance]) -> Result<Self> {
        let mut by_job: HashMap<&JobName, Vec<usize>> = HashMap::new();
        let mut index = HashMap::with_capacity(instances.len());
        for (i, inst) in instances.iter().enumerate() {
            by_job.entry(&inst.spec.name).or_default().push(i);
            if index.insert(inst.id.clone(), i).is_some() {
                return Err(CidagError::MalformedDocument(format!(
                    "duplicate job instance '{}'",
                    inst.id
                )));
            }
        }

        let mut nodes = vec![DagNode::default(); instances.len()];
        for (i, inst) in instances.iter().enumerate() {
            for need in &inst.spec.needs {
                match by_job.get(need) {
                    Some(upstream) => {
                        for &u in upstream {
                            nodes[i].deps.push(u);
                            nodes[u].dependents.push(i);
                        }
                    }
                    None => debug!(
                        instance = %inst.id,
                        need = %need,
                        "needed job has no instances in this run"
                    ),
                }
            }
        }

        let graph = Self { nodes, index };
        graph.ensure_acyclic(instances)?;
        Ok(graph)
    }

    fn ensure_acyclic(&self, instances: &[JobInstance]) -> Result<()> {
        let mut g: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            g.add_node(i);
            for &d in &node.deps {
                g.add_edge(d, i, ());
            }
        }
        toposort(&g, None).map(|_| ()).map_err(|cycle| {
            CidagError::CyclicDependency(format!(
                "cycle detected in job graph involving '{}'",
                instances[cycle.node_id()].id
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: &InstanceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Immediate dependencies of an instance.
    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        self.nodes.get(idx).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of an instance.
    pub fn dependents_of(&self, idx: usize) -> &[usize] {
        self.nodes
            .get(idx)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
