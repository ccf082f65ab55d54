use std::collections::{HashMap, HashSet};

use log::trace;

use crate::error::Result;
use crate::model::{Graph, NodeId};
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};

use super::total_nodes;

/// Removes nodes and initializers that no declared output depends on
pub struct DeadCodeElimination {
    /// Name of the pass
    name: String,
}

impl DeadCodeElimination {
    pub fn new() -> Self {
        Self {
            name: "DeadCodeElimination".to_string(),
        }
    }

    /// Sweep `graph` and its nested graphs, returning (nodes, initializers) removed
    pub fn sweep(graph: &mut Graph) -> (usize, usize) {
        let mut nodes_removed = 0;
        let mut initializers_removed = 0;
        for node in graph.nodes.iter_mut() {
            for sub in node.subgraphs_mut() {
                let (n, i) = Self::sweep(sub);
                nodes_removed += n;
                initializers_removed += i;
            }
        }

        let live = Self::live_nodes(graph);
        if live.len() < graph.nodes.len() {
            let nodes = std::mem::take(&mut graph.nodes);
            graph.nodes = nodes
                .into_iter()
                .enumerate()
                .filter_map(|(id, node)| {
                    if live.contains(&id) {
                        Some(node)
                    } else {
                        trace!("Removing dead node '{}' ({})", node.name, node.op_type);
                        nodes_removed += 1 + node.subgraphs().map(total_nodes).sum::<usize>();
                        None
                    }
                })
                .collect();
        }

        let mut referenced: HashSet<String> = graph
            .nodes
            .iter()
            .flat_map(|n| n.dependencies())
            .collect();
        referenced.extend(graph.output_names());
        referenced.extend(graph.input_names());
        let before = graph.initializers.len();
        graph.initializers.retain(|init| referenced.contains(&init.name));
        initializers_removed += before - graph.initializers.len();

        (nodes_removed, initializers_removed)
    }

    /// Nodes reachable backwards from the declared outputs
    fn live_nodes(graph: &Graph) -> HashSet<NodeId> {
        let mut producer: HashMap<&str, NodeId> = HashMap::new();
        for (id, node) in graph.nodes.iter().enumerate() {
            for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                producer.insert(output.as_str(), id);
            }
        }

        let mut live = HashSet::new();
        let mut pending: Vec<NodeId> = graph
            .outputs
            .iter()
            .filter_map(|o| producer.get(o.name.as_str()).copied())
            .collect();
        while let Some(id) = pending.pop() {
            if !live.insert(id) {
                continue;
            }
            for dep in graph.nodes[id].dependencies() {
                if let Some(&p) = producer.get(dep.as_str()) {
                    pending.push(p);
                }
            }
        }
        live
    }
}

impl Default for DeadCodeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for DeadCodeElimination {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let (nodes, initializers) = Self::sweep(graph);
        Ok(PassResult::new(&self.name, nodes, initializers))
    }
}
