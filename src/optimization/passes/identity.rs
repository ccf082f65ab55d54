use std::collections::HashMap;

use log::trace;

use crate::error::Result;
use crate::model::{normalize_domain, Graph, Node};
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};

use super::resolve_renames;

/// Removes `Identity` nodes and rewires their consumers to the source value
pub struct IdentityElimination {
    /// Name of the pass
    name: String,
}

impl IdentityElimination {
    pub fn new() -> Self {
        Self {
            name: "IdentityElimination".to_string(),
        }
    }

    /// A plain default-domain Identity with one input and one output
    pub fn is_elidable(node: &Node) -> bool {
        node.op_type == "Identity"
            && normalize_domain(&node.domain).is_empty()
            && node.attributes.is_empty()
            && node.inputs.len() == 1
            && node.outputs.len() == 1
            && !node.inputs[0].is_empty()
            && !node.outputs[0].is_empty()
    }

    /// Elide identities in `graph` and its nested graphs, returning how many were removed
    pub fn eliminate(graph: &mut Graph) -> usize {
        let mut removed = 0;
        for node in graph.nodes.iter_mut() {
            for sub in node.subgraphs_mut() {
                removed += Self::eliminate(sub);
            }
        }

        let pinned = graph.pinned_names();
        let mut renames = HashMap::new();
        let nodes = std::mem::take(&mut graph.nodes);
        graph.nodes = nodes
            .into_iter()
            .filter_map(|node| {
                if Self::is_elidable(&node) && !pinned.contains(&node.outputs[0]) {
                    trace!("Eliding identity '{}': {} -> {}", node.name, node.outputs[0], node.inputs[0]);
                    renames.insert(node.outputs[0].clone(), node.inputs[0].clone());
                    None
                } else {
                    Some(node)
                }
            })
            .collect();

        removed += renames.len();
        graph.rename_references(&resolve_renames(&renames));
        removed
    }
}

impl Default for IdentityElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for IdentityElimination {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let removed = Self::eliminate(graph);
        Ok(PassResult::new(&self.name, removed, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, DataType, TensorInfo};

    fn info(name: &str) -> TensorInfo {
        TensorInfo::new(name, DataType::Float, None)
    }

    #[test]
    fn test_declared_output_identity_is_kept() {
        let mut graph = Graph {
            nodes: vec![
                Node::new("Identity", ["x"], ["a"]),
                Node::new("Relu", ["a"], ["b"]),
                Node::new("Identity", ["b"], ["y"]),
            ],
            inputs: vec![info("x")],
            outputs: vec![info("y")],
            ..Graph::default()
        };
        assert_eq!(IdentityElimination::eliminate(&mut graph), 1);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].inputs, vec!["x"]);
        assert_eq!(graph.nodes[1].outputs, vec!["y"]);
    }

    #[test]
    fn test_identity_with_attributes_or_domain_is_kept() {
        let custom = Node::new("Identity", ["x"], ["a"]).with_domain("custom");
        let tagged = Node::new("Identity", ["x"], ["a"]).with_attribute("tag", Attribute::Int(1));
        assert!(!IdentityElimination::is_elidable(&custom));
        assert!(!IdentityElimination::is_elidable(&tagged));
        assert!(IdentityElimination::is_elidable(
            &Node::new("Identity", ["x"], ["a"]).with_domain("ai.onnx")
        ));
    }

    #[test]
    fn test_nested_references_follow_the_rename() {
        let branch = Graph {
            nodes: vec![Node::new("Neg", ["a"], ["t"])],
            outputs: vec![info("t")],
            ..Graph::default()
        };
        let mut graph = Graph {
            nodes: vec![
                Node::new("Identity", ["x"], ["a"]),
                Node::new("If", ["c"], ["y"])
                    .with_attribute("then_branch", Attribute::Graph(branch.clone()))
                    .with_attribute("else_branch", Attribute::Graph(branch)),
            ],
            inputs: vec![info("x"), info("c")],
            outputs: vec![info("y")],
            ..Graph::default()
        };
        assert_eq!(IdentityElimination::eliminate(&mut graph), 1);
        let branches: Vec<&Graph> = graph.nodes[0].subgraphs().collect();
        assert!(branches.iter().all(|b| b.nodes[0].inputs == vec!["x"]));
    }

    #[test]
    fn test_value_exposed_by_branch_output_is_pinned() {
        let branch = Graph {
            outputs: vec![info("a")],
            ..Graph::default()
        };
        let mut graph = Graph {
            nodes: vec![
                Node::new("Identity", ["x"], ["a"]),
                Node::new("If", ["c"], ["y"])
                    .with_attribute("then_branch", Attribute::Graph(branch.clone()))
                    .with_attribute("else_branch", Attribute::Graph(branch)),
            ],
            inputs: vec![info("x"), info("c")],
            outputs: vec![info("y")],
            ..Graph::default()
        };
        assert_eq!(IdentityElimination::eliminate(&mut graph), 0);
    }
}
