use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use log::trace;

use crate::error::Result;
use crate::execution::sequencer::Sequencer;
use crate::model::{normalize_domain, Attribute, Graph, Node, NodeId, Tensor};
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};

use super::resolve_renames;

/// Operators whose repeated evaluation gives different values
const NONDETERMINISTIC_OPS: &[&str] = &[
    "Bernoulli",
    "Multinomial",
    "RandomNormal",
    "RandomNormalLike",
    "RandomUniform",
    "RandomUniformLike",
];

/// Folds byte-identical initializers and nodes computing the same value
///
/// Candidates are bucketed by a structural hash that samples at most
/// `max_hash_size` elements of every list or tensor; a bucket hit is only
/// folded after an exact comparison.
pub struct RedundantNodeElimination {
    /// Name of the pass
    name: String,
    max_hash_size: usize,
}

/// Nodes and initializers removed from one scope and its nested scopes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FoldCount {
    pub nodes: usize,
    pub initializers: usize,
}

impl RedundantNodeElimination {
    pub fn new(max_hash_size: usize) -> Self {
        Self {
            name: "RedundantNodeElimination".to_string(),
            max_hash_size,
        }
    }

    /// Fold `graph`, whose free names come from `outer`
    pub fn fold(&self, graph: &mut Graph, outer: &HashSet<String>) -> Result<FoldCount> {
        let mut count = FoldCount::default();
        // Folding never adds a dependency, so this order stays valid throughout
        let order = Sequencer::new(graph, outer).order()?;

        // Nested scopes first, so equal subgraphs compare equal afterwards
        let mut visible = outer.clone();
        visible.extend(graph.local_names());
        for node in graph.nodes.iter_mut() {
            for sub in node.subgraphs_mut() {
                let nested = self.fold(sub, &visible)?;
                count.nodes += nested.nodes;
                count.initializers += nested.initializers;
            }
        }

        let pinned = graph.pinned_names();
        let mut renames = self.fold_initializers(graph, &pinned);
        count.initializers += renames.len();
        graph.rename_references(&renames);

        let mut buckets: HashMap<u64, Vec<NodeId>> = HashMap::new();
        let mut removed: HashSet<NodeId> = HashSet::new();

        for id in order {
            graph.nodes[id].rename_references(&renames);
            let node = &graph.nodes[id];
            if NONDETERMINISTIC_OPS.contains(&node.op_type.as_str())
                || node.outputs.iter().all(|o| o.is_empty())
            {
                continue;
            }

            let hash = self.node_hash(node);
            let bucket = buckets.entry(hash).or_default();
            let node_pinned = node.outputs.iter().any(|o| pinned.contains(o));

            let mut folded = false;
            for slot in bucket.iter_mut() {
                let kept = &graph.nodes[*slot];
                if !equivalent(kept, node) {
                    continue;
                }
                let kept_pinned = kept.outputs.iter().any(|o| pinned.contains(o));
                let (survivor, duplicate) = match (kept_pinned, node_pinned) {
                    (_, false) => (*slot, id),
                    (false, true) => (id, *slot),
                    (true, true) => continue,
                };
                trace!(
                    "Folding node '{}' into '{}'",
                    graph.nodes[duplicate].name,
                    graph.nodes[survivor].name
                );
                for (from, to) in graph.nodes[duplicate]
                    .outputs
                    .iter()
                    .zip(&graph.nodes[survivor].outputs)
                {
                    if !from.is_empty() {
                        renames.insert(from.clone(), to.clone());
                    }
                }
                removed.insert(duplicate);
                *slot = survivor;
                folded = true;
                break;
            }
            if !folded {
                bucket.push(id);
            }
        }

        if !removed.is_empty() {
            count.nodes += removed.len();
            let mut index = 0;
            graph.nodes.retain(|_| {
                let keep = !removed.contains(&index);
                index += 1;
                keep
            });
        }
        graph.rename_references(&resolve_renames(&renames));
        Ok(count)
    }

    /// Remove initializers equal to an earlier one and return the renames
    fn fold_initializers(&self, graph: &mut Graph, pinned: &HashSet<String>) -> HashMap<String, String> {
        let inputs: HashSet<String> = graph.input_names().into_iter().collect();
        let mut renames = HashMap::new();
        let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut kept: Vec<Tensor> = Vec::with_capacity(graph.initializers.len());

        for init in std::mem::take(&mut graph.initializers) {
            if inputs.contains(&init.name) || pinned.contains(&init.name) {
                kept.push(init);
                continue;
            }
            let mut hasher = DefaultHasher::new();
            self.hash_tensor(&init, &mut hasher);
            let bucket = buckets.entry(hasher.finish()).or_default();

            let twin = bucket.iter().map(|&i| &kept[i]).find(|k| same_value(k, &init));
            match twin {
                Some(twin) => {
                    trace!("Folding initializer '{}' into '{}'", init.name, twin.name);
                    renames.insert(init.name, twin.name.clone());
                }
                None => {
                    bucket.push(kept.len());
                    kept.push(init);
                }
            }
        }

        graph.initializers = kept;
        renames
    }

    fn node_hash(&self, node: &Node) -> u64 {
        let mut hasher = DefaultHasher::new();
        node.op_type.hash(&mut hasher);
        normalize_domain(&node.domain).hash(&mut hasher);
        node.inputs.hash(&mut hasher);
        for output in &node.outputs {
            output.is_empty().hash(&mut hasher);
        }
        for (name, value) in &node.attributes {
            name.hash(&mut hasher);
            self.hash_attribute(value, &mut hasher);
        }
        hasher.finish()
    }

    fn hash_attribute<H: Hasher>(&self, value: &Attribute, state: &mut H) {
        let limit = self.max_hash_size;
        value.kind().hash(state);
        match value {
            Attribute::Float(f) => f.to_bits().hash(state),
            Attribute::Int(i) => i.hash(state),
            Attribute::String(s) => s.hash(state),
            Attribute::Tensor(t) => self.hash_tensor(t, state),
            Attribute::Graph(g) => self.hash_graph(g, state),
            Attribute::Floats(fs) => {
                fs.len().hash(state);
                fs.iter().take(limit).for_each(|f| f.to_bits().hash(state));
            }
            Attribute::Ints(is) => {
                is.len().hash(state);
                is.iter().take(limit).for_each(|i| i.hash(state));
            }
            Attribute::Strings(ss) => {
                ss.len().hash(state);
                ss.iter().take(limit).for_each(|s| s.hash(state));
            }
            Attribute::Tensors(ts) => {
                ts.len().hash(state);
                ts.iter().take(limit).for_each(|t| self.hash_tensor(t, state));
            }
            Attribute::Graphs(gs) => {
                gs.len().hash(state);
                gs.iter().take(limit).for_each(|g| self.hash_graph(g, state));
            }
        }
    }

    fn hash_tensor<H: Hasher>(&self, tensor: &Tensor, state: &mut H) {
        tensor.data_type.hash(state);
        tensor.dims.hash(state);
        tensor.data.len().hash(state);
        tensor.data.iter().take(self.max_hash_size).for_each(|b| b.hash(state));
        tensor.strings.len().hash(state);
        tensor.strings.iter().take(self.max_hash_size).for_each(|s| s.hash(state));
    }

    fn hash_graph<H: Hasher>(&self, graph: &Graph, state: &mut H) {
        graph.nodes.len().hash(state);
        for node in graph.nodes.iter().take(self.max_hash_size) {
            node.op_type.hash(state);
            node.inputs.hash(state);
        }
        graph.output_names().hash(state);
    }
}

/// Same operation on the same arguments; names and doc strings do not matter
fn equivalent(a: &Node, b: &Node) -> bool {
    a.op_type == b.op_type
        && normalize_domain(&a.domain) == normalize_domain(&b.domain)
        && a.inputs == b.inputs
        && a.outputs.len() == b.outputs.len()
        && a.outputs.iter().zip(&b.outputs).all(|(x, y)| x.is_empty() == y.is_empty())
        && a.attributes.len() == b.attributes.len()
        && a.attributes
            .iter()
            .zip(&b.attributes)
            .all(|((ka, va), (kb, vb))| ka == kb && va.structurally_eq(vb))
}

fn same_value(a: &Tensor, b: &Tensor) -> bool {
    a.data_type == b.data_type && a.dims == b.dims && a.data == b.data && a.strings == b.strings
}

impl OptimizationPass for RedundantNodeElimination {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let count = self.fold(graph, &HashSet::new())?;
        Ok(PassResult::new(&self.name, count.nodes, count.initializers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, TensorInfo};

    fn info(name: &str) -> TensorInfo {
        TensorInfo::new(name, DataType::Float, None)
    }

    fn pass() -> RedundantNodeElimination {
        RedundantNodeElimination::new(1000)
    }

    #[test]
    fn test_equal_nodes_fold_into_the_first() {
        let mut graph = Graph {
            nodes: vec![
                Node::new("Relu", ["x"], ["a"]).with_name("first"),
                Node::new("Relu", ["x"], ["b"]).with_name("second"),
                Node::new("Add", ["a", "b"], ["y"]),
            ],
            inputs: vec![info("x")],
            outputs: vec![info("y")],
            ..Graph::default()
        };
        let count = pass().fold(&mut graph, &HashSet::new()).unwrap();
        assert_eq!(count.nodes, 1);
        assert_eq!(graph.nodes[0].name, "first");
        assert_eq!(graph.nodes[1].inputs, vec!["a", "a"]);
    }

    #[test]
    fn test_later_duplicate_kept_when_it_is_an_output() {
        let mut graph = Graph {
            nodes: vec![
                Node::new("Neg", ["x"], ["a"]),
                Node::new("Relu", ["a"], ["z"]),
                Node::new("Neg", ["x"], ["y"]),
            ],
            inputs: vec![info("x")],
            outputs: vec![info("y"), info("z")],
            ..Graph::default()
        };
        let count = pass().fold(&mut graph, &HashSet::new()).unwrap();
        assert_eq!(count.nodes, 1);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].inputs, vec!["y"]);
        assert_eq!(graph.nodes[1].outputs, vec!["y"]);
    }

    #[test]
    fn test_two_declared_outputs_are_not_folded() {
        let mut graph = Graph {
            nodes: vec![Node::new("Neg", ["x"], ["y"]), Node::new("Neg", ["x"], ["z"])],
            inputs: vec![info("x")],
            outputs: vec![info("y"), info("z")],
            ..Graph::default()
        };
        assert_eq!(pass().fold(&mut graph, &HashSet::new()).unwrap().nodes, 0);
    }

    #[test]
    fn test_attributes_must_match_exactly() {
        let mut graph = Graph {
            nodes: vec![
                Node::new("LeakyRelu", ["x"], ["a"]).with_attribute("alpha", Attribute::Float(0.1)),
                Node::new("LeakyRelu", ["x"], ["b"]).with_attribute("alpha", Attribute::Float(0.2)),
                Node::new("Add", ["a", "b"], ["y"]),
            ],
            inputs: vec![info("x")],
            outputs: vec![info("y")],
            ..Graph::default()
        };
        assert_eq!(pass().fold(&mut graph, &HashSet::new()).unwrap().nodes, 0);
    }

    #[test]
    fn test_hash_collisions_are_resolved_by_comparison() {
        // With a one-element budget both payloads hash alike but differ
        let tiny = RedundantNodeElimination::new(1);
        let mut graph = Graph {
            nodes: vec![Node::new("Add", ["w1", "w2"], ["y"])],
            outputs: vec![info("y")],
            initializers: vec![
                Tensor::from_f32("w1", vec![2], &[1.0, 2.0]),
                Tensor::from_f32("w2", vec![2], &[1.0, 3.0]),
            ],
            ..Graph::default()
        };
        let count = tiny.fold(&mut graph, &HashSet::new()).unwrap();
        assert_eq!(count.initializers, 0);
        assert_eq!(graph.initializers.len(), 2);
    }

    #[test]
    fn test_identical_initializers_fold() {
        let mut graph = Graph {
            nodes: vec![Node::new("Add", ["w1", "w2"], ["y"])],
            outputs: vec![info("y")],
            initializers: vec![
                Tensor::from_f32("w1", vec![2], &[1.0, 2.0]),
                Tensor::from_f32("w2", vec![2], &[1.0, 2.0]),
            ],
            ..Graph::default()
        };
        let count = pass().fold(&mut graph, &HashSet::new()).unwrap();
        assert_eq!(count.initializers, 1);
        assert_eq!(graph.nodes[0].inputs, vec!["w1", "w1"]);
    }

    #[test]
    fn test_cyclic_graph_is_left_untouched() {
        let mut graph = Graph {
            nodes: vec![
                Node::new("Add", ["b", "w1"], ["a"]),
                Node::new("Add", ["a", "w2"], ["b"]),
            ],
            outputs: vec![info("b")],
            initializers: vec![
                Tensor::from_f32("w1", vec![1], &[1.0]),
                Tensor::from_f32("w2", vec![1], &[1.0]),
            ],
            ..Graph::default()
        };
        let before = graph.clone();
        assert!(pass().fold(&mut graph, &HashSet::new()).is_err());
        assert_eq!(graph, before);
    }

    #[test]
    fn test_random_nodes_are_never_folded() {
        let mut graph = Graph {
            nodes: vec![
                Node::new("RandomUniformLike", ["x"], ["a"]),
                Node::new("RandomUniformLike", ["x"], ["b"]),
                Node::new("Add", ["a", "b"], ["y"]),
            ],
            inputs: vec![info("x")],
            outputs: vec![info("y")],
            ..Graph::default()
        };
        assert_eq!(pass().fold(&mut graph, &HashSet::new()).unwrap().nodes, 0);
    }
}
