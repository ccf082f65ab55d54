//! Dependency ordering and liveness analysis for one graph scope.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use crate::error::{Error, Result, ScheduleFailure};
use crate::model::{Graph, NodeId};

/// Where a name gets its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// An initializer of this graph
    Constant,
    /// A declared input of this graph
    Input,
    /// A value of an enclosing scope
    Outer,
    /// The output of a node of this graph
    Node(NodeId),
}

/// One scheduled node together with the values that die after it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub node: NodeId,
    pub release: Vec<String>,
}

/// Nodes of one graph in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionSequence {
    pub instructions: Vec<Instruction>,
}

impl InstructionSequence {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn node_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.instructions.iter().map(|i| i.node)
    }
}

/// Orders the nodes of a graph so that every value is produced before it is read
///
/// `outer` holds the names visible from enclosing scopes; a top-level graph
/// passes an empty set.
pub struct Sequencer<'g> {
    graph: &'g Graph,
    outer: &'g HashSet<String>,
}

impl<'g> Sequencer<'g> {
    pub fn new(graph: &'g Graph, outer: &'g HashSet<String>) -> Self {
        Self { graph, outer }
    }

    /// Source of every name the graph defines or reads from outside
    ///
    /// Fails on the first output name that is claimed twice.
    pub fn classify(&self) -> Result<HashMap<String, ValueSource>> {
        let mut sources = HashMap::new();
        for init in &self.graph.initializers {
            sources.insert(init.name.clone(), ValueSource::Constant);
        }
        for input in &self.graph.inputs {
            sources.insert(input.name.clone(), ValueSource::Input);
        }
        for (id, node) in self.graph.nodes.iter().enumerate() {
            for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                if let Some(ValueSource::Node(_)) = sources.get(output) {
                    return Err(duplicate_output(output, &self.node_label(id)));
                }
                sources.insert(output.clone(), ValueSource::Node(id));
            }
        }
        for name in self.outer {
            sources.entry(name.clone()).or_insert(ValueSource::Outer);
        }
        Ok(sources)
    }

    /// Node ids in execution order
    pub fn order(&self) -> Result<Vec<NodeId>> {
        let nodes = &self.graph.nodes;
        let dependencies: Vec<Vec<String>> = nodes.iter().map(|n| n.dependencies()).collect();

        let mut ordered: HashSet<&str> = HashSet::new();
        ordered.extend(self.graph.initializers.iter().map(|t| t.name.as_str()));
        ordered.extend(self.graph.inputs.iter().map(|i| i.name.as_str()));
        ordered.extend(self.outer.iter().map(String::as_str));

        let mut order = Vec::with_capacity(nodes.len());
        let mut scheduled = vec![false; nodes.len()];

        loop {
            let mut progressed = false;
            for (id, node) in nodes.iter().enumerate() {
                if scheduled[id] || !dependencies[id].iter().all(|d| ordered.contains(d.as_str())) {
                    continue;
                }
                for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                    if !ordered.insert(output.as_str()) {
                        return Err(duplicate_output(output, &self.node_label(id)));
                    }
                }
                trace!("Scheduled node {} at position {}", self.node_label(id), order.len());
                scheduled[id] = true;
                order.push(id);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        if order.len() < nodes.len() {
            let remaining: Vec<NodeId> = (0..nodes.len()).filter(|&id| !scheduled[id]).collect();
            return Err(Error::CyclicOrUnresolvedGraph(
                self.diagnose(&remaining, &dependencies)?,
            ));
        }
        Ok(order)
    }

    /// Execution order plus, per instruction, the local values read for the last time
    pub fn sequence(&self) -> Result<InstructionSequence> {
        let order = self.order()?;
        let declared: HashSet<&str> = self.graph.outputs.iter().map(|o| o.name.as_str()).collect();
        let local = self.graph.local_names();

        // Position of the last instruction reading each local name
        let mut last_use: HashMap<String, usize> = HashMap::new();
        for (position, &id) in order.iter().enumerate() {
            for name in self.graph.nodes[id].dependencies() {
                if local.contains(&name) {
                    last_use.insert(name, position);
                }
            }
        }

        let mut instructions: Vec<Instruction> = order
            .iter()
            .map(|&node| Instruction {
                node,
                release: Vec::new(),
            })
            .collect();

        for (name, &position) in &last_use {
            if !declared.contains(name.as_str()) {
                instructions[position].release.push(name.clone());
            }
        }

        // Outputs nobody reads die where they are produced
        for (position, &id) in order.iter().enumerate() {
            for output in &self.graph.nodes[id].outputs {
                if output.is_empty() || declared.contains(output.as_str()) {
                    continue;
                }
                if !last_use.contains_key(output) {
                    instructions[position].release.push(output.clone());
                }
            }
        }

        for instruction in instructions.iter_mut() {
            instruction.release.sort();
            instruction.release.dedup();
        }

        debug!(
            "Sequenced graph '{}': {} instructions",
            self.graph.name,
            instructions.len()
        );
        Ok(InstructionSequence { instructions })
    }

    /// Explain why `remaining` could not be scheduled
    fn diagnose(&self, remaining: &[NodeId], dependencies: &[Vec<String>]) -> Result<ScheduleFailure> {
        let sources = self.classify()?;

        for &id in remaining {
            if let Some(missing) = dependencies[id].iter().find(|d| !sources.contains_key(*d)) {
                return Ok(ScheduleFailure::Unresolved {
                    node: self.node_label(id),
                    input: missing.clone(),
                });
            }
        }

        let mut graph = DiGraph::<NodeId, ()>::new();
        let indices: HashMap<NodeId, _> = remaining.iter().map(|&id| (id, graph.add_node(id))).collect();
        for &id in remaining {
            for dep in &dependencies[id] {
                if let Some(ValueSource::Node(producer)) = sources.get(dep) {
                    if let (Some(&from), Some(&to)) = (indices.get(producer), indices.get(&id)) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        let cycle = tarjan_scc(&graph)
            .into_iter()
            .find(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map_or(false, |&n| graph.find_edge(n, n).is_some())
            })
            .map(|component| {
                let mut ids: Vec<NodeId> = component.into_iter().map(|n| graph[n]).collect();
                ids.sort_unstable();
                ids
            })
            .unwrap_or_else(|| remaining.to_vec());

        Ok(ScheduleFailure::Cycle {
            nodes: cycle.into_iter().map(|id| self.node_label(id)).collect(),
        })
    }

    fn node_label(&self, id: NodeId) -> String {
        let node = &self.graph.nodes[id];
        if node.name.is_empty() {
            format!("#{} ({})", id, node.op_type)
        } else {
            node.name.clone()
        }
    }
}

fn duplicate_output(name: &str, node: &str) -> Error {
    Error::CyclicOrUnresolvedGraph(ScheduleFailure::DuplicateOutput {
        name: name.to_string(),
        node: node.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, DataType, Node, TensorInfo};

    fn info(name: &str) -> TensorInfo {
        TensorInfo::new(name, DataType::Float, None)
    }

    fn graph(nodes: Vec<Node>, inputs: &[&str], outputs: &[&str]) -> Graph {
        Graph {
            name: "g".to_string(),
            nodes,
            inputs: inputs.iter().map(|n| info(n)).collect(),
            outputs: outputs.iter().map(|n| info(n)).collect(),
            ..Graph::default()
        }
    }

    fn sequence(g: &Graph) -> Result<InstructionSequence> {
        let outer = HashSet::new();
        Sequencer::new(g, &outer).sequence()
    }

    #[test]
    fn test_orders_nodes_declared_out_of_order() {
        let g = graph(
            vec![
                Node::new("Relu", ["b"], ["c"]).with_name("second"),
                Node::new("Neg", ["a"], ["b"]).with_name("first"),
            ],
            &["a"],
            &["c"],
        );
        let seq = sequence(&g).unwrap();
        assert_eq!(seq.node_order().collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn test_release_sets_follow_last_use() {
        let g = graph(
            vec![
                Node::new("Neg", ["a"], ["b"]),
                Node::new("Add", ["a", "b"], ["c"]),
                Node::new("Relu", ["c"], ["d"]),
            ],
            &["a"],
            &["d"],
        );
        let seq = sequence(&g).unwrap();
        assert!(seq.instructions[0].release.is_empty());
        assert_eq!(seq.instructions[1].release, vec!["a", "b"]);
        assert_eq!(seq.instructions[2].release, vec!["c"]);
    }

    #[test]
    fn test_declared_outputs_are_never_released() {
        let g = graph(
            vec![Node::new("Neg", ["a"], ["b"]), Node::new("Relu", ["b"], ["c"])],
            &["a"],
            &["b", "c"],
        );
        let seq = sequence(&g).unwrap();
        assert!(seq.instructions.iter().all(|i| !i.release.contains(&"b".to_string())));
    }

    #[test]
    fn test_unread_outputs_released_by_their_producer() {
        let g = graph(
            vec![
                Node::new("TopK", ["a", "k"], ["values", "indices"]),
                Node::new("Relu", ["values"], ["out"]),
            ],
            &["a", "k"],
            &["out"],
        );
        let seq = sequence(&g).unwrap();
        assert!(seq.instructions[0].release.contains(&"indices".to_string()));
    }

    #[test]
    fn test_duplicate_output_fails() {
        let g = graph(
            vec![
                Node::new("Neg", ["a"], ["b"]).with_name("n1"),
                Node::new("Abs", ["a"], ["b"]).with_name("n2"),
            ],
            &["a"],
            &["b"],
        );
        match sequence(&g) {
            Err(Error::CyclicOrUnresolvedGraph(ScheduleFailure::DuplicateOutput { name, .. })) => {
                assert_eq!(name, "b")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_input_is_named() {
        let g = graph(vec![Node::new("Neg", ["ghost"], ["b"]).with_name("n")], &[], &["b"]);
        match sequence(&g) {
            Err(Error::CyclicOrUnresolvedGraph(ScheduleFailure::Unresolved { node, input })) => {
                assert_eq!(node, "n");
                assert_eq!(input, "ghost");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cycle_lists_its_members() {
        let g = graph(
            vec![
                Node::new("Add", ["a", "d"], ["c"]).with_name("x"),
                Node::new("Neg", ["c"], ["d"]).with_name("y"),
                Node::new("Neg", ["a"], ["e"]).with_name("z"),
            ],
            &["a"],
            &["d", "e"],
        );
        match sequence(&g) {
            Err(Error::CyclicOrUnresolvedGraph(ScheduleFailure::Cycle { nodes })) => {
                assert_eq!(nodes, vec!["x".to_string(), "y".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subgraph_reads_count_as_dependencies() {
        let then_branch = graph(vec![Node::new("Identity", ["late"], ["t"])], &[], &["t"]);
        let else_branch = graph(vec![Node::new("Identity", ["a"], ["e"])], &[], &["e"]);
        let g = graph(
            vec![
                Node::new("If", ["cond"], ["out"])
                    .with_attribute("then_branch", Attribute::Graph(then_branch))
                    .with_attribute("else_branch", Attribute::Graph(else_branch)),
                Node::new("Neg", ["a"], ["late"]),
            ],
            &["a", "cond"],
            &["out"],
        );
        let seq = sequence(&g).unwrap();
        assert_eq!(seq.node_order().collect::<Vec<_>>(), vec![1, 0]);
        // `late` dies at the If node that reads it through its branch
        assert!(seq.instructions[1].release.contains(&"late".to_string()));
    }

    #[test]
    fn test_outer_names_resolve_but_are_not_released() {
        let g = graph(vec![Node::new("Add", ["x", "outer"], ["y"])], &["x"], &["y"]);
        let outer: HashSet<String> = ["outer".to_string()].into_iter().collect();
        let seq = Sequencer::new(&g, &outer).sequence().unwrap();
        assert_eq!(seq.instructions[0].release, vec!["x"]);
    }
}
