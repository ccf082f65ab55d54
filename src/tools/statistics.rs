use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::model::{Graph, OnnxModel};
use crate::parser::OnnxModelLoader;

/// Size summary of a model, nested graphs included
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub initializer_count: usize,
    /// Graphs held by node attributes, at any depth
    pub subgraph_count: usize,
    pub input_count: usize,
    pub output_count: usize,
    /// Nodes per operator type
    pub op_counts: BTreeMap<String, usize>,
    /// Bytes held by initializer payloads
    pub initializer_bytes: usize,
    /// Size of the protobuf encoding of the model
    pub serialized_size: usize,
}

impl GraphStatistics {
    pub fn from_model(model: &OnnxModel) -> Result<Self> {
        let mut stats = Self::from_graph(&model.graph);
        stats.serialized_size = OnnxModelLoader::save_model_to_bytes(model)?.len();
        Ok(stats)
    }

    /// Counts for `graph` alone; `serialized_size` stays zero
    pub fn from_graph(graph: &Graph) -> Self {
        let mut stats = Self {
            input_count: graph.inputs.len(),
            output_count: graph.outputs.len(),
            subgraph_count: graph.count_subgraphs(),
            ..Self::default()
        };
        stats.accumulate(graph);
        stats
    }

    fn accumulate(&mut self, graph: &Graph) {
        self.node_count += graph.nodes.len();
        self.initializer_count += graph.initializers.len();
        self.initializer_bytes += graph.initializers.iter().map(|t| t.byte_size()).sum::<usize>();
        for node in &graph.nodes {
            *self.op_counts.entry(node.op_type.clone()).or_insert(0) += 1;
            for sub in node.subgraphs() {
                self.accumulate(sub);
            }
        }
    }
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} nodes, {} initializers ({} bytes), {} subgraphs, {} inputs, {} outputs",
            self.node_count,
            self.initializer_count,
            self.initializer_bytes,
            self.subgraph_count,
            self.input_count,
            self.output_count
        )?;
        for (op, count) in &self.op_counts {
            writeln!(f, "  {:<24} {}", op, count)?;
        }
        write!(f, "serialized size: {} bytes", self.serialized_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, DataType, Node, Tensor, TensorInfo};

    #[test]
    fn test_nested_graphs_are_counted() {
        let branch = Graph {
            nodes: vec![Node::new("Neg", ["x"], ["t"])],
            outputs: vec![TensorInfo::new("t", DataType::Float, None)],
            initializers: vec![Tensor::from_f32("w", vec![1], &[1.0])],
            ..Graph::default()
        };
        let graph = Graph {
            nodes: vec![
                Node::new("If", ["c"], ["y"])
                    .with_attribute("then_branch", Attribute::Graph(branch.clone()))
                    .with_attribute("else_branch", Attribute::Graph(branch)),
            ],
            inputs: vec![
                TensorInfo::new("x", DataType::Float, None),
                TensorInfo::new("c", DataType::Bool, None),
            ],
            outputs: vec![TensorInfo::new("y", DataType::Float, None)],
            ..Graph::default()
        };
        let stats = GraphStatistics::from_graph(&graph);
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.subgraph_count, 2);
        assert_eq!(stats.initializer_count, 2);
        assert_eq!(stats.initializer_bytes, 8);
        assert_eq!(stats.op_counts["Neg"], 2);
        assert_eq!(stats.input_count, 2);
    }
}
