use std::collections::HashMap;

use crate::error::Result;
use crate::model::{DataType, Dimension, Graph, Node, OnnxModel, Tensor, TensorInfo};

use super::graph_validator::GraphValidator;

/// Fluent construction of graphs in memory
///
/// ```
/// use onnx_graph_engine::model::{DataType, Node};
/// use onnx_graph_engine::parser::GraphBuilder;
///
/// let graph = GraphBuilder::new("relu")
///     .input("x", DataType::Float, None)
///     .node(Node::new("Relu", ["x"], ["y"]))
///     .output("y", DataType::Float, None)
///     .build()
///     .unwrap();
/// assert_eq!(graph.nodes[0].name, "Relu_0");
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    graph: Graph,
    opset_imports: HashMap<String, i64>,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            graph: Graph {
                name: name.to_string(),
                ..Graph::default()
            },
            opset_imports: HashMap::new(),
        }
    }

    /// Declare a graph input
    pub fn input(mut self, name: &str, data_type: DataType, shape: Option<Vec<Dimension>>) -> Self {
        self.graph.inputs.push(TensorInfo::new(name, data_type, shape));
        self
    }

    /// Declare a graph output
    pub fn output(mut self, name: &str, data_type: DataType, shape: Option<Vec<Dimension>>) -> Self {
        self.graph.outputs.push(TensorInfo::new(name, data_type, shape));
        self
    }

    pub fn initializer(mut self, tensor: Tensor) -> Self {
        self.graph.initializers.push(tensor);
        self
    }

    /// Append a node; unnamed nodes are called `<op_type>_<position>`
    pub fn node(mut self, mut node: Node) -> Self {
        if node.name.is_empty() {
            node.name = format!("{}_{}", node.op_type, self.graph.nodes.len());
        }
        self.graph.nodes.push(node);
        self
    }

    pub fn doc_string(mut self, doc: &str) -> Self {
        self.graph.doc_string = doc.to_string();
        self
    }

    /// Import `domain` at `version` in the model produced by `build_model`
    pub fn opset(mut self, domain: &str, version: i64) -> Self {
        self.opset_imports.insert(domain.to_string(), version);
        self
    }

    /// Validate and return the graph
    pub fn build(self) -> Result<Graph> {
        GraphValidator::validate(&self.graph)?;
        Ok(self.graph)
    }

    /// Return the graph without validating it
    pub fn build_unchecked(self) -> Graph {
        self.graph
    }

    /// Validate the graph and wrap it in a model with the requested opsets
    pub fn build_model(self) -> Result<OnnxModel> {
        let opset_imports = self.opset_imports.clone();
        let mut model = OnnxModel::from_graph(self.build()?);
        model.opset_imports.extend(opset_imports);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_build_rejects_invalid_graph() {
        let result = GraphBuilder::new("broken")
            .node(Node::new("Relu", ["missing"], ["y"]))
            .output("y", DataType::Float, None)
            .build();
        assert!(matches!(result, Err(Error::StructuralError(_))));
    }

    #[test]
    fn test_build_model_carries_opsets() {
        let model = GraphBuilder::new("m")
            .input("x", DataType::Float, Some(vec![Dimension::Param("N".to_string())]))
            .node(Node::new("Identity", ["x"], ["y"]).with_name("keep"))
            .output("y", DataType::Float, None)
            .opset("", 11)
            .build_model()
            .unwrap();
        assert_eq!(model.opset_version("ai.onnx"), 11);
        assert_eq!(model.graph.nodes[0].name, "keep");
    }
}
