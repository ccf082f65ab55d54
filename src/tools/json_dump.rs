use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::model::{Attribute, Graph, OnnxModel, Tensor, TensorInfo};
use crate::ops::tensor::Tensor as ComputeTensor;

/// Pretty-printed JSON description of `model`
pub fn to_json(model: &OnnxModel) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_json_value(model))?)
}

/// Structured description of `model`: metadata, signature, constants and nodes
pub fn to_json_value(model: &OnnxModel) -> Value {
    let mut opsets: Vec<(&String, &i64)> = model.opset_imports.iter().collect();
    opsets.sort();
    let opsets: Map<String, Value> = opsets
        .into_iter()
        .map(|(domain, version)| (domain.clone(), json!(version)))
        .collect();

    json!({
        "metadata": {
            "producer_name": model.metadata.producer_name,
            "producer_version": model.metadata.producer_version,
            "domain": model.metadata.domain,
            "model_version": model.metadata.model_version,
            "ir_version": model.metadata.ir_version,
            "doc_string": model.metadata.doc_string,
        },
        "opset_imports": opsets,
        "graph": graph_value(&model.graph),
    })
}

fn graph_value(graph: &Graph) -> Value {
    let nodes: Vec<Value> = graph
        .nodes
        .iter()
        .map(|node| {
            let attributes: Map<String, Value> = node
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), attribute_value(value)))
                .collect();
            json!({
                "name": node.name,
                "op_type": node.op_type,
                "domain": node.domain,
                "inputs": node.inputs,
                "outputs": node.outputs,
                "attributes": attributes,
            })
        })
        .collect();
    let inputs: Vec<Value> = graph.inputs.iter().map(value_info).collect();
    let outputs: Vec<Value> = graph.outputs.iter().map(value_info).collect();
    let initializers: Vec<Value> = graph.initializers.iter().map(tensor_value).collect();

    json!({
        "name": graph.name,
        "inputs": inputs,
        "outputs": outputs,
        "initializers": initializers,
        "nodes": nodes,
    })
}

fn value_info(info: &TensorInfo) -> Value {
    json!({
        "name": info.name,
        "type": info.type_string(),
    })
}

fn tensor_value(tensor: &Tensor) -> Value {
    // Types the runtime cannot decode are described by their size only
    let values = match ComputeTensor::from_model_tensor(tensor) {
        Ok(t) => t.to_json_values(),
        Err(_) => json!(format!("<{} bytes>", tensor.byte_size())),
    };
    json!({
        "name": tensor.name,
        "data_type": tensor.data_type.to_string(),
        "dims": tensor.dims,
        "values": values,
    })
}

fn attribute_value(attribute: &Attribute) -> Value {
    let value = match attribute {
        Attribute::Float(f) => json!(f),
        Attribute::Int(i) => json!(i),
        Attribute::String(s) => json!(s),
        Attribute::Tensor(t) => tensor_value(t),
        Attribute::Graph(g) => graph_value(g),
        Attribute::Floats(fs) => json!(fs),
        Attribute::Ints(is) => json!(is),
        Attribute::Strings(ss) => json!(ss),
        Attribute::Tensors(ts) => Value::Array(ts.iter().map(tensor_value).collect()),
        Attribute::Graphs(gs) => Value::Array(gs.iter().map(graph_value).collect()),
    };
    json!({ "type": attribute.kind(), "value": value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, Node};

    #[test]
    fn test_dump_lists_initializer_values_and_attributes() {
        let graph = Graph {
            name: "g".to_string(),
            nodes: vec![Node::new("LeakyRelu", ["x"], ["y"]).with_attribute("alpha", Attribute::Float(0.5))],
            inputs: vec![TensorInfo::new("x", DataType::Float, None)],
            outputs: vec![TensorInfo::new("y", DataType::Float, None)],
            initializers: vec![Tensor::from_i64("k", vec![2], &[3, 4])],
            ..Graph::default()
        };
        let value = to_json_value(&OnnxModel::from_graph(graph));
        assert_eq!(value["graph"]["initializers"][0]["values"], json!([3, 4]));
        assert_eq!(value["graph"]["nodes"][0]["attributes"]["alpha"]["type"], "FLOAT");
        assert_eq!(value["graph"]["inputs"][0]["type"], "float(?)");
        assert_eq!(value["opset_imports"][""], 13);
    }
}
