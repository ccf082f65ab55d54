use std::collections::HashSet;

use crate::model::{Attribute, Graph, OnnxModel, Tensor};
use crate::ops::tensor::Tensor as ComputeTensor;

const FONT_SIZE: u32 = 10;
/// Longest rendering of an initializer value before it is cut
const MAX_VALUE_CHARS: usize = 30;

/// Graphviz description of the main graph of `model`
pub fn to_dot(model: &OnnxModel) -> String {
    graph_to_dot(&model.graph)
}

/// Graphviz description of `graph`
///
/// Inputs are red boxes, outputs green boxes, initializers plain boxes showing
/// their (truncated) value and nodes orange rounded boxes.
pub fn graph_to_dot(graph: &Graph) -> String {
    let mut lines = vec![
        "digraph{".to_string(),
        "  orientation=portrait;".to_string(),
        "  ranksep=0.25;".to_string(),
        "  nodesep=0.05;".to_string(),
    ];
    let mut declared: HashSet<&str> = HashSet::new();

    lines.push(String::new());
    for input in &graph.inputs {
        lines.push(format!(
            "  {} [shape=box color=red label=\"{}\\n{}\" fontsize={}];",
            quote(&input.name),
            escape(&input.name),
            escape(&input.type_string()),
            FONT_SIZE
        ));
        declared.insert(&input.name);
    }

    lines.push(String::new());
    for output in &graph.outputs {
        lines.push(format!(
            "  {} [shape=box color=green label=\"{}\\n{}\" fontsize={}];",
            quote(&output.name),
            escape(&output.name),
            escape(&output.type_string()),
            FONT_SIZE
        ));
        declared.insert(&output.name);
    }

    lines.push(String::new());
    for init in &graph.initializers {
        lines.push(format!(
            "  {} [shape=box label=\"{}\\n{}({:?})\\n{}\" fontsize={}];",
            quote(&init.name),
            escape(&init.name),
            init.data_type,
            init.dims,
            escape(&preview(init)),
            FONT_SIZE
        ));
        declared.insert(&init.name);
    }

    for (index, node) in graph.nodes.iter().enumerate() {
        lines.push(String::new());
        for output in node.outputs.iter().filter(|o| !o.is_empty()) {
            if declared.insert(output) {
                lines.push(format!(
                    "  {} [shape=box label=\"{}\" fontsize={}];",
                    quote(output),
                    escape(output),
                    FONT_SIZE
                ));
            }
        }

        let id = node_id(&node.name, index);
        let mut label = format!("{}\\n({})", escape(&node.op_type), escape(&node.name));
        for (name, value) in &node.attributes {
            if let Some(text) = attribute_preview(name, value) {
                label.push_str(&format!("\\n{}={}", escape(name), escape(&text)));
            }
        }
        lines.push(format!(
            "  {} [shape=box style=\"filled,rounded\" color=orange label=\"{}\" fontsize={}];",
            id, label, FONT_SIZE
        ));
        for input in node.present_inputs() {
            lines.push(format!("  {} -> {};", quote(input), id));
        }
        for output in node.outputs.iter().filter(|o| !o.is_empty()) {
            lines.push(format!("  {} -> {};", id, quote(output)));
        }
    }

    lines.push("}".to_string());
    lines.join("\n")
}

fn node_id(name: &str, index: usize) -> String {
    if name.is_empty() {
        quote(&format!("node_{}", index))
    } else {
        quote(name)
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", escape(name))
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.chars().count() > limit {
        text = text.chars().take(limit).collect();
        text.push_str("...");
    }
    text
}

fn preview(tensor: &Tensor) -> String {
    let text = match ComputeTensor::from_model_tensor(tensor) {
        Ok(t) => t.to_json_values().to_string(),
        Err(_) => format!("<{} bytes>", tensor.byte_size()),
    };
    truncate(text, MAX_VALUE_CHARS)
}

/// Short value of a scalar or list attribute; graphs and tensors are omitted
fn attribute_preview(name: &str, value: &Attribute) -> Option<String> {
    let text = match value {
        Attribute::Float(f) => f.to_string(),
        Attribute::Int(i) => i.to_string(),
        Attribute::String(s) => s.clone(),
        Attribute::Floats(fs) => format!("{:?}", fs),
        Attribute::Ints(is) => format!("{:?}", is),
        Attribute::Strings(ss) => format!("{:?}", ss),
        _ => return None,
    };
    let limit = MAX_VALUE_CHARS.saturating_sub(name.len()).max(10);
    Some(truncate(text, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_values_are_truncated() {
        let text = truncate("x".repeat(40), MAX_VALUE_CHARS);
        assert_eq!(text.len(), MAX_VALUE_CHARS + 3);
        assert!(text.ends_with("..."));
        assert_eq!(truncate("short".to_string(), MAX_VALUE_CHARS), "short");
    }

    #[test]
    fn test_names_are_quoted_and_escaped() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(node_id("", 3), "\"node_3\"");
    }
}
