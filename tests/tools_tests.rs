use onnx_graph_engine::{
    model::{Attribute, DataType, Node, OnnxModel, Tensor},
    parser::{GraphBuilder, OnnxModelLoader},
    tools::{to_dot, to_json, GraphStatistics},
};

fn sample_model() -> OnnxModel {
    GraphBuilder::new("sample")
        .input("x", DataType::Float, None)
        .initializer(Tensor::from_f32("w", vec![12], &[0.125; 12]))
        .node(Node::new("Mul", ["x", "w"], ["scaled"]).with_name("scale"))
        .node(
            Node::new("LeakyRelu", ["scaled"], ["y"])
                .with_name("activation")
                .with_attribute("alpha", Attribute::Float(0.25)),
        )
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap()
}

#[test]
fn test_json_dump_is_valid_json() {
    let text = to_json(&sample_model()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();

    let graph = &value["graph"];
    assert_eq!(graph["name"], "sample");
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(graph["nodes"][1]["attributes"]["alpha"]["value"], 0.25);
    assert_eq!(graph["initializers"][0]["values"].as_array().unwrap().len(), 12);
    assert_eq!(value["metadata"]["producer_name"], "onnx-graph-engine");
}

#[test]
fn test_dot_export_colors_and_edges() {
    let dot = to_dot(&sample_model());
    assert!(dot.starts_with("digraph{"));
    assert!(dot.ends_with('}'));
    assert!(dot.contains("\"x\" [shape=box color=red"));
    assert!(dot.contains("\"y\" [shape=box color=green"));
    assert!(dot.contains("\"scale\" [shape=box style=\"filled,rounded\" color=orange"));
    assert!(dot.contains("\"x\" -> \"scale\";"));
    assert!(dot.contains("\"scale\" -> \"scaled\";"));
    assert!(dot.contains("alpha=0.25"));
    // Twelve values do not fit the preview
    assert!(dot.contains("..."));
}

#[test]
fn test_statistics_match_the_model() {
    let model = sample_model();
    let stats = GraphStatistics::from_model(&model).unwrap();
    assert_eq!(stats.node_count, 2);
    assert_eq!(stats.initializer_count, 1);
    assert_eq!(stats.initializer_bytes, 48);
    assert_eq!(stats.op_counts["LeakyRelu"], 1);
    assert_eq!(
        stats.serialized_size,
        OnnxModelLoader::save_model_to_bytes(&model).unwrap().len()
    );
    assert!(stats.to_string().contains("2 nodes"));
}
