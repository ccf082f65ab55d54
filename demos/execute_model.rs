use std::collections::HashMap;
use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};

use onnx_graph_engine::{
    model::{DataType, Dimension, Node, OnnxModel, Tensor},
    parser::{GraphBuilder, OnnxModelLoader},
    tools::{to_dot, GraphStatistics},
    ComputeTensor, ExecutionEngine, ExecutionOptions, OptimizationLevel,
};

/// Y = (X + 1) * (X + 2) - (X + 1), used when no model path is given
fn demo_model() -> Result<OnnxModel> {
    Ok(GraphBuilder::new("demo")
        .input("X", DataType::Float, Some(vec![Dimension::Value(3), Dimension::Value(2)]))
        .initializer(Tensor::from_f32("one", vec![], &[1.0]))
        .initializer(Tensor::from_f32("two", vec![], &[2.0]))
        .node(Node::new("Add", ["X", "one"], ["x_plus_1"]))
        .node(Node::new("Add", ["X", "two"], ["x_plus_2"]))
        .node(Node::new("Mul", ["x_plus_1", "x_plus_2"], ["product"]))
        .node(Node::new("Add", ["X", "one"], ["x_plus_1_again"]))
        .node(Node::new("Sub", ["product", "x_plus_1_again"], ["Y"]))
        .output("Y", DataType::Float, None)
        .build_model()?)
}

/// A tensor of ones for every float input with a fully known shape
fn ones_for(model: &OnnxModel) -> Result<HashMap<String, ComputeTensor>> {
    let mut inputs = HashMap::new();
    for input in &model.graph.inputs {
        if model.graph.initializer(&input.name).is_some() {
            continue;
        }
        let dims = match &input.shape {
            Some(dims) => dims
                .iter()
                .map(|d| match d {
                    Dimension::Value(v) if *v >= 0 => Ok(*v as usize),
                    other => bail!("input '{}' has a symbolic dimension {}", input.name, other),
                })
                .collect::<Result<Vec<usize>>>()?,
            None => bail!("input '{}' has no shape", input.name),
        };
        if input.data_type != DataType::Float {
            bail!("input '{}' is {}, only float inputs are generated", input.name, input.data_type);
        }
        let len = dims.iter().product();
        inputs.insert(
            input.name.clone(),
            ComputeTensor::from_shape_vec(&dims, vec![1.0f32; len])?,
        );
    }
    Ok(inputs)
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let model = match args.first() {
        Some(path) => OnnxModelLoader::load_model(Path::new(path))
            .with_context(|| format!("loading {}", path))?,
        None => demo_model()?,
    };

    println!("{}", GraphStatistics::from_model(&model)?);
    if args.iter().any(|a| a == "--dot") {
        println!("{}", to_dot(&model));
    }

    let inputs = ones_for(&model)?;
    let options = ExecutionOptions::new().set_optimization_level(OptimizationLevel::Standard);
    let engine = ExecutionEngine::new(model, options)?;

    if let Some(stats) = engine.optimization_stats() {
        println!(
            "optimization removed {} nodes and {} initializers in {} rounds",
            stats.nodes_removed(),
            stats.initializers_removed(),
            stats.iterations
        );
    }

    let outputs = engine.run(inputs)?;
    for name in engine.output_names() {
        if let Some(tensor) = outputs.get(name) {
            println!("Output '{}': {} = {}", name, tensor.describe(), tensor.to_json_values());
        }
    }
    Ok(())
}
