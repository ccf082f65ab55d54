use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use onnx_graph_engine::{
    model::{DataType, Graph, Node, OnnxModel, Tensor},
    optimization::{GraphOptimizer, OptimizationOptions},
    parser::GraphBuilder,
    ComputeTensor, ExecutionEngine, ExecutionOptions, OptimizationLevel,
};

// =====================================================================
// Benchmark Models
// =====================================================================

fn random_values(rng: &mut StdRng, len: usize) -> Vec<f32> {
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    (0..len).map(|_| normal.sample(rng)).collect()
}

/// `layers` dense layers of width `width`, each followed by a Relu
fn mlp(layers: usize, width: usize, rng: &mut StdRng) -> Graph {
    let mut builder = GraphBuilder::new("mlp").input("x", DataType::Float, None);
    let mut current = "x".to_string();
    for layer in 0..layers {
        let weight = format!("w{}", layer);
        let bias = format!("b{}", layer);
        let hidden = format!("h{}", layer);
        let activated = format!("a{}", layer);
        builder = builder
            .initializer(Tensor::from_f32(
                &weight,
                vec![width as i64, width as i64],
                &random_values(rng, width * width),
            ))
            .initializer(Tensor::from_f32(&bias, vec![width as i64], &random_values(rng, width)))
            .node(Node::new("Gemm", [current.as_str(), weight.as_str(), bias.as_str()], [hidden.as_str()]))
            .node(Node::new("Relu", [hidden.as_str()], [activated.as_str()]));
        current = activated;
    }
    builder
        .node(Node::new("Identity", [current.as_str()], ["y"]))
        .output("y", DataType::Float, None)
        .build()
        .unwrap()
}

/// A chain of elementwise nodes where every other node is duplicated
fn redundant_chain(length: usize) -> Graph {
    let mut builder = GraphBuilder::new("chain").input("x", DataType::Float, None);
    let mut current = "x".to_string();
    for i in 0..length {
        let first = format!("n{}", i);
        let twin = format!("t{}", i);
        let sum = format!("s{}", i);
        builder = builder
            .node(Node::new("Neg", [current.as_str()], [first.as_str()]))
            .node(Node::new("Neg", [current.as_str()], [twin.as_str()]))
            .node(Node::new("Add", [first.as_str(), twin.as_str()], [sum.as_str()]));
        current = sum;
    }
    builder
        .node(Node::new("Identity", [current.as_str()], ["y"]))
        .output("y", DataType::Float, None)
        .build()
        .unwrap()
}

fn input_batch(rng: &mut StdRng, rows: usize, width: usize) -> HashMap<String, ComputeTensor> {
    let x = ComputeTensor::from_shape_vec(&[rows, width], random_values(rng, rows * width))
        .unwrap();
    [("x".to_string(), x)].into_iter().collect()
}

// =====================================================================
// Criterion Benchmark Functions
// =====================================================================

fn execution_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut group = c.benchmark_group("execution");

    for &width in &[16usize, 64, 256] {
        let model = OnnxModel::from_graph(mlp(4, width, &mut rng));
        let inputs = input_batch(&mut rng, 8, width);

        for (label, eager) in [("eager_cleanup", true), ("keep_all", false)] {
            let options = ExecutionOptions::new().set_eager_cleanup(eager);
            let engine = ExecutionEngine::new(model.clone(), options)
                .unwrap();
            group.bench_with_input(BenchmarkId::new(label, width), &inputs, |b, inputs| {
                b.iter(|| engine.run(inputs.clone()))
            });
        }
    }

    let engine = ExecutionEngine::new(
        OnnxModel::from_graph(mlp(4, 64, &mut rng)),
        ExecutionOptions::new().set_thread_count(4),
    )
    .unwrap();
    let batch: Vec<_> = (0..32).map(|_| input_batch(&mut rng, 8, 64)).collect();
    group.bench_function("run_batch_32", |b| b.iter(|| engine.run_batch(batch.clone())));

    group.finish();
}

fn optimization_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimization");

    for &length in &[16usize, 128] {
        let graph = redundant_chain(length);
        group.bench_with_input(BenchmarkId::new("standard", length), &graph, |b, graph| {
            let optimizer = GraphOptimizer::new(OptimizationOptions::default());
            b.iter(|| {
                let mut graph = graph.clone();
                optimizer.optimize(&mut graph)
            })
        });
    }

    let model = OnnxModel::from_graph(redundant_chain(64));
    let options = ExecutionOptions::new().set_optimization_level(OptimizationLevel::Standard);
    group.bench_function("engine_creation_standard", |b| {
        b.iter(|| ExecutionEngine::new(model.clone(), options.clone()))
    });

    group.finish();
}

criterion_group!(benches, execution_benchmark, optimization_benchmark);
criterion_main!(benches);
