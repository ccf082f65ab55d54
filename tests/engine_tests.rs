use std::collections::HashMap;
use std::sync::Arc;

use onnx_graph_engine::{
    error::Error,
    model::{Attribute, DataType, Dimension, Node, OnnxModel, Tensor},
    ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator},
    parser::GraphBuilder,
    ComputeTensor, ExecutionEngine, ExecutionOptions, OperatorRegistry,
};

fn floats(shape: &[usize], data: &[f32]) -> ComputeTensor {
    ComputeTensor::from_shape_vec(shape, data.to_vec()).unwrap()
}

fn feed(pairs: Vec<(&str, ComputeTensor)>) -> HashMap<String, ComputeTensor> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn values(tensor: &ComputeTensor) -> Vec<f32> {
    tensor.as_array::<f32>().unwrap().iter().copied().collect()
}

/// y = relu(x * w + b)
fn linear_model() -> OnnxModel {
    GraphBuilder::new("linear")
        .input("x", DataType::Float, None)
        .initializer(Tensor::from_f32("w", vec![2], &[2.0, -1.0]))
        .initializer(Tensor::from_f32("b", vec![], &[0.5]))
        .node(Node::new("Mul", ["x", "w"], ["xw"]))
        .node(Node::new("Add", ["xw", "b"], ["z"]))
        .node(Node::new("Relu", ["z"], ["y"]))
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap()
}

#[test]
fn test_run_linear_model() {
    let engine = ExecutionEngine::new(linear_model(), ExecutionOptions::default()).unwrap();
    let outputs = engine
        .run(feed(vec![("x", floats(&[2, 2], &[1.0, 1.0, -1.0, 3.0]))]))
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(values(&outputs["y"]), vec![2.5, 0.0, 0.0, 0.0]);
}

#[test]
fn test_eager_cleanup_does_not_change_results() {
    let engine = ExecutionEngine::new(linear_model(), ExecutionOptions::default()).unwrap();
    let x = floats(&[2], &[3.0, -4.0]);
    let eager = engine.run_with_options(feed(vec![("x", x.clone())]), true).unwrap();
    let lazy = engine.run_with_options(feed(vec![("x", x)]), false).unwrap();
    assert_eq!(eager, lazy);
}

#[test]
fn test_inplace_does_not_change_results() {
    let model = linear_model();
    let x = floats(&[2], &[3.0, -4.0]);
    let with = ExecutionEngine::new(model.clone(), ExecutionOptions::new().set_inplace(true)).unwrap();
    let without = ExecutionEngine::new(model, ExecutionOptions::new().set_inplace(false)).unwrap();
    assert_eq!(
        with.run(feed(vec![("x", x.clone())])).unwrap(),
        without.run(feed(vec![("x", x)])).unwrap()
    );
}

/// a = -x; c = cumsum(a); y = a + c when `reuse_input`, else y = c
fn cumsum_model(reuse_input: bool) -> OnnxModel {
    let mut builder = GraphBuilder::new("running_sum")
        .input("x", DataType::Float, None)
        .initializer(Tensor::from_i64("axis", vec![], &[0]))
        .node(Node::new("Neg", ["x"], ["a"]))
        .node(Node::new("CumSum", ["a", "axis"], ["c"]));
    builder = if reuse_input {
        builder.node(Node::new("Add", ["a", "c"], ["y"]))
    } else {
        builder.node(Node::new("Identity", ["c"], ["y"]))
    };
    builder.output("y", DataType::Float, None).build_model().unwrap()
}

#[test]
fn test_inplace_cumsum_matches_copying_cumsum() {
    let x = floats(&[4], &[1.0, 2.0, 3.0, 4.0]);
    for (reuse_input, expected) in [
        (false, vec![-1.0, -3.0, -6.0, -10.0]),
        (true, vec![-2.0, -5.0, -9.0, -14.0]),
    ] {
        let model = cumsum_model(reuse_input);
        let with = ExecutionEngine::new(model.clone(), ExecutionOptions::new().set_inplace(true)).unwrap();
        let without = ExecutionEngine::new(model, ExecutionOptions::new().set_inplace(false)).unwrap();
        let a = with.run(feed(vec![("x", x.clone())])).unwrap();
        let b = without.run(feed(vec![("x", x.clone())])).unwrap();
        assert_eq!(a, b);
        assert_eq!(values(&a["y"]), expected);
    }
}

#[test]
fn test_inplace_cumsum_leaves_caller_inputs_untouched() {
    let model = GraphBuilder::new("direct")
        .input("x", DataType::Float, None)
        .initializer(Tensor::from_i64("axis", vec![], &[0]))
        .node(Node::new("CumSum", ["x", "axis"], ["y"]))
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap();
    let engine = ExecutionEngine::new(model, ExecutionOptions::new().set_inplace(true)).unwrap();
    let inputs = feed(vec![("x", floats(&[3], &[1.0, 1.0, 1.0]))]);
    let outputs = engine.run(inputs.clone()).unwrap();
    assert_eq!(values(&outputs["y"]), vec![1.0, 2.0, 3.0]);
    assert_eq!(values(&inputs["x"]), vec![1.0, 1.0, 1.0]);
}

#[test]
fn test_reshape_overflow_is_an_operator_error() {
    let model = GraphBuilder::new("huge_reshape")
        .input("x", DataType::Float, None)
        .initializer(Tensor::from_i64("s", vec![2], &[1 << 40, 1 << 40]))
        .node(Node::new("Reshape", ["x", "s"], ["y"]).with_name("grow"))
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap();
    let engine = ExecutionEngine::new(model, ExecutionOptions::default()).unwrap();
    match engine.run(feed(vec![("x", floats(&[1], &[1.0]))])) {
        Err(Error::OperatorExecution { node, source, .. }) => {
            assert_eq!(node, "grow");
            assert!(matches!(*source, Error::ValidationError(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_input_errors() {
    let engine = ExecutionEngine::new(linear_model(), ExecutionOptions::default()).unwrap();

    assert!(matches!(engine.run(HashMap::new()), Err(Error::MissingInput(name)) if name == "x"));

    let extra = feed(vec![("x", floats(&[2], &[1.0, 2.0])), ("bogus", floats(&[1], &[0.0]))]);
    assert!(matches!(engine.run(extra), Err(Error::UnknownInput(name)) if name == "bogus"));

    let wrong_type = feed(vec![("x", ComputeTensor::scalar(1i64))]);
    match engine.run(wrong_type) {
        Err(Error::InputTypeMismatch { name, .. }) => assert_eq!(name, "x"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unregistered_operator_is_named() {
    let model = GraphBuilder::new("custom")
        .input("x", DataType::Float, None)
        .node(Node::new("Frobnicate", ["x"], ["y"]))
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap();
    let before = model.clone();
    match ExecutionEngine::new(model.clone(), ExecutionOptions::default()) {
        Err(Error::UnsupportedOperator { op_type, .. }) => assert_eq!(op_type, "Frobnicate"),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    assert_eq!(model, before);
}

#[test]
fn test_duplicate_output_names_are_rejected() {
    let result = GraphBuilder::new("dup")
        .input("x", DataType::Float, None)
        .node(Node::new("Relu", ["x"], ["y"]))
        .node(Node::new("Neg", ["x"], ["y"]))
        .output("y", DataType::Float, None)
        .build();
    assert!(matches!(result, Err(Error::StructuralError(_))));
}

#[test]
fn test_kernel_failures_name_the_node() {
    let model = GraphBuilder::new("bad_shapes")
        .input("a", DataType::Float, None)
        .input("b", DataType::Float, None)
        .node(Node::new("Add", ["a", "b"], ["y"]).with_name("adder"))
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap();
    let engine = ExecutionEngine::new(model, ExecutionOptions::default()).unwrap();
    let err = engine
        .run(feed(vec![
            ("a", floats(&[2], &[1.0, 2.0])),
            ("b", floats(&[3], &[1.0, 2.0, 3.0])),
        ]))
        .unwrap_err();
    match &err {
        Error::OperatorExecution { node, op_type, arguments, .. } => {
            assert_eq!(node, "adder");
            assert_eq!(op_type, "Add");
            assert!(arguments.contains("float[2]"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!err.root_cause().is_internal());
}

#[test]
fn test_if_reads_the_enclosing_scope() {
    let then_branch = GraphBuilder::new("then")
        .node(Node::new("Add", ["x", "x"], ["t"]))
        .output("t", DataType::Float, None)
        .build_unchecked();
    let else_branch = GraphBuilder::new("else")
        .node(Node::new("Neg", ["x"], ["e"]))
        .output("e", DataType::Float, None)
        .build_unchecked();
    let model = GraphBuilder::new("branching")
        .input("x", DataType::Float, None)
        .input("flag", DataType::Bool, None)
        .node(
            Node::new("If", ["flag"], ["y"])
                .with_attribute("then_branch", Attribute::Graph(then_branch))
                .with_attribute("else_branch", Attribute::Graph(else_branch)),
        )
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap();
    let engine = ExecutionEngine::new(model, ExecutionOptions::default()).unwrap();

    let x = floats(&[2], &[1.5, -2.0]);
    let taken = engine
        .run(feed(vec![("x", x.clone()), ("flag", ComputeTensor::scalar(true))]))
        .unwrap();
    let skipped = engine
        .run(feed(vec![("x", x), ("flag", ComputeTensor::scalar(false))]))
        .unwrap();
    assert_eq!(values(&taken["y"]), vec![3.0, -4.0]);
    assert_eq!(values(&skipped["y"]), vec![-1.5, 2.0]);
}

#[test]
fn test_scan_accumulates_rows() {
    let body = GraphBuilder::new("body")
        .input("sum_in", DataType::Float, None)
        .input("row", DataType::Float, None)
        .node(Node::new("Add", ["sum_in", "row"], ["sum_out"]))
        .node(Node::new("Identity", ["sum_out"], ["partial"]))
        .output("sum_out", DataType::Float, None)
        .output("partial", DataType::Float, None)
        .build()
        .unwrap();
    let model = GraphBuilder::new("cumulative")
        .input("init", DataType::Float, None)
        .input("rows", DataType::Float, None)
        .node(
            Node::new("Scan", ["init", "rows"], ["total", "partials"])
                .with_attribute("body", Attribute::Graph(body))
                .with_attribute("num_scan_inputs", Attribute::Int(1)),
        )
        .output("total", DataType::Float, None)
        .output("partials", DataType::Float, None)
        .build_model()
        .unwrap();
    let engine = ExecutionEngine::new(model, ExecutionOptions::default()).unwrap();

    let outputs = engine
        .run(feed(vec![
            ("init", floats(&[2], &[0.0, 0.0])),
            ("rows", floats(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
        ]))
        .unwrap();
    assert_eq!(values(&outputs["total"]), vec![9.0, 12.0]);
    assert_eq!(outputs["partials"].shape(), &[3, 2]);
    assert_eq!(
        values(&outputs["partials"]),
        vec![1.0, 2.0, 4.0, 6.0, 9.0, 12.0]
    );
}

/// Running sum over rows where the body declares `partial` with `partial_shape`
fn running_sum_scan(partial_shape: Option<Vec<Dimension>>) -> ExecutionEngine {
    let body = GraphBuilder::new("body")
        .input("sum_in", DataType::Float, None)
        .input("row", DataType::Float, None)
        .node(Node::new("Add", ["sum_in", "row"], ["sum_out"]))
        .node(Node::new("Identity", ["sum_out"], ["partial"]))
        .output("sum_out", DataType::Float, None)
        .output("partial", DataType::Float, partial_shape)
        .build()
        .unwrap();
    let model = GraphBuilder::new("cumulative")
        .input("init", DataType::Float, None)
        .input("rows", DataType::Float, None)
        .node(
            Node::new("Scan", ["init", "rows"], ["total", "partials"])
                .with_name("scan")
                .with_attribute("body", Attribute::Graph(body))
                .with_attribute("num_scan_inputs", Attribute::Int(1)),
        )
        .output("total", DataType::Float, None)
        .output("partials", DataType::Float, None)
        .build_model()
        .unwrap();
    ExecutionEngine::new(model, ExecutionOptions::default()).unwrap()
}

#[test]
fn test_scan_over_no_rows_returns_initial_state() {
    let engine = running_sum_scan(Some(vec![Dimension::Value(2)]));
    let outputs = engine
        .run(feed(vec![
            ("init", floats(&[2], &[1.0, -1.0])),
            ("rows", floats(&[0, 2], &[])),
        ]))
        .unwrap();
    assert_eq!(values(&outputs["total"]), vec![1.0, -1.0]);
    assert_eq!(outputs["partials"].shape(), &[0, 2]);
    assert_eq!(outputs["partials"].data_type(), DataType::Float);
}

#[test]
fn test_scan_over_no_rows_needs_a_static_step_shape() {
    let engine = running_sum_scan(Some(vec![Dimension::Param("n".to_string())]));
    let result = engine.run(feed(vec![
        ("init", floats(&[2], &[1.0, -1.0])),
        ("rows", floats(&[0, 2], &[])),
    ]));
    match result {
        Err(Error::OperatorExecution { node, source, .. }) => {
            assert_eq!(node, "scan");
            assert!(matches!(*source, Error::ValidationError(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_run_batch_keeps_input_order() {
    let options = ExecutionOptions::new().set_thread_count(3);
    let engine = ExecutionEngine::new(linear_model(), options).unwrap();
    let batch: Vec<_> = (0..8)
        .map(|i| feed(vec![("x", floats(&[2], &[i as f32, 0.0]))]))
        .collect();
    let results = engine.run_batch(batch).unwrap();
    for (i, outputs) in results.iter().enumerate() {
        assert_eq!(values(&outputs["y"]), vec![2.0 * i as f32 + 0.5, 0.5]);
    }
}

#[test]
fn test_engine_round_trips_through_a_file() {
    let engine = ExecutionEngine::new(linear_model(), ExecutionOptions::default()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("linear.onnx");
    std::fs::write(&path, engine.to_bytes().unwrap()).unwrap();

    let reloaded = ExecutionEngine::from_path(&path, ExecutionOptions::default()).unwrap();
    assert_eq!(reloaded.input_names(), engine.input_names());
    let x = floats(&[2], &[0.25, 1.0]);
    assert_eq!(
        reloaded.run(feed(vec![("x", x.clone())])).unwrap(),
        engine.run(feed(vec![("x", x)])).unwrap()
    );
}

#[test]
fn test_shape_inference_through_the_plan() {
    let model = GraphBuilder::new("shapes")
        .input(
            "x",
            DataType::Float,
            Some(vec![onnx_graph_engine::Dimension::Value(4)]),
        )
        .node(Node::new("Relu", ["x"], ["y"]))
        .output("y", DataType::Float, None)
        .build_model()
        .unwrap();
    let engine = ExecutionEngine::new(model, ExecutionOptions::default()).unwrap();
    let shapes = engine.infer_shapes().unwrap();
    assert_eq!(
        shapes["y"].dims,
        Some(vec![onnx_graph_engine::Dimension::Value(4)])
    );
}

/// Doubles its single input
#[derive(Debug)]
struct Double;

#[derive(Debug)]
struct DoubleKernel;

impl Operator for Double {
    fn build(&self, _node: &Node, _cx: &mut BuildContext<'_>) -> onnx_graph_engine::Result<Box<dyn Kernel>> {
        Ok(Box::new(DoubleKernel))
    }
}

impl Kernel for DoubleKernel {
    fn compute(
        &self,
        inputs: OpInputs<'_>,
        _ctx: &ComputeContext<'_>,
    ) -> onnx_graph_engine::Result<Vec<ComputeTensor>> {
        let x = inputs.require(0, "Double")?.as_array::<f32>()?;
        Ok(vec![ComputeTensor::Float(x * 2.0)])
    }
}

#[test]
fn test_custom_operators_plug_into_the_registry() {
    let mut registry = OperatorRegistry::with_standard_operators();
    registry
        .register_operator("Double", "com.example", 1, Box::new(Double))
        .unwrap();
    let model = GraphBuilder::new("custom")
        .input("x", DataType::Float, None)
        .node(Node::new("Double", ["x"], ["d"]).with_domain("com.example"))
        .node(Node::new("Relu", ["d"], ["y"]))
        .output("y", DataType::Float, None)
        .opset("com.example", 1)
        .build_model()
        .unwrap();
    let engine =
        ExecutionEngine::with_registry(model, ExecutionOptions::default(), Arc::new(registry))
            .unwrap();
    let outputs = engine.run(feed(vec![("x", floats(&[2], &[1.0, -1.0]))])).unwrap();
    assert_eq!(values(&outputs["y"]), vec![2.0, 0.0]);
}
