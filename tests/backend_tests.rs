use std::collections::HashMap;

use onnx_graph_engine::{
    error::Error,
    model::{DataType, Node},
    parser::{GraphBuilder, OnnxModelLoader},
    ComputeTensor, EngineRuntime, ExecutionOptions, ExternalRuntime, ExternalSession, WholeSession,
};

fn relu_bytes() -> Vec<u8> {
    let model = GraphBuilder::new("relu")
        .input("x", DataType::Float, None)
        .node(Node::new("Relu", ["x"], ["y"]))
        .node(Node::new("Neg", ["x"], ["n"]))
        .output("y", DataType::Float, None)
        .output("n", DataType::Float, None)
        .build_model()
        .unwrap();
    OnnxModelLoader::save_model_to_bytes(&model).unwrap()
}

/// A runtime that cannot load anything
struct Unavailable;

impl ExternalRuntime for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn load(&self, _model: &[u8]) -> Result<Box<dyn ExternalSession>, String> {
        Err("no device".to_string())
    }
}

#[test]
fn test_engine_runtime_runs_the_whole_model() {
    let session = WholeSession::new(&relu_bytes(), &EngineRuntime::default()).unwrap();
    assert_eq!(session.runtime(), "onnx-graph-engine");
    assert_eq!(session.output_names(), vec!["y", "n"]);

    let x = ComputeTensor::from_shape_vec(&[3], vec![-1.0f32, 0.0, 2.0]).unwrap();
    let inputs: HashMap<String, ComputeTensor> = [("x".to_string(), x)].into_iter().collect();
    let outputs = session.run(inputs).unwrap();

    assert_eq!(outputs.len(), 2);
    let y: Vec<f32> = outputs[0].as_array::<f32>().unwrap().iter().copied().collect();
    let n: Vec<f32> = outputs[1].as_array::<f32>().unwrap().iter().copied().collect();
    assert_eq!(y, vec![0.0, 0.0, 2.0]);
    assert_eq!(n, vec![1.0, -0.0, -2.0]);
}

#[test]
fn test_refused_model_reports_the_reason_and_graph() {
    match WholeSession::new(&relu_bytes(), &Unavailable) {
        Err(Error::BackendUnavailable(message)) => {
            assert!(message.starts_with("Unable to create session due to 'no device'"));
            assert!(message.contains("graph 'relu'"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_undecodable_bytes_are_unavailable() {
    let result = WholeSession::new(b"not a model", &EngineRuntime::new(ExecutionOptions::default()));
    assert!(matches!(result, Err(Error::BackendUnavailable(_))));
}

#[test]
fn test_session_errors_become_backend_execution_errors() {
    let session = WholeSession::new(&relu_bytes(), &EngineRuntime::default()).unwrap();
    assert!(matches!(session.run(HashMap::new()), Err(Error::BackendExecution(_))));
}
