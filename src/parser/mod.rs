pub mod graph_builder;
pub mod graph_validator;
pub mod model_loader;

// Re-export key types from the parser module
pub use graph_builder::GraphBuilder;
pub use graph_validator::GraphValidator;
pub use model_loader::OnnxModelLoader;
