use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::execution::context::{ExecutionOptions, ValueTable};
use crate::execution::plan::{self, ExecutionPlan};
use crate::model::{normalize_domain, resolve_opset, DataType, Dimension, Graph, Node};
use super::tensor::Tensor;

/// Type and (possibly partial) shape of a value, used for shape inference
#[derive(Debug, Clone, PartialEq)]
pub struct ValueShape {
    pub data_type: DataType,
    pub dims: Option<Vec<Dimension>>,
}

impl ValueShape {
    pub fn new(data_type: DataType, dims: Option<Vec<Dimension>>) -> Self {
        Self { data_type, dims }
    }

    /// Shape of a concrete tensor
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            data_type: tensor.data_type(),
            dims: Some(
                tensor
                    .shape()
                    .iter()
                    .map(|&d| Dimension::Value(d as i64))
                    .collect(),
            ),
        }
    }
}

/// An operator type: validates a node once and produces a kernel for it
pub trait Operator: Send + Sync + Debug {
    /// Check attributes and inputs of `node` and bind them into a kernel
    fn build(&self, node: &Node, cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>>;

    /// Input positions this operator may overwrite when it owns the buffer
    fn inplace_inputs(&self) -> &'static [usize] {
        &[]
    }
}

/// A node bound to its validated attributes
pub trait Kernel: Send + Sync + Debug {
    /// Compute the operation
    fn compute(&self, inputs: OpInputs<'_>, ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>>;

    /// Infer output types and shapes from input metadata; empty when unknown
    fn infer_shapes(&self, _inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(Vec::new())
    }
}

/// Ordered arguments of one kernel invocation
///
/// `None` marks an omitted optional input. Owned entries may be consumed by
/// kernels that compute in place.
#[derive(Debug, Default)]
pub struct OpInputs<'a> {
    values: Vec<Option<Cow<'a, Tensor>>>,
}

impl<'a> OpInputs<'a> {
    pub fn new(values: Vec<Option<Cow<'a, Tensor>>>) -> Self {
        Self { values }
    }

    /// Inputs that are all present and borrowed
    pub fn from_refs(values: &[&'a Tensor]) -> Self {
        Self {
            values: values.iter().map(|t| Some(Cow::Borrowed(*t))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Input at `index`, failing when it is absent
    pub fn require(&self, index: usize, op_type: &str) -> Result<&Tensor> {
        self.get(index).ok_or_else(|| {
            Error::ValidationError(format!(
                "{} requires input {}, got {} inputs",
                op_type,
                index,
                self.values.len()
            ))
        })
    }

    /// Move the input at `index` out, keeping ownership when the engine handed it over
    pub fn take(&mut self, index: usize, op_type: &str) -> Result<Cow<'a, Tensor>> {
        self.values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                Error::ValidationError(format!("{} requires input {}", op_type, index))
            })
    }

    pub fn is_owned(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(Some(Cow::Owned(_))))
    }

    /// Present inputs, in order
    pub fn present(&self) -> impl Iterator<Item = &Tensor> {
        self.values.iter().filter_map(|v| v.as_deref())
    }
}

/// State available while an operator builds its kernel
pub struct BuildContext<'r> {
    registry: &'r OperatorRegistry,
    opset_imports: &'r HashMap<String, i64>,
    visible: HashSet<String>,
}

impl<'r> BuildContext<'r> {
    pub fn new(
        registry: &'r OperatorRegistry,
        opset_imports: &'r HashMap<String, i64>,
        visible: HashSet<String>,
    ) -> Self {
        Self {
            registry,
            opset_imports,
            visible,
        }
    }

    pub fn registry(&self) -> &'r OperatorRegistry {
        self.registry
    }

    pub fn opset_imports(&self) -> &'r HashMap<String, i64> {
        self.opset_imports
    }

    /// Names of the scope the node lives in
    pub fn visible_names(&self) -> &HashSet<String> {
        &self.visible
    }

    /// Compile a node's subgraph against the enclosing scope
    pub fn compile_subgraph(&self, graph: &Graph) -> Result<Arc<ExecutionPlan>> {
        debug!("Compiling subgraph '{}'", graph.name);
        let plan = ExecutionPlan::compile_scoped(
            graph,
            self.registry,
            self.opset_imports,
            &self.visible,
        )?;
        Ok(Arc::new(plan))
    }
}

/// State available to a kernel while it computes
pub struct ComputeContext<'a> {
    scope: &'a ValueTable<'a>,
    options: &'a ExecutionOptions,
    node_name: &'a str,
}

impl<'a> ComputeContext<'a> {
    pub fn new(scope: &'a ValueTable<'a>, options: &'a ExecutionOptions, node_name: &'a str) -> Self {
        Self {
            scope,
            options,
            node_name,
        }
    }

    pub fn node_name(&self) -> &str {
        self.node_name
    }

    pub fn options(&self) -> &ExecutionOptions {
        self.options
    }

    /// Run a compiled subgraph with positional inputs; the current table is its parent scope
    pub fn run_subgraph(&self, plan: &ExecutionPlan, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        plan::execute_subgraph(plan, inputs, self.scope, self.options)
    }
}

/// Registry for ONNX operators
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    operators: HashMap<(String, String), BTreeMap<i64, Box<dyn Operator>>>,
    inplace_hints: HashMap<(String, String, i64), &'static [usize]>,
}

impl OperatorRegistry {
    /// Create a new, empty operator registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator available from opset `since_version` onward
    pub fn register_operator(
        &mut self,
        name: &str,
        domain: &str,
        since_version: i64,
        op: Box<dyn Operator>,
    ) -> Result<()> {
        let domain = normalize_domain(domain);
        let versions = self
            .operators
            .entry((name.to_string(), domain.to_string()))
            .or_default();

        if versions.contains_key(&since_version) {
            return Err(Error::InvalidOperator(format!(
                "Operator {}.{} (version {}) is already registered",
                domain, name, since_version
            )));
        }

        let hints = op.inplace_inputs();
        if !hints.is_empty() {
            self.inplace_hints
                .insert((name.to_string(), domain.to_string(), since_version), hints);
        }
        versions.insert(since_version, op);
        Ok(())
    }

    fn register_builtin(&mut self, name: &str, since_version: i64, op: Box<dyn Operator>) {
        let hints = op.inplace_inputs();
        if !hints.is_empty() {
            self.inplace_hints
                .insert((name.to_string(), String::new(), since_version), hints);
        }
        self.operators
            .entry((name.to_string(), String::new()))
            .or_default()
            .insert(since_version, op);
    }

    /// Newest implementation whose `since_version` does not exceed `version`
    pub fn resolve(&self, name: &str, domain: &str, version: i64) -> Result<ResolvedOperator<'_>> {
        let domain = normalize_domain(domain);
        let unsupported = || Error::UnsupportedOperator {
            op_type: name.to_string(),
            domain: domain.to_string(),
            version,
        };

        let versions = self
            .operators
            .get(&(name.to_string(), domain.to_string()))
            .ok_or_else(unsupported)?;
        let (since, op) = versions.range(..=version).next_back().ok_or_else(unsupported)?;
        let inplace = self
            .inplace_hints
            .get(&(name.to_string(), domain.to_string(), *since))
            .copied()
            .unwrap_or(&[]);

        Ok(ResolvedOperator {
            operator: op.as_ref(),
            since_version: *since,
            inplace,
        })
    }

    /// Resolve the operator for `node` using the imported opsets
    pub fn resolve_node(
        &self,
        node: &Node,
        opset_imports: &HashMap<String, i64>,
    ) -> Result<ResolvedOperator<'_>> {
        let version = resolve_opset(opset_imports, &node.domain);
        self.resolve(&node.op_type, &node.domain, version)
    }

    pub fn contains(&self, name: &str, domain: &str) -> bool {
        self.operators
            .contains_key(&(name.to_string(), normalize_domain(domain).to_string()))
    }

    /// Registered (domain, op_type) pairs, sorted
    pub fn operator_names(&self) -> Vec<(String, String)> {
        let mut names: Vec<_> = self.operators.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registry holding every built-in operator
    pub fn with_standard_operators() -> Self {
        use super::activations::{LeakyRelu, Relu, Sigmoid, Tanh};
        use super::control_flow::{If, Scan};
        use super::elementwise::{Binary, Unary, Where};
        use super::math::gemm::Gemm;
        use super::math::matmul::MatMul;
        use super::reduce::{Reduce, ReduceKind};
        use super::selection::{CumSum, TopK};
        use super::shape::{Cast, Concat, Constant, Identity, Reshape, Squeeze, Transpose, Unsqueeze};
        use super::tensor::BinaryOp;
        use super::elementwise::UnaryKind;

        let mut registry = Self::new();

        registry.register_builtin("Identity", 1, Box::new(Identity));
        registry.register_builtin("Constant", 1, Box::new(Constant));

        // Arithmetic
        registry.register_builtin("Add", 7, Box::new(Binary(BinaryOp::Add)));
        registry.register_builtin("Sub", 7, Box::new(Binary(BinaryOp::Sub)));
        registry.register_builtin("Mul", 7, Box::new(Binary(BinaryOp::Mul)));
        registry.register_builtin("Div", 7, Box::new(Binary(BinaryOp::Div)));
        registry.register_builtin("Neg", 6, Box::new(Unary(UnaryKind::Neg)));
        registry.register_builtin("Abs", 6, Box::new(Unary(UnaryKind::Abs)));
        registry.register_builtin("Sqrt", 6, Box::new(Unary(UnaryKind::Sqrt)));
        registry.register_builtin("Exp", 6, Box::new(Unary(UnaryKind::Exp)));
        registry.register_builtin("Where", 9, Box::new(Where));

        // Activations
        registry.register_builtin("Relu", 6, Box::new(Relu));
        registry.register_builtin("LeakyRelu", 6, Box::new(LeakyRelu));
        registry.register_builtin("Sigmoid", 6, Box::new(Sigmoid));
        registry.register_builtin("Tanh", 6, Box::new(Tanh));

        // Linear algebra
        registry.register_builtin("MatMul", 1, Box::new(MatMul));
        registry.register_builtin("Gemm", 7, Box::new(Gemm));

        // Shape manipulation
        registry.register_builtin("Transpose", 1, Box::new(Transpose));
        registry.register_builtin("Reshape", 5, Box::new(Reshape));
        registry.register_builtin("Squeeze", 1, Box::new(Squeeze));
        registry.register_builtin("Unsqueeze", 1, Box::new(Unsqueeze));
        registry.register_builtin("Concat", 4, Box::new(Concat));
        registry.register_builtin("Cast", 6, Box::new(Cast));

        // Reductions
        registry.register_builtin("ReduceSum", 1, Box::new(Reduce(ReduceKind::Sum)));
        registry.register_builtin("ReduceSumSquare", 1, Box::new(Reduce(ReduceKind::SumSquare)));
        registry.register_builtin("ReduceMean", 1, Box::new(Reduce(ReduceKind::Mean)));
        registry.register_builtin("ReduceMax", 1, Box::new(Reduce(ReduceKind::Max)));

        registry.register_builtin("TopK", 10, Box::new(TopK));
        registry.register_builtin("CumSum", 11, Box::new(CumSum));

        // Control flow
        registry.register_builtin("If", 1, Box::new(If));
        registry.register_builtin("Scan", 9, Box::new(Scan));

        registry
    }
}

/// Result of a registry lookup
#[derive(Debug, Clone, Copy)]
pub struct ResolvedOperator<'r> {
    pub operator: &'r dyn Operator,
    pub since_version: i64,
    pub inplace: &'static [usize],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::shape::Identity;

    #[test]
    fn test_resolve_picks_newest_compatible_version() {
        let mut registry = OperatorRegistry::new();
        registry
            .register_operator("Custom", "my.domain", 1, Box::new(Identity))
            .unwrap();
        registry
            .register_operator("Custom", "my.domain", 5, Box::new(Identity))
            .unwrap();

        assert_eq!(registry.resolve("Custom", "my.domain", 4).unwrap().since_version, 1);
        assert_eq!(registry.resolve("Custom", "my.domain", 7).unwrap().since_version, 5);
        assert!(registry.resolve("Custom", "my.domain", 0).is_err());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = OperatorRegistry::new();
        registry.register_operator("Custom", "", 1, Box::new(Identity)).unwrap();
        assert!(matches!(
            registry.register_operator("Custom", "", 1, Box::new(Identity)),
            Err(Error::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_unknown_operator_is_reported_with_its_name() {
        let registry = OperatorRegistry::with_standard_operators();
        match registry.resolve("Conv", "", 13) {
            Err(Error::UnsupportedOperator { op_type, .. }) => assert_eq!(op_type, "Conv"),
            other => panic!("unexpected {:?}", other.map(|r| r.since_version)),
        }
    }

    #[test]
    fn test_default_domain_alias() {
        let registry = OperatorRegistry::with_standard_operators();
        assert!(registry.resolve("Add", "ai.onnx", 13).is_ok());
        assert!(registry.contains("Relu", "ai.onnx"));
    }

    #[test]
    fn test_inplace_hints_come_from_the_operator() {
        let registry = OperatorRegistry::with_standard_operators();
        assert_eq!(registry.resolve("CumSum", "", 14).unwrap().inplace, &[0]);
        assert!(registry.resolve("Add", "", 14).unwrap().inplace.is_empty());
    }
}
