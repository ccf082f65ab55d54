use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ops::tensor::Tensor;
use crate::optimization::graph_optimizer::OptimizationOptions;

/// Optimization level applied when an engine is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// Run the graph as loaded
    #[default]
    None,
    /// Identity elision and dead-code elimination
    Basic,
    /// Basic plus redundant-subexpression folding
    Standard,
}

/// Options for execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Evict intermediate values right after their last consumer runs
    pub eager_cleanup: bool,
    /// Let operators with an in-place hint reuse buffers the run owns
    pub enable_inplace: bool,
    /// Level of optimization to apply
    pub optimization_level: OptimizationLevel,
    /// Budgets for the optimization passes
    pub optimization: OptimizationOptions,
    /// Number of threads `run_batch` uses (0 = rayon's global pool)
    pub thread_count: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            eager_cleanup: true,
            enable_inplace: true,
            optimization_level: OptimizationLevel::None,
            optimization: OptimizationOptions::default(),
            thread_count: 0,
        }
    }
}

impl ExecutionOptions {
    /// Create a new execution options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidOptions(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidOptions(e.to_string()))
    }

    /// Enable or disable eager cleanup of dead intermediates
    pub fn set_eager_cleanup(mut self, enable: bool) -> Self {
        self.eager_cleanup = enable;
        self
    }

    /// Enable or disable in-place execution
    pub fn set_inplace(mut self, enable: bool) -> Self {
        self.enable_inplace = enable;
        self
    }

    /// Set the optimization level
    pub fn set_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    /// Set the optimization budgets
    pub fn set_optimization_options(mut self, options: OptimizationOptions) -> Self {
        self.optimization = options;
        self
    }

    /// Set the number of threads to use
    pub fn set_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }
}

/// Values visible during one graph execution
///
/// Initializers are borrowed from the compiled plan; inputs and computed
/// values are owned. A subgraph's table links to its caller's table and
/// reads through it, but only ever writes or evicts its own entries.
#[derive(Debug, Default)]
pub struct ValueTable<'a> {
    values: HashMap<String, Cow<'a, Tensor>>,
    parent: Option<&'a ValueTable<'a>>,
}

impl<'a> ValueTable<'a> {
    pub fn new(parent: Option<&'a ValueTable<'a>>) -> Self {
        Self {
            values: HashMap::new(),
            parent,
        }
    }

    /// Look a name up here, then in the enclosing scopes
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        match self.values.get(name) {
            Some(value) => Some(value.as_ref()),
            None => self.parent.and_then(|p| p.get(name)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Cow<'a, Tensor>) {
        self.values.insert(name.into(), value);
    }

    /// Drop a local value; enclosing scopes are never touched
    pub fn evict(&mut self, name: &str) -> bool {
        self.values.remove(name).is_some()
    }

    /// Remove a local value only if this table owns its buffer
    pub fn take_owned(&mut self, name: &str) -> Option<Tensor> {
        if !matches!(self.values.get(name), Some(Cow::Owned(_))) {
            return None;
        }
        match self.values.remove(name) {
            Some(Cow::Owned(tensor)) => Some(tensor),
            _ => None,
        }
    }

    /// Remove a local value, copying it if it was borrowed
    pub fn take_local(&mut self, name: &str) -> Option<Tensor> {
        self.values.remove(name).map(Cow::into_owned)
    }

    /// Number of local entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(v: f32) -> Tensor {
        Tensor::scalar(v)
    }

    #[test]
    fn test_child_reads_through_parent() {
        let mut parent = ValueTable::new(None);
        parent.insert("x", Cow::Owned(scalar(1.0)));
        let mut child = ValueTable::new(Some(&parent));
        child.insert("y", Cow::Owned(scalar(2.0)));

        assert!(child.contains("x"));
        assert!(!child.contains_local("x"));
        assert!(!child.evict("x"));
        assert_eq!(child.get("y"), Some(&scalar(2.0)));
    }

    #[test]
    fn test_take_owned_skips_borrowed_values() {
        let constant = scalar(3.0);
        let mut table = ValueTable::new(None);
        table.insert("c", Cow::Borrowed(&constant));
        table.insert("v", Cow::Owned(scalar(4.0)));

        assert_eq!(table.take_owned("c"), None);
        assert!(table.contains_local("c"));
        assert_eq!(table.take_owned("v"), Some(scalar(4.0)));
        assert!(!table.contains_local("v"));
    }

    #[test]
    fn test_options_from_partial_json() {
        let options = ExecutionOptions::from_json(r#"{"eager_cleanup": false}"#).unwrap();
        assert!(!options.eager_cleanup);
        assert!(options.enable_inplace);
        assert_eq!(options.optimization_level, OptimizationLevel::None);
        assert!(ExecutionOptions::from_json("{not json").is_err());
    }
}
