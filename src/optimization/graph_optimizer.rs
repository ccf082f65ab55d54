use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::execution::context::OptimizationLevel;
use crate::model::{Graph, OnnxModel};

use super::passes::{DeadCodeElimination, IdentityElimination, RedundantNodeElimination};

/// Budgets shared by the optimization passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationOptions {
    /// Upper bound on full rounds of all passes
    pub max_iterations: usize,
    /// Elements of each list or tensor payload that feed a node hash
    pub max_hash_size: usize,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_hash_size: 1000,
        }
    }
}

impl OptimizationOptions {
    pub fn set_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn set_max_hash_size(mut self, max_hash_size: usize) -> Self {
        self.max_hash_size = max_hash_size;
        self
    }
}

/// Result of running an optimization pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassResult {
    /// Name of the pass
    pub name: String,
    /// Nodes removed, nested graphs included
    pub nodes_removed: usize,
    pub initializers_removed: usize,
    /// Whether the pass made any changes
    pub changed: bool,
    /// Duration of the pass
    pub duration: Duration,
}

impl PassResult {
    pub fn new(name: &str, nodes_removed: usize, initializers_removed: usize) -> Self {
        Self {
            name: name.to_string(),
            nodes_removed,
            initializers_removed,
            changed: nodes_removed > 0 || initializers_removed > 0,
            duration: Duration::ZERO,
        }
    }
}

/// Statistics from running optimization passes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationStats {
    /// Results from each pass, in the order they ran
    pub pass_results: Vec<PassResult>,
    /// Rounds executed
    pub iterations: usize,
    /// Total time spent optimizing
    pub total_duration: Duration,
}

impl OptimizationStats {
    /// Create a new optimization stats object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass result
    pub fn add_pass_result(&mut self, result: PassResult) {
        self.total_duration += result.duration;
        self.pass_results.push(result);
    }

    pub fn nodes_removed(&self) -> usize {
        self.pass_results.iter().map(|r| r.nodes_removed).sum()
    }

    pub fn initializers_removed(&self) -> usize {
        self.pass_results.iter().map(|r| r.initializers_removed).sum()
    }

    /// Nodes removed by the passes called `name`
    pub fn removed_by(&self, name: &str) -> usize {
        self.pass_results
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.nodes_removed)
            .sum()
    }
}

/// Trait for graph optimization passes
///
/// A pass rewrites a graph without changing the value of any declared output.
pub trait OptimizationPass: Send + Sync {
    /// Name of the pass
    fn name(&self) -> &str;

    /// Run the pass on the graph
    fn run(&self, graph: &mut Graph) -> Result<PassResult>;
}

/// Graph optimizer that applies optimization passes until nothing changes
pub struct GraphOptimizer {
    /// Registered optimization passes
    passes: Vec<Box<dyn OptimizationPass>>,
    options: OptimizationOptions,
}

impl GraphOptimizer {
    /// Optimizer running every built-in pass
    pub fn new(options: OptimizationOptions) -> Self {
        Self::for_level(OptimizationLevel::Standard, options)
    }

    /// Optimizer without passes
    pub fn empty(options: OptimizationOptions) -> Self {
        Self {
            passes: Vec::new(),
            options,
        }
    }

    /// Register an optimization pass
    pub fn register_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Create the built-in passes for the given optimization level
    pub fn create_default_passes(
        level: OptimizationLevel,
        options: &OptimizationOptions,
    ) -> Vec<Box<dyn OptimizationPass>> {
        match level {
            OptimizationLevel::None => Vec::new(),
            OptimizationLevel::Basic => vec![
                Box::new(IdentityElimination::new()) as Box<dyn OptimizationPass>,
                Box::new(DeadCodeElimination::new()),
            ],
            OptimizationLevel::Standard => vec![
                Box::new(IdentityElimination::new()) as Box<dyn OptimizationPass>,
                Box::new(RedundantNodeElimination::new(options.max_hash_size)),
                Box::new(DeadCodeElimination::new()),
            ],
        }
    }

    pub fn for_level(level: OptimizationLevel, options: OptimizationOptions) -> Self {
        Self {
            passes: Self::create_default_passes(level, &options),
            options,
        }
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes in order, repeating until a round changes nothing.
    /// On error `graph` is left as it was.
    pub fn optimize(&self, graph: &mut Graph) -> Result<OptimizationStats> {
        let mut stats = OptimizationStats::new();
        if self.passes.is_empty() {
            return Ok(stats);
        }

        let mut working = graph.clone();

        while stats.iterations < self.options.max_iterations {
            stats.iterations += 1;
            let mut changed = false;
            for pass in &self.passes {
                let start = Instant::now();
                let mut result = pass.run(&mut working)?;
                result.duration = start.elapsed();
                debug!(
                    "Pass {} (round {}): {} nodes, {} initializers removed",
                    result.name, stats.iterations, result.nodes_removed, result.initializers_removed
                );
                changed |= result.changed;
                stats.add_pass_result(result);
            }
            if !changed {
                break;
            }
        }

        info!(
            "Optimization of '{}' finished after {} rounds in {:?}",
            working.name, stats.iterations, stats.total_duration
        );
        *graph = working;
        Ok(stats)
    }

    pub fn optimize_model(&self, model: &mut OnnxModel) -> Result<OptimizationStats> {
        self.optimize(&mut model.graph)
    }
}
