pub mod graph_optimizer;
pub mod passes;

pub use graph_optimizer::{
    GraphOptimizer, OptimizationOptions, OptimizationPass, OptimizationStats, PassResult,
};
pub use passes::{DeadCodeElimination, IdentityElimination, RedundantNodeElimination};
