pub mod dead_code;
pub mod identity;
pub mod redundant;

use std::collections::HashMap;

use crate::model::Graph;

pub use dead_code::DeadCodeElimination;
pub use identity::IdentityElimination;
pub use redundant::RedundantNodeElimination;

/// Point every renamed value at the end of its rename chain
pub(crate) fn resolve_renames(renames: &HashMap<String, String>) -> HashMap<String, String> {
    renames
        .keys()
        .map(|from| {
            let mut target = &renames[from];
            let mut hops = 0;
            while let Some(next) = renames.get(target) {
                // A well-formed graph has no rename loops; stop anyway
                hops += 1;
                if hops > renames.len() {
                    break;
                }
                target = next;
            }
            (from.clone(), target.clone())
        })
        .collect()
}

/// Nodes in `graph` and, recursively, in all of its nested graphs
pub(crate) fn total_nodes(graph: &Graph) -> usize {
    graph
        .nodes
        .iter()
        .map(|n| 1 + n.subgraphs().map(total_nodes).sum::<usize>())
        .sum()
}
