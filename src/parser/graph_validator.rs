//! Structural checks on graphs and their nested scopes.

use std::collections::HashSet;

use log::debug;

use crate::error::{Error, Result};
use crate::model::Graph;

/// Checks name resolution, output uniqueness and initializer payloads
pub struct GraphValidator;

impl GraphValidator {
    /// Validate a top-level graph
    pub fn validate(graph: &Graph) -> Result<()> {
        Self::validate_scoped(graph, &HashSet::new())
    }

    /// Validate a graph nested in a scope where `outer` names are visible
    pub fn validate_scoped(graph: &Graph, outer: &HashSet<String>) -> Result<()> {
        let mut defined: HashSet<&str> = HashSet::new();

        for init in &graph.initializers {
            if !defined.insert(init.name.as_str()) {
                return Err(structural(graph, format!("initializer '{}' is declared twice", init.name)));
            }
            if !init.has_complete_value() {
                return Err(structural(
                    graph,
                    format!(
                        "initializer '{}' ({} with dims {:?}) has no complete value",
                        init.name, init.data_type, init.dims
                    ),
                ));
            }
        }

        let mut inputs: HashSet<&str> = HashSet::new();
        for input in &graph.inputs {
            if !inputs.insert(input.name.as_str()) {
                return Err(structural(graph, format!("input '{}' is declared twice", input.name)));
            }
        }
        defined.extend(inputs);

        for node in &graph.nodes {
            for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                if outer.contains(output) || !defined.insert(output.as_str()) {
                    return Err(structural(
                        graph,
                        format!("node '{}' redefines '{}'", node.name, output),
                    ));
                }
            }
        }

        let resolves = |name: &str| defined.contains(name) || outer.contains(name);

        for node in &graph.nodes {
            if let Some(missing) = node.present_inputs().find(|name| !resolves(name)) {
                return Err(structural(
                    graph,
                    format!("node '{}' reads undefined value '{}'", node.name, missing),
                ));
            }
        }

        for output in &graph.outputs {
            if !resolves(&output.name) {
                return Err(structural(
                    graph,
                    format!("output '{}' is not produced", output.name),
                ));
            }
        }

        let has_subgraphs = graph.nodes.iter().any(|n| n.subgraphs().next().is_some());
        if has_subgraphs {
            let mut visible = outer.clone();
            visible.extend(defined.iter().map(|name| name.to_string()));
            for node in &graph.nodes {
                for sub in node.subgraphs() {
                    Self::validate_scoped(sub, &visible)?;
                }
            }
        }

        debug!("Validated graph '{}' ({} nodes)", graph.name, graph.nodes.len());
        Ok(())
    }
}

fn structural(graph: &Graph, message: String) -> Error {
    if graph.name.is_empty() {
        Error::StructuralError(message)
    } else {
        Error::StructuralError(format!("graph '{}': {}", graph.name, message))
    }
}
