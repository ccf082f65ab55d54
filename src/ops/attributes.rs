//! Typed access to node attributes for kernel construction.

use crate::error::{Error, Result};
use crate::model::{Attribute, Graph, Node, Tensor as ModelTensor};

/// Read-only accessor producing `AttributeError`s that name the node's operator
pub struct Attributes<'n> {
    node: &'n Node,
}

impl<'n> Attributes<'n> {
    pub fn new(node: &'n Node) -> Self {
        Self { node }
    }

    fn mismatch(&self, name: &str, expected: &str, found: &Attribute) -> Error {
        Error::attribute(
            &self.node.op_type,
            name,
            format!("expected {}, found {}", expected, found.kind()),
        )
    }

    fn missing(&self, name: &str) -> Error {
        Error::attribute(&self.node.op_type, name, "required attribute is missing")
    }

    pub fn has(&self, name: &str) -> bool {
        self.node.attributes.contains_key(name)
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>> {
        match self.node.attributes.get(name) {
            None => Ok(None),
            Some(Attribute::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(self.mismatch(name, "INT", other)),
        }
    }

    pub fn int_or(&self, name: &str, default: i64) -> Result<i64> {
        Ok(self.int(name)?.unwrap_or(default))
    }

    pub fn required_int(&self, name: &str) -> Result<i64> {
        self.int(name)?.ok_or_else(|| self.missing(name))
    }

    /// Integer flag; any value other than 0 or 1 is rejected
    pub fn flag(&self, name: &str, default: bool) -> Result<bool> {
        match self.int(name)? {
            None => Ok(default),
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            Some(v) => Err(Error::attribute(
                &self.node.op_type,
                name,
                format!("expected 0 or 1, found {}", v),
            )),
        }
    }

    pub fn float_or(&self, name: &str, default: f32) -> Result<f32> {
        match self.node.attributes.get(name) {
            None => Ok(default),
            Some(Attribute::Float(v)) => Ok(*v),
            Some(other) => Err(self.mismatch(name, "FLOAT", other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<Option<Vec<i64>>> {
        match self.node.attributes.get(name) {
            None => Ok(None),
            Some(Attribute::Ints(v)) => Ok(Some(v.clone())),
            Some(other) => Err(self.mismatch(name, "INTS", other)),
        }
    }

    pub fn tensor(&self, name: &str) -> Result<Option<&'n ModelTensor>> {
        match self.node.attributes.get(name) {
            None => Ok(None),
            Some(Attribute::Tensor(t)) => Ok(Some(t)),
            Some(other) => Err(self.mismatch(name, "TENSOR", other)),
        }
    }

    pub fn required_graph(&self, name: &str) -> Result<&'n Graph> {
        match self.node.attributes.get(name) {
            None => Err(self.missing(name)),
            Some(Attribute::Graph(g)) => Ok(g),
            Some(other) => Err(self.mismatch(name, "GRAPH", other)),
        }
    }
}

/// Fail unless the node has between `min` and `max` inputs and at least `outputs` outputs
pub fn check_arity(node: &Node, min: usize, max: usize, outputs: usize) -> Result<()> {
    if node.inputs.len() < min || node.inputs.len() > max {
        return Err(Error::ValidationError(format!(
            "{} operator requires {} to {} inputs, got {}",
            node.op_type,
            min,
            max,
            node.inputs.len()
        )));
    }
    if node.outputs.len() < outputs {
        return Err(Error::ValidationError(format!(
            "{} operator requires at least {} outputs, got {}",
            node.op_type,
            outputs,
            node.outputs.len()
        )));
    }
    Ok(())
}
