use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Index of a node inside `Graph::nodes`
pub type NodeId = usize;

/// Default opset version assumed for graphs built in memory
pub const DEFAULT_OPSET_VERSION: i64 = 13;

/// Metadata about the ONNX model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMetadata {
    pub producer_name: String,
    pub producer_version: String,
    pub domain: String,
    pub model_version: i64,
    pub doc_string: String,
    pub graph_name: String,
    pub ir_version: i64,
}

/// ONNX data types
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Undefined,
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    String,
    Bool,
    Float16,
    Complex64,
    Complex128,
    BFloat16,
}

impl DataType {
    pub fn from_proto(proto_type: i32) -> Self {
        match proto_type {
            1 => DataType::Float,
            2 => DataType::Uint8,
            3 => DataType::Int8,
            4 => DataType::Uint16,
            5 => DataType::Int16,
            6 => DataType::Int32,
            7 => DataType::Int64,
            8 => DataType::String,
            9 => DataType::Bool,
            10 => DataType::Float16,
            11 => DataType::Double,
            12 => DataType::Uint32,
            13 => DataType::Uint64,
            14 => DataType::Complex64,
            15 => DataType::Complex128,
            16 => DataType::BFloat16,
            _ => DataType::Undefined,
        }
    }

    pub fn to_proto(self) -> i32 {
        match self {
            DataType::Undefined => 0,
            DataType::Float => 1,
            DataType::Uint8 => 2,
            DataType::Int8 => 3,
            DataType::Uint16 => 4,
            DataType::Int16 => 5,
            DataType::Int32 => 6,
            DataType::Int64 => 7,
            DataType::String => 8,
            DataType::Bool => 9,
            DataType::Float16 => 10,
            DataType::Double => 11,
            DataType::Uint32 => 12,
            DataType::Uint64 => 13,
            DataType::Complex64 => 14,
            DataType::Complex128 => 15,
            DataType::BFloat16 => 16,
        }
    }

    /// Size of one element in the little-endian raw encoding, `None` for strings
    pub fn element_size(self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => Some(1),
            DataType::Int16 | DataType::Uint16 | DataType::Float16 | DataType::BFloat16 => Some(2),
            DataType::Float | DataType::Int32 | DataType::Uint32 => Some(4),
            DataType::Double | DataType::Int64 | DataType::Uint64 | DataType::Complex64 => Some(8),
            DataType::Complex128 => Some(16),
            DataType::String | DataType::Undefined => None,
        }
    }

    /// Check if the data type is a floating point type
    pub fn is_floating_point(&self) -> bool {
        matches!(
            self,
            DataType::Float | DataType::Double | DataType::Float16 | DataType::BFloat16
        )
    }

    /// Check if the data type is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Uint8
                | DataType::Uint16
                | DataType::Uint32
                | DataType::Uint64
        )
    }
}

/// One dimension of a declared shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Value(i64),
    Param(String),
    Unknown,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Value(v) => write!(f, "{}", v),
            Dimension::Param(p) => write!(f, "{}", p),
            Dimension::Unknown => write!(f, "?"),
        }
    }
}

impl From<i64> for Dimension {
    fn from(value: i64) -> Self {
        Dimension::Value(value)
    }
}

/// A declared graph input, output or intermediate value
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub data_type: DataType,
    /// `None` when even the rank is unknown
    pub shape: Option<Vec<Dimension>>,
    pub doc_string: String,
}

impl TensorInfo {
    pub fn new(name: &str, data_type: DataType, shape: Option<Vec<Dimension>>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            shape,
            doc_string: String::new(),
        }
    }

    /// Readable type such as `float(?, 2)`
    pub fn type_string(&self) -> String {
        match &self.shape {
            Some(dims) => {
                let dims: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                format!("{}({})", self.data_type, dims.join(", "))
            }
            None => format!("{}(?)", self.data_type),
        }
    }
}

/// Constant tensor stored in the graph (initializers and tensor attributes)
///
/// Numeric payloads are kept as little-endian bytes so that two tensors are
/// equal exactly when their encodings are bit-identical.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
    pub data: Vec<u8>,
    pub strings: Vec<String>,
    pub doc_string: String,
}

impl Tensor {
    pub fn new(name: &str, data_type: DataType, dims: Vec<i64>, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            dims,
            data,
            strings: Vec::new(),
            doc_string: String::new(),
        }
    }

    pub fn from_f32(name: &str, dims: Vec<i64>, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, DataType::Float, dims, data)
    }

    pub fn from_i64(name: &str, dims: Vec<i64>, values: &[i64]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, DataType::Int64, dims, data)
    }

    pub fn from_strings(name: &str, dims: Vec<i64>, values: Vec<String>) -> Self {
        Self {
            strings: values,
            ..Self::new(name, DataType::String, dims, Vec::new())
        }
    }

    /// Number of elements implied by the dims (1 for scalars), `None` when
    /// a dimension is negative or the count does not fit in `usize`
    pub fn element_count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
    }

    /// True when the payload holds exactly the elements the dims announce
    pub fn has_complete_value(&self) -> bool {
        let count = match self.element_count() {
            Some(count) => count,
            None => return false,
        };
        match self.data_type.element_size() {
            Some(size) => count
                .checked_mul(size)
                .map_or(false, |bytes| bytes == self.data.len()),
            None if self.data_type == DataType::String => self.strings.len() == count,
            None => false,
        }
    }

    /// Size of the payload in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len() + self.strings.iter().map(|s| s.len()).sum::<usize>()
    }
}

/// Node attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Tensor),
    Graph(Graph),

    // List types
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
    Tensors(Vec<Tensor>),
    Graphs(Vec<Graph>),
}

impl Attribute {
    /// Name of the attribute kind as used in the ONNX type tag
    pub fn kind(&self) -> &'static str {
        match self {
            Attribute::Float(_) => "FLOAT",
            Attribute::Int(_) => "INT",
            Attribute::String(_) => "STRING",
            Attribute::Tensor(_) => "TENSOR",
            Attribute::Graph(_) => "GRAPH",
            Attribute::Floats(_) => "FLOATS",
            Attribute::Ints(_) => "INTS",
            Attribute::Strings(_) => "STRINGS",
            Attribute::Tensors(_) => "TENSORS",
            Attribute::Graphs(_) => "GRAPHS",
        }
    }

    /// Equality that ignores node names and doc strings inside nested graphs
    pub fn structurally_eq(&self, other: &Attribute) -> bool {
        match (self, other) {
            (Attribute::Graph(a), Attribute::Graph(b)) => a.structurally_eq(b),
            (Attribute::Graphs(a), Attribute::Graphs(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
            }
            (Attribute::Float(a), Attribute::Float(b)) => a.to_bits() == b.to_bits(),
            (Attribute::Floats(a), Attribute::Floats(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (a, b) => a == b,
        }
    }
}

/// Node in the computation graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: BTreeMap<String, Attribute>,
    pub doc_string: String,
}

impl Node {
    pub fn new<I, O>(op_type: &str, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            name: String::new(),
            op_type: op_type.to_string(),
            domain: String::new(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            attributes: BTreeMap::new(),
            doc_string: String::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn with_attribute(mut self, name: &str, value: Attribute) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Non-empty input names (empty names mark omitted optional inputs)
    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(String::as_str).filter(|n| !n.is_empty())
    }

    /// Graphs held by this node's attributes
    pub fn subgraphs(&self) -> impl Iterator<Item = &Graph> {
        self.attributes.values().flat_map(|attr| match attr {
            Attribute::Graph(g) => std::slice::from_ref(g).iter(),
            Attribute::Graphs(gs) => gs.iter(),
            _ => <&[Graph]>::default().iter(),
        })
    }

    pub fn subgraphs_mut(&mut self) -> impl Iterator<Item = &mut Graph> {
        self.attributes.values_mut().flat_map(|attr| match attr {
            Attribute::Graph(g) => std::slice::from_mut(g).iter_mut(),
            Attribute::Graphs(gs) => gs.iter_mut(),
            _ => <&mut [Graph]>::default().iter_mut(),
        })
    }

    /// Names the node's subgraphs read from the enclosing scope
    pub fn implicit_inputs(&self) -> BTreeSet<String> {
        self.subgraphs().flat_map(|g| g.outer_references()).collect()
    }

    /// Explicit and implicit dependencies of the node
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self.present_inputs().map(str::to_string).collect();
        for name in self.implicit_inputs() {
            if !deps.contains(&name) {
                deps.push(name);
            }
        }
        deps
    }

    /// Rewrites explicit inputs and the outer references of nested graphs
    pub fn rename_references(&mut self, renames: &HashMap<String, String>) -> usize {
        if renames.is_empty() {
            return 0;
        }
        let mut count = 0;
        for input in self.inputs.iter_mut() {
            if let Some(target) = renames.get(input.as_str()) {
                *input = target.clone();
                count += 1;
            }
        }
        for sub in self.subgraphs_mut() {
            let sub_local = sub.local_names();
            let visible: HashMap<String, String> = renames
                .iter()
                .filter(|(from, _)| !sub_local.contains(from.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            count += sub.rename_references(&visible);
        }
        count
    }

    fn structurally_eq(&self, other: &Node) -> bool {
        self.op_type == other.op_type
            && self.domain == other.domain
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(&other.attributes)
                .all(|((ka, va), (kb, vb))| ka == kb && va.structurally_eq(vb))
    }
}

/// Graph structure containing nodes and tensors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
    pub initializers: Vec<Tensor>,
    pub value_info: Vec<TensorInfo>,
    pub doc_string: String,
}

impl Graph {
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    pub fn initializer(&self, name: &str) -> Option<&Tensor> {
        self.initializers.iter().find(|t| t.name == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o.name == name)
    }

    /// Every name this graph defines itself: inputs, initializers and node outputs
    pub fn local_names(&self) -> HashSet<String> {
        let mut names: HashSet<String> = self.inputs.iter().map(|i| i.name.clone()).collect();
        names.extend(self.initializers.iter().map(|t| t.name.clone()));
        for node in &self.nodes {
            names.extend(node.outputs.iter().filter(|o| !o.is_empty()).cloned());
        }
        names
    }

    /// Names read by this graph (or its nested graphs) that it does not define
    pub fn outer_references(&self) -> BTreeSet<String> {
        let local = self.local_names();
        let mut outer = BTreeSet::new();
        for node in &self.nodes {
            for name in node.dependencies() {
                if !local.contains(&name) {
                    outer.insert(name);
                }
            }
        }
        for output in &self.outputs {
            if !local.contains(&output.name) {
                outer.insert(output.name.clone());
            }
        }
        outer
    }

    /// Names that must keep their spelling: declared outputs of this graph and
    /// outer values that nested graphs expose directly as their own outputs
    pub fn pinned_names(&self) -> HashSet<String> {
        let mut pinned: HashSet<String> = self.outputs.iter().map(|o| o.name.clone()).collect();
        for node in &self.nodes {
            for sub in node.subgraphs() {
                let sub_local = sub.local_names();
                pinned.extend(
                    sub.pinned_names()
                        .into_iter()
                        .filter(|name| !sub_local.contains(name)),
                );
            }
        }
        pinned
    }

    /// Total number of graphs nested (at any depth) in node attributes
    pub fn count_subgraphs(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.subgraphs())
            .map(|g| 1 + g.count_subgraphs())
            .sum()
    }

    /// Rewrites node inputs (here and, for outer references, in nested graphs)
    pub fn rename_references(&mut self, renames: &HashMap<String, String>) -> usize {
        if renames.is_empty() {
            return 0;
        }
        self.nodes
            .iter_mut()
            .map(|node| node.rename_references(renames))
            .sum()
    }

    /// Equality that ignores graph/node names and doc strings
    pub fn structurally_eq(&self, other: &Graph) -> bool {
        self.inputs.len() == other.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&other.inputs)
                .all(|(a, b)| a.name == b.name && a.data_type == b.data_type)
            && self.output_names() == other.output_names()
            && self.initializers == other.initializers
            && self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(a, b)| a.structurally_eq(b))
    }
}

/// The complete ONNX model
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxModel {
    pub metadata: ModelMetadata,
    pub graph: Graph,
    pub opset_imports: HashMap<String, i64>,
    pub metadata_props: HashMap<String, String>,
}

impl OnnxModel {
    /// Wraps an in-memory graph with the default opset imports
    pub fn from_graph(graph: Graph) -> Self {
        let mut opset_imports = HashMap::new();
        opset_imports.insert(String::new(), DEFAULT_OPSET_VERSION);
        Self {
            metadata: ModelMetadata {
                producer_name: env!("CARGO_PKG_NAME").to_string(),
                producer_version: env!("CARGO_PKG_VERSION").to_string(),
                graph_name: graph.name.clone(),
                ir_version: 7,
                ..ModelMetadata::default()
            },
            graph,
            opset_imports,
            metadata_props: HashMap::new(),
        }
    }

    /// Opset version imported for `domain` (`ai.onnx` is the default domain)
    pub fn opset_version(&self, domain: &str) -> i64 {
        resolve_opset(&self.opset_imports, domain)
    }
}

/// Looks up the imported version of `domain`, defaulting to `DEFAULT_OPSET_VERSION`
pub fn resolve_opset(imports: &HashMap<String, i64>, domain: &str) -> i64 {
    let domain = normalize_domain(domain);
    imports
        .iter()
        .find(|(d, _)| normalize_domain(d) == domain)
        .map(|(_, v)| *v)
        .unwrap_or(DEFAULT_OPSET_VERSION)
}

/// Maps `ai.onnx` to the empty default domain
pub fn normalize_domain(domain: &str) -> &str {
    if domain == "ai.onnx" {
        ""
    } else {
        domain
    }
}
