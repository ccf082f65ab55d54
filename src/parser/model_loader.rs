use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use log::{debug, info};
use prost::Message;

use crate::error::{Error, Result};
use crate::model::{
    Attribute, DataType, Dimension, Graph, ModelMetadata, Node, OnnxModel, Tensor, TensorInfo,
};
use crate::proto::onnx::tensor_shape_proto::dimension;
use crate::proto::onnx::type_proto;
use crate::proto::{
    AttributeProto, AttributeType, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

use super::graph_validator::GraphValidator;

/// ONNX model loader responsible for parsing and loading ONNX models
pub struct OnnxModelLoader;

impl OnnxModelLoader {
    /// Load an ONNX model from a file path
    pub fn load_model(path: &Path) -> Result<OnnxModel> {
        let mut file = File::open(path).map_err(|e| {
            Error::ModelLoadError(path.to_path_buf(), format!("Failed to open file: {}", e))
        })?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).map_err(|e| {
            Error::ModelLoadError(path.to_path_buf(), format!("Failed to read file: {}", e))
        })?;

        info!("Loading model from {} ({} bytes)", path.display(), buffer.len());
        Self::load_model_from_bytes(&buffer)
    }

    /// Load an ONNX model from bytes
    pub fn load_model_from_bytes(data: &[u8]) -> Result<OnnxModel> {
        let model_proto = Self::deserialize_model_proto(data)?;
        Self::convert_proto_to_internal(model_proto)
    }

    /// Load an ONNX model from any byte stream
    pub fn load_model_from_reader<R: Read>(mut reader: R) -> Result<OnnxModel> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        let model_proto = ModelProto::decode(Bytes::from(buffer))?;
        Self::convert_proto_to_internal(model_proto)
    }

    /// Deserialize protobuf bytes into a ModelProto
    pub fn deserialize_model_proto(bytes: &[u8]) -> Result<ModelProto> {
        ModelProto::decode(bytes).map_err(Error::ProtobufError)
    }

    /// Convert protobuf model to internal representation and validate its graph
    pub fn convert_proto_to_internal(proto: ModelProto) -> Result<OnnxModel> {
        let opset_imports = Self::handle_opset_imports(&proto.opset_import)?;
        let metadata = Self::extract_model_metadata(&proto);
        let metadata_props = proto
            .metadata_props
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect();

        let graph_proto = proto
            .graph
            .ok_or_else(|| Error::InvalidModel("Model is missing graph".to_string()))?;
        let graph = Self::convert_graph_proto(graph_proto)?;
        GraphValidator::validate(&graph)?;

        debug!(
            "Loaded graph '{}': {} nodes, {} initializers, {} nested graphs",
            graph.name,
            graph.nodes.len(),
            graph.initializers.len(),
            graph.count_subgraphs()
        );

        Ok(OnnxModel {
            metadata,
            graph,
            opset_imports,
            metadata_props,
        })
    }

    /// Extract model metadata from protobuf
    pub fn extract_model_metadata(proto: &ModelProto) -> ModelMetadata {
        ModelMetadata {
            producer_name: proto.producer_name.clone(),
            producer_version: proto.producer_version.clone(),
            domain: proto.domain.clone(),
            model_version: proto.model_version,
            doc_string: proto.doc_string.clone(),
            graph_name: proto
                .graph
                .as_ref()
                .map(|g| g.name.clone())
                .unwrap_or_default(),
            ir_version: proto.ir_version,
        }
    }

    /// Process opset imports
    pub fn handle_opset_imports(imports: &[OperatorSetIdProto]) -> Result<HashMap<String, i64>> {
        let mut opset_map = HashMap::new();
        for import in imports {
            if import.version <= 0 {
                return Err(Error::InvalidModel(format!(
                    "Invalid opset version {} for domain '{}'",
                    import.version, import.domain
                )));
            }
            opset_map.insert(import.domain.clone(), import.version);
        }
        Ok(opset_map)
    }

    /// Serialize a model to ONNX protobuf bytes
    pub fn save_model_to_bytes(model: &OnnxModel) -> Result<Vec<u8>> {
        let proto = Self::convert_internal_to_proto(model);
        let mut buffer = Vec::with_capacity(proto.encoded_len());
        proto.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Serialize a model into a file
    pub fn save_model(model: &OnnxModel, path: &Path) -> Result<()> {
        let bytes = Self::save_model_to_bytes(model)?;
        fs::write(path, &bytes)?;
        info!("Saved model to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    pub fn convert_internal_to_proto(model: &OnnxModel) -> ModelProto {
        let opsets: BTreeMap<&String, &i64> = model.opset_imports.iter().collect();
        let props: BTreeMap<&String, &String> = model.metadata_props.iter().collect();
        ModelProto {
            ir_version: model.metadata.ir_version,
            opset_import: opsets
                .into_iter()
                .map(|(domain, version)| OperatorSetIdProto {
                    domain: domain.clone(),
                    version: *version,
                })
                .collect(),
            producer_name: model.metadata.producer_name.clone(),
            producer_version: model.metadata.producer_version.clone(),
            domain: model.metadata.domain.clone(),
            model_version: model.metadata.model_version,
            doc_string: model.metadata.doc_string.clone(),
            graph: Some(Self::graph_to_proto(&model.graph)),
            metadata_props: props
                .into_iter()
                .map(|(key, value)| StringStringEntryProto {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    /// Convert a GraphProto to internal Graph representation
    fn convert_graph_proto(graph_proto: GraphProto) -> Result<Graph> {
        let initializers = graph_proto
            .initializer
            .iter()
            .map(Self::convert_tensor_proto)
            .collect::<Result<Vec<_>>>()?;

        let inputs = graph_proto.input.iter().map(Self::convert_value_info_proto).collect();
        let outputs = graph_proto.output.iter().map(Self::convert_value_info_proto).collect();
        let value_info = graph_proto
            .value_info
            .iter()
            .map(Self::convert_value_info_proto)
            .collect();

        let nodes = graph_proto
            .node
            .into_iter()
            .enumerate()
            .map(|(index, node)| Self::convert_node_proto(node, index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Graph {
            name: graph_proto.name,
            nodes,
            inputs,
            outputs,
            initializers,
            value_info,
            doc_string: graph_proto.doc_string,
        })
    }

    /// Convert a NodeProto to internal Node representation
    fn convert_node_proto(node_proto: NodeProto, index: usize) -> Result<Node> {
        let mut attributes = BTreeMap::new();
        for attr in node_proto.attribute {
            let value = Self::convert_attribute_proto(&attr, &node_proto.op_type)?;
            attributes.insert(attr.name, value);
        }

        // Unnamed nodes get a positional name so errors can point at them
        let name = if node_proto.name.is_empty() {
            format!("{}_{}", node_proto.op_type, index)
        } else {
            node_proto.name
        };

        Ok(Node {
            name,
            op_type: node_proto.op_type,
            domain: node_proto.domain,
            inputs: node_proto.input,
            outputs: node_proto.output,
            attributes,
            doc_string: node_proto.doc_string,
        })
    }

    /// Convert a TensorProto to internal Tensor representation
    ///
    /// Typed payload fields are re-encoded as little-endian bytes.
    fn convert_tensor_proto(tensor_proto: &TensorProto) -> Result<Tensor> {
        let data_type = DataType::from_proto(tensor_proto.data_type);
        let mut tensor = Tensor::new(
            &tensor_proto.name,
            data_type,
            tensor_proto.dims.clone(),
            Vec::new(),
        );
        tensor.doc_string = tensor_proto.doc_string.clone();

        if data_type == DataType::String {
            tensor.strings = tensor_proto
                .string_data
                .iter()
                .map(|s| utf8(s, &tensor_proto.name))
                .collect::<Result<Vec<_>>>()?;
            return Ok(tensor);
        }

        if !tensor_proto.raw_data.is_empty() {
            tensor.data = tensor_proto.raw_data.clone();
            return Ok(tensor);
        }

        let p = tensor_proto;
        tensor.data = match data_type {
            DataType::Float | DataType::Complex64 => {
                p.float_data.iter().flat_map(|v| v.to_le_bytes()).collect()
            }
            DataType::Double | DataType::Complex128 => {
                p.double_data.iter().flat_map(|v| v.to_le_bytes()).collect()
            }
            DataType::Int64 => p.int64_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            DataType::Int32 => p.int32_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            // Narrow types travel in int32_data, one element per entry
            DataType::Int16 | DataType::Uint16 | DataType::Float16 | DataType::BFloat16 => p
                .int32_data
                .iter()
                .flat_map(|&v| (v as u16).to_le_bytes())
                .collect(),
            DataType::Int8 | DataType::Uint8 | DataType::Bool => {
                p.int32_data.iter().map(|&v| v as u8).collect()
            }
            DataType::Uint32 => p
                .uint64_data
                .iter()
                .flat_map(|&v| (v as u32).to_le_bytes())
                .collect(),
            DataType::Uint64 => p.uint64_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            DataType::String | DataType::Undefined => Vec::new(),
        };
        Ok(tensor)
    }

    /// Convert a ValueInfoProto to internal TensorInfo representation
    ///
    /// A missing type leaves the element type undefined and the shape unknown.
    fn convert_value_info_proto(value_info: &ValueInfoProto) -> TensorInfo {
        let tensor_type = value_info.r#type.as_ref().and_then(|t| match &t.value {
            Some(type_proto::Value::TensorType(tensor)) => Some(tensor),
            None => None,
        });

        let (data_type, shape) = match tensor_type {
            Some(tensor) => {
                let shape = tensor.shape.as_ref().map(|shape| {
                    shape
                        .dim
                        .iter()
                        .map(|dim| match &dim.value {
                            Some(dimension::Value::DimValue(v)) => Dimension::Value(*v),
                            Some(dimension::Value::DimParam(p)) => Dimension::Param(p.clone()),
                            None => Dimension::Unknown,
                        })
                        .collect()
                });
                (DataType::from_proto(tensor.elem_type), shape)
            }
            None => (DataType::Undefined, None),
        };

        TensorInfo {
            name: value_info.name.clone(),
            data_type,
            shape,
            doc_string: value_info.doc_string.clone(),
        }
    }

    /// Convert an AttributeProto to internal Attribute representation
    fn convert_attribute_proto(attr: &AttributeProto, op_type: &str) -> Result<Attribute> {
        let attr_type = AttributeType::from_i32(attr.r#type).ok_or_else(|| {
            Error::InvalidModel(format!(
                "Unknown type {} for attribute '{}' of {}",
                attr.r#type, attr.name, op_type
            ))
        })?;

        match attr_type {
            AttributeType::Undefined => Err(Error::InvalidModel(format!(
                "Attribute '{}' of {} has no type",
                attr.name, op_type
            ))),
            AttributeType::Float => Ok(Attribute::Float(attr.f)),
            AttributeType::Int => Ok(Attribute::Int(attr.i)),
            AttributeType::String => Ok(Attribute::String(utf8(&attr.s, &attr.name)?)),
            AttributeType::Tensor => {
                let t = attr.t.as_ref().ok_or_else(|| {
                    Error::InvalidModel(format!("Missing tensor in attribute {}", attr.name))
                })?;
                Ok(Attribute::Tensor(Self::convert_tensor_proto(t)?))
            }
            AttributeType::Graph => {
                let g = attr.g.clone().ok_or_else(|| {
                    Error::InvalidModel(format!("Missing graph in attribute {}", attr.name))
                })?;
                Ok(Attribute::Graph(Self::convert_graph_proto(g)?))
            }
            AttributeType::Floats => Ok(Attribute::Floats(attr.floats.clone())),
            AttributeType::Ints => Ok(Attribute::Ints(attr.ints.clone())),
            AttributeType::Strings => Ok(Attribute::Strings(
                attr.strings
                    .iter()
                    .map(|s| utf8(s, &attr.name))
                    .collect::<Result<Vec<_>>>()?,
            )),
            AttributeType::Tensors => Ok(Attribute::Tensors(
                attr.tensors
                    .iter()
                    .map(Self::convert_tensor_proto)
                    .collect::<Result<Vec<_>>>()?,
            )),
            AttributeType::Graphs => Ok(Attribute::Graphs(
                attr.graphs
                    .iter()
                    .cloned()
                    .map(Self::convert_graph_proto)
                    .collect::<Result<Vec<_>>>()?,
            )),
            AttributeType::SparseTensor
            | AttributeType::SparseTensors
            | AttributeType::TypeProto
            | AttributeType::TypeProtos => Err(Error::UnsupportedFeature(format!(
                "{:?} attribute '{}' of {}",
                attr_type, attr.name, op_type
            ))),
        }
    }

    fn graph_to_proto(graph: &Graph) -> GraphProto {
        GraphProto {
            node: graph.nodes.iter().map(Self::node_to_proto).collect(),
            name: graph.name.clone(),
            initializer: graph.initializers.iter().map(Self::tensor_to_proto).collect(),
            doc_string: graph.doc_string.clone(),
            input: graph.inputs.iter().map(Self::value_info_to_proto).collect(),
            output: graph.outputs.iter().map(Self::value_info_to_proto).collect(),
            value_info: graph.value_info.iter().map(Self::value_info_to_proto).collect(),
        }
    }

    fn node_to_proto(node: &Node) -> NodeProto {
        NodeProto {
            input: node.inputs.clone(),
            output: node.outputs.clone(),
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            domain: node.domain.clone(),
            attribute: node
                .attributes
                .iter()
                .map(|(name, value)| Self::attribute_to_proto(name, value))
                .collect(),
            doc_string: node.doc_string.clone(),
        }
    }

    fn attribute_to_proto(name: &str, value: &Attribute) -> AttributeProto {
        let mut proto = AttributeProto {
            name: name.to_string(),
            ..AttributeProto::default()
        };
        let attr_type = match value {
            Attribute::Float(f) => {
                proto.f = *f;
                AttributeType::Float
            }
            Attribute::Int(i) => {
                proto.i = *i;
                AttributeType::Int
            }
            Attribute::String(s) => {
                proto.s = s.as_bytes().to_vec();
                AttributeType::String
            }
            Attribute::Tensor(t) => {
                proto.t = Some(Self::tensor_to_proto(t));
                AttributeType::Tensor
            }
            Attribute::Graph(g) => {
                proto.g = Some(Self::graph_to_proto(g));
                AttributeType::Graph
            }
            Attribute::Floats(fs) => {
                proto.floats = fs.clone();
                AttributeType::Floats
            }
            Attribute::Ints(is) => {
                proto.ints = is.clone();
                AttributeType::Ints
            }
            Attribute::Strings(ss) => {
                proto.strings = ss.iter().map(|s| s.as_bytes().to_vec()).collect();
                AttributeType::Strings
            }
            Attribute::Tensors(ts) => {
                proto.tensors = ts.iter().map(Self::tensor_to_proto).collect();
                AttributeType::Tensors
            }
            Attribute::Graphs(gs) => {
                proto.graphs = gs.iter().map(Self::graph_to_proto).collect();
                AttributeType::Graphs
            }
        };
        proto.r#type = attr_type as i32;
        proto
    }

    fn tensor_to_proto(tensor: &Tensor) -> TensorProto {
        let mut proto = TensorProto {
            dims: tensor.dims.clone(),
            data_type: tensor.data_type.to_proto(),
            name: tensor.name.clone(),
            doc_string: tensor.doc_string.clone(),
            ..TensorProto::default()
        };
        if tensor.data_type == DataType::String {
            proto.string_data = tensor.strings.iter().map(|s| s.as_bytes().to_vec()).collect();
        } else {
            proto.raw_data = tensor.data.clone();
        }
        proto
    }

    fn value_info_to_proto(info: &TensorInfo) -> ValueInfoProto {
        let r#type = (info.data_type != DataType::Undefined || info.shape.is_some()).then(|| {
            TypeProto {
                denotation: String::new(),
                value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                    elem_type: info.data_type.to_proto(),
                    shape: info.shape.as_ref().map(|dims| TensorShapeProto {
                        dim: dims
                            .iter()
                            .map(|d| crate::proto::onnx::tensor_shape_proto::Dimension {
                                denotation: String::new(),
                                value: match d {
                                    Dimension::Value(v) => Some(dimension::Value::DimValue(*v)),
                                    Dimension::Param(p) => {
                                        Some(dimension::Value::DimParam(p.clone()))
                                    }
                                    Dimension::Unknown => None,
                                },
                            })
                            .collect(),
                    }),
                })),
            }
        });
        ValueInfoProto {
            name: info.name.clone(),
            r#type,
            doc_string: info.doc_string.clone(),
        }
    }
}

fn utf8(bytes: &[u8], context: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::InvalidModel(format!("'{}' holds a string that is not UTF-8", context)))
}
