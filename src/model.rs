use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unique identifier for a node in the graph
pub type NodeId = usize;

/// Device a tensor lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Cuda,
}

impl DeviceType {
    /// Encode as an integer node attribute
    pub fn to_attr(self) -> i64 {
        match self {
            DeviceType::Cpu => 0,
            DeviceType::Cuda => 1,
        }
    }

    /// Decode from an integer node attribute
    pub fn from_attr(value: i64) -> Option<Self> {
        match value {
            0 => Some(DeviceType::Cpu),
            1 => Some(DeviceType::Cuda),
            _ => None,
        }
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

/// Scalar element types carried by tensor values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float,
    Double,
    Float16,
    BFloat16,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Bool,
}

impl DataType {
    /// Size of one element in bytes
    pub fn element_size(&self) -> u64 {
        match self {
            DataType::Float => std::mem::size_of::<f32>() as u64,
            DataType::Double => std::mem::size_of::<f64>() as u64,
            DataType::Float16 => std::mem::size_of::<half::f16>() as u64,
            DataType::BFloat16 => std::mem::size_of::<half::bf16>() as u64,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::Uint8 => 1,
            DataType::Bool => 1,
        }
    }

    /// Encode as an integer node attribute
    pub fn to_attr(self) -> i64 {
        match self {
            DataType::Float => 1,
            DataType::Double => 2,
            DataType::Float16 => 3,
            DataType::BFloat16 => 4,
            DataType::Int8 => 5,
            DataType::Int16 => 6,
            DataType::Int32 => 7,
            DataType::Int64 => 8,
            DataType::Uint8 => 9,
            DataType::Bool => 10,
        }
    }

    /// Decode from an integer node attribute
    pub fn from_attr(value: i64) -> Option<Self> {
        match value {
            1 => Some(DataType::Float),
            2 => Some(DataType::Double),
            3 => Some(DataType::Float16),
            4 => Some(DataType::BFloat16),
            5 => Some(DataType::Int8),
            6 => Some(DataType::Int16),
            7 => Some(DataType::Int32),
            8 => Some(DataType::Int64),
            9 => Some(DataType::Uint8),
            10 => Some(DataType::Bool),
            _ => None,
        }
    }
}

/// Type information for a tensor-typed value. Every field is optional:
/// profiled graphs may be missing any of them, and the planner must cope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorTypeInfo {
    pub data_type: Option<DataType>,
    pub sizes: Option<Vec<i64>>,
    pub strides: Option<Vec<i64>>,
    pub device: Option<DeviceType>,
}

impl TensorTypeInfo {
    /// Create type info with concrete dtype and shape
    pub fn new(data_type: DataType, sizes: Vec<i64>) -> Self {
        Self {
            data_type: Some(data_type),
            sizes: Some(sizes),
            strides: None,
            device: None,
        }
    }

    /// Total number of elements, if the shape is concrete
    pub fn numel(&self) -> Option<i64> {
        self.sizes.as_ref().map(|dims| dims.iter().product())
    }

    /// Row-major strides for a given shape
    pub fn contiguous_strides(sizes: &[i64]) -> Vec<i64> {
        let mut strides = vec![1i64; sizes.len()];
        for i in (0..sizes.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * sizes[i + 1].max(1);
        }
        strides
    }
}

/// Type of a value edge in the graph
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    Tensor(TensorTypeInfo),
    /// A list of tensors produced by a structural operator. These are the
    /// "optimizable container" outputs the planner leaves to the default
    /// allocator.
    TensorList(TensorTypeInfo),
}

impl TypeInfo {
    /// The underlying tensor type info, for single tensors only
    pub fn as_tensor(&self) -> Option<&TensorTypeInfo> {
        match self {
            TypeInfo::Tensor(ttp) => Some(ttp),
            TypeInfo::TensorList(_) => None,
        }
    }

    pub fn is_tensor_list(&self) -> bool {
        matches!(self, TypeInfo::TensorList(_))
    }
}

/// Node attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Ints(Vec<i64>),
}

/// Node in the computation graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: HashMap<String, Attribute>,
}

impl Node {
    /// Set an integer attribute
    pub fn set_int(&mut self, key: &str, value: i64) {
        self.attributes.insert(key.to_string(), Attribute::Int(value));
    }

    /// Set an integer-array attribute
    pub fn set_ints(&mut self, key: &str, value: Vec<i64>) {
        self.attributes.insert(key.to_string(), Attribute::Ints(value));
    }

    /// Get an integer attribute
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(Attribute::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get an integer-array attribute
    pub fn ints(&self, key: &str) -> Option<&[i64]> {
        match self.attributes.get(key) {
            Some(Attribute::Ints(v)) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// Computation graph. Nodes are stored in topological order, which is also
/// the execution order the planner derives liveness timestamps from.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    /// Names of graph input values (including weights and other constants)
    pub inputs: Vec<String>,
    /// Names of graph output values
    pub outputs: Vec<String>,
    /// Type information per value name, where known
    pub value_types: HashMap<String, TypeInfo>,
    next_node_id: NodeId,
}

impl Graph {
    /// Create an empty graph
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            value_types: HashMap::new(),
            next_node_id: 0,
        }
    }

    /// Append a node at the end of the graph and return its id
    pub fn add_node(
        &mut self,
        op_type: &str,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> NodeId {
        let node = self.create_node(op_type, inputs, outputs);
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Create an unattached node with a fresh id. The caller inserts it via
    /// `insert_before` or `insert_front`.
    pub fn create_node(
        &mut self,
        op_type: &str,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Node {
        let id = self.next_node_id;
        self.next_node_id += 1;
        Node {
            id,
            name: format!("{}_{}", op_type.replace('.', "_"), id),
            op_type: op_type.to_string(),
            inputs,
            outputs,
            attributes: HashMap::new(),
        }
    }

    /// Insert a node immediately before the node with id `anchor`
    pub fn insert_before(&mut self, anchor: NodeId, node: Node) -> Result<()> {
        let pos = self.node_index(anchor).ok_or_else(|| {
            Error::InvalidGraph(format!("node {} not found in graph", anchor))
        })?;
        self.nodes.insert(pos, node);
        Ok(())
    }

    /// Insert a node at the very front of the graph
    pub fn insert_front(&mut self, node: Node) {
        self.nodes.insert(0, node);
    }

    /// Append an extra input to an existing node
    pub fn add_input(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| {
                Error::InvalidGraph(format!("node {} not found in graph", node_id))
            })?;
        node.inputs.push(value.to_string());
        Ok(())
    }

    /// Look up a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Position of a node in execution order
    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// The node that produces `value`, if any. Values with no producer are
    /// graph inputs or constants.
    pub fn producer(&self, value: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.outputs.iter().any(|out| out == value))
    }

    /// Record type information for a value
    pub fn set_value_type(&mut self, value: &str, info: TypeInfo) {
        self.value_types.insert(value.to_string(), info);
    }

    /// Tensor type info for a value, if it is a plain tensor
    pub fn tensor_type(&self, value: &str) -> Option<&TensorTypeInfo> {
        self.value_types.get(value).and_then(|t| t.as_tensor())
    }

    /// The device shared by the graph's tensor values. Falls back to CPU
    /// when values disagree or none declares a device.
    pub fn dominant_device(&self) -> DeviceType {
        let mut picked: Option<DeviceType> = None;
        for info in self.value_types.values() {
            let device = match info {
                TypeInfo::Tensor(ttp) | TypeInfo::TensorList(ttp) => ttp.device,
            };
            match (picked, device) {
                (None, Some(d)) => picked = Some(d),
                (Some(prev), Some(d)) if prev != d => return DeviceType::Cpu,
                _ => {}
            }
        }
        picked.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(TensorTypeInfo::contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(TensorTypeInfo::contiguous_strides(&[5]), vec![1]);
        assert_eq!(TensorTypeInfo::contiguous_strides(&[]), Vec::<i64>::new());
    }

    #[test]
    fn test_insert_before_preserves_order() {
        let mut graph = Graph::new("g");
        let a = graph.add_node("op.a", vec![], vec!["x".to_string()]);
        let b = graph.add_node("op.b", vec!["x".to_string()], vec!["y".to_string()]);
        let inserted = graph.create_node("op.c", vec![], vec!["z".to_string()]);
        let inserted_id = inserted.id;
        graph.insert_before(b, inserted).unwrap();

        let order: Vec<NodeId> = graph.nodes.iter().map(|n| n.id).collect();
        assert_eq!(order, vec![a, inserted_id, b]);
    }

    #[test]
    fn test_dominant_device_mixed_falls_back_to_cpu() {
        let mut graph = Graph::new("g");
        let mut cuda = TensorTypeInfo::new(DataType::Float, vec![1]);
        cuda.device = Some(DeviceType::Cuda);
        let mut cpu = TensorTypeInfo::new(DataType::Float, vec![1]);
        cpu.device = Some(DeviceType::Cpu);
        graph.set_value_type("a", TypeInfo::Tensor(cuda));
        assert_eq!(graph.dominant_device(), DeviceType::Cuda);
        graph.set_value_type("b", TypeInfo::Tensor(cpu));
        assert_eq!(graph.dominant_device(), DeviceType::Cpu);
    }
}
