//! Portable graph-description boundary
//!
//! The deserialized model is an external collaborator; these are the types
//! it hands to the lowering layer. A node exposes an operator tag, named
//! attributes and ordered input/output name references; a tensor constant
//! exposes a dtype tag, a dimension list and a raw byte payload.

use bytes::Bytes;

use crate::error::{ImportError, ImportResult};
use crate::tensor::dtype::DataType;
use crate::tensor::shape::Shape;

/// One dimension of a declared tensor shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    /// Fixed extent known at import time
    Fixed(i64),
    /// Named symbolic extent, unknown until run time
    Symbolic(String),
}

impl Dim {
    /// The dimension as a signed size, `-1` for symbolic or negative values
    pub fn value(&self) -> i64 {
        match self {
            Dim::Fixed(v) if *v >= 0 => *v,
            _ => -1,
        }
    }
}

/// A constant tensor from the graph description
#[derive(Debug, Clone, Default)]
pub struct TensorDesc {
    /// Tensor name
    pub name: String,
    /// Raw element-type tag (ONNX numbering)
    pub dtype: i32,
    /// Declared dimensions
    pub dims: Vec<Dim>,
    /// Little-endian element payload; length must be `volume * dtype_width`
    pub raw_data: Bytes,
}

impl TensorDesc {
    /// Decode the element-type tag
    pub fn elem_type(&self) -> ImportResult<DataType> {
        DataType::from_i32(self.dtype)
    }

    /// The declared dimensions as a [`Shape`], symbolic entries as `-1`
    pub fn shape(&self) -> ImportResult<Shape> {
        Shape::try_from_dims(&self.dims)
    }
}

/// A single attribute value
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// Integer attribute
    Int(i64),
    /// Float attribute
    Float(f32),
    /// String attribute
    String(String),
    /// Integer-list attribute
    Ints(Vec<i64>),
    /// Float-list attribute
    Floats(Vec<f32>),
    /// Embedded tensor attribute
    Tensor(TensorDesc),
}

/// A named node attribute
#[derive(Debug, Clone)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute payload
    pub value: AttrValue,
}

/// One operator node of the portable graph
#[derive(Debug, Clone, Default)]
pub struct NodeDesc {
    /// Node name; may be empty in exported models
    pub name: String,
    /// Operator type tag, e.g. `"Slice"`
    pub op_type: String,
    /// Ordered input tensor names
    pub input: Vec<String>,
    /// Ordered output tensor names
    pub output: Vec<String>,
    /// Named attributes
    pub attributes: Vec<Attribute>,
}

impl NodeDesc {
    /// Create a node description (used heavily by tests)
    pub fn new(op_type: &str, inputs: &[&str], outputs: &[&str], name: &str) -> NodeDesc {
        NodeDesc {
            name: name.to_string(),
            op_type: op_type.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: Vec::new(),
        }
    }

    /// Get attribute by name
    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Get integer attribute value
    pub fn attr_i(&self, name: &str) -> Option<i64> {
        match self.attribute(name) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get float attribute value
    pub fn attr_f(&self, name: &str) -> Option<f32> {
        match self.attribute(name) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get string attribute value
    pub fn attr_s(&self, name: &str) -> Option<&str> {
        match self.attribute(name) {
            Some(AttrValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Get integer-list attribute value
    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attribute(name) {
            Some(AttrValue::Ints(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Get float-list attribute value
    pub fn attr_floats(&self, name: &str) -> Option<&[f32]> {
        match self.attribute(name) {
            Some(AttrValue::Floats(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Get embedded-tensor attribute value
    pub fn attr_tensor(&self, name: &str) -> Option<&TensorDesc> {
        match self.attribute(name) {
            Some(AttrValue::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    /// Get a required integer attribute
    pub fn require_attr_i(&self, name: &str) -> ImportResult<i64> {
        self.attr_i(name)
            .ok_or_else(|| ImportError::MissingField(format!("attribute '{name}'")))
    }

    /// Set or replace an attribute
    pub fn set_attr(&mut self, name: &str, value: AttrValue) {
        for attr in &mut self.attributes {
            if attr.name == name {
                attr.value = value;
                return;
            }
        }
        self.attributes.push(Attribute {
            name: name.to_string(),
            value,
        });
    }

    /// Display name for diagnostics: the node name, or the first output name
    /// when the exporter left the node unnamed
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            self.output.first().map(String::as_str).unwrap_or("")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim_value() {
        assert_eq!(Dim::Fixed(3).value(), 3);
        assert_eq!(Dim::Fixed(-5).value(), -1);
        assert_eq!(Dim::Symbolic("batch".to_string()).value(), -1);
    }

    #[test]
    fn test_tensor_desc_shape() {
        let desc = TensorDesc {
            name: "W".to_string(),
            dtype: 1,
            dims: vec![Dim::Fixed(2), Dim::Fixed(3)],
            raw_data: Bytes::new(),
        };
        assert_eq!(desc.elem_type().unwrap(), DataType::Float);
        assert_eq!(desc.shape().unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_attr_accessors() {
        let mut node = NodeDesc::new("Slice", &["X"], &["Y"], "slice_0");
        node.set_attr("axis", AttrValue::Int(1));
        node.set_attr("starts", AttrValue::Ints(vec![0, 2]));

        assert_eq!(node.attr_i("axis"), Some(1));
        assert_eq!(node.attr_ints("starts"), Some(&[0, 2][..]));
        assert_eq!(node.attr_i("missing"), None);
        // Wrong-type lookups miss rather than panic.
        assert_eq!(node.attr_f("axis"), None);
        assert!(node.require_attr_i("missing").is_err());
    }

    #[test]
    fn test_set_attr_replaces() {
        let mut node = NodeDesc::new("Pad", &["X"], &["Y"], "pad_0");
        node.set_attr("mode", AttrValue::Int(0));
        node.set_attr("mode", AttrValue::Int(2));
        assert_eq!(node.attr_i("mode"), Some(2));
        assert_eq!(node.attributes.len(), 1);
    }

    #[test]
    fn test_display_name() {
        let named = NodeDesc::new("Relu", &["X"], &["Y"], "relu_0");
        assert_eq!(named.display_name(), "relu_0");

        let unnamed = NodeDesc::new("Relu", &["X"], &["Y"], "");
        assert_eq!(unnamed.display_name(), "Y");
    }
}
