//! Data type registry
//!
//! Maps the portable graph's element-type enumeration (ONNX numbering) to
//! byte widths and to the target engine's element types.

use crate::error::{ImportError, ImportResult};

/// Element type of a portable graph tensor
///
/// Discriminants follow the ONNX `TensorProto.DataType` numbering so the
/// raw tag from a graph description round-trips unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    /// Unset/unknown element type
    Undefined = 0,
    /// 32-bit IEEE float
    Float = 1,
    /// Unsigned 8-bit integer
    Uint8 = 2,
    /// Signed 8-bit integer
    Int8 = 3,
    /// Unsigned 16-bit integer
    Uint16 = 4,
    /// Signed 16-bit integer
    Int16 = 5,
    /// Signed 32-bit integer
    Int32 = 6,
    /// Signed 64-bit integer
    Int64 = 7,
    /// Variable-length string (no fixed width)
    String = 8,
    /// Boolean, stored one byte per element
    Bool = 9,
    /// 16-bit IEEE float
    Float16 = 10,
    /// 64-bit IEEE float
    Double = 11,
    /// Unsigned 32-bit integer
    Uint32 = 12,
    /// Unsigned 64-bit integer
    Uint64 = 13,
    /// 16-bit brain float
    Bfloat16 = 16,
}

/// Element type understood by the target engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineDataType {
    /// 32-bit IEEE float
    Float,
    /// 16-bit IEEE float
    Half,
    /// Signed 8-bit integer
    Int8,
    /// Signed 32-bit integer
    Int32,
    /// Boolean
    Bool,
}

impl DataType {
    /// Convert a raw graph dtype tag to the enum
    pub fn from_i32(value: i32) -> ImportResult<DataType> {
        match value {
            0 => Ok(DataType::Undefined),
            1 => Ok(DataType::Float),
            2 => Ok(DataType::Uint8),
            3 => Ok(DataType::Int8),
            4 => Ok(DataType::Uint16),
            5 => Ok(DataType::Int16),
            6 => Ok(DataType::Int32),
            7 => Ok(DataType::Int64),
            8 => Ok(DataType::String),
            9 => Ok(DataType::Bool),
            10 => Ok(DataType::Float16),
            11 => Ok(DataType::Double),
            12 => Ok(DataType::Uint32),
            13 => Ok(DataType::Uint64),
            16 => Ok(DataType::Bfloat16),
            _ => Err(ImportError::UnsupportedDataType(value)),
        }
    }

    /// Size of one element in bytes, `None` for widthless types
    pub fn width(self) -> Option<usize> {
        match self {
            DataType::Float => Some(4),
            DataType::Uint8 => Some(1),
            DataType::Int8 => Some(1),
            DataType::Uint16 => Some(2),
            DataType::Int16 => Some(2),
            DataType::Int32 => Some(4),
            DataType::Int64 => Some(8),
            DataType::Bool => Some(1),
            DataType::Float16 => Some(2),
            DataType::Double => Some(8),
            DataType::Uint32 => Some(4),
            DataType::Uint64 => Some(8),
            DataType::Bfloat16 => Some(2),
            DataType::Undefined | DataType::String => None,
        }
    }

    /// Map to the engine's element type
    ///
    /// Returns `None` for dtypes the engine cannot represent; call sites
    /// decide whether to fall back or reject.
    pub fn to_engine(self) -> Option<EngineDataType> {
        match self {
            DataType::Float => Some(EngineDataType::Float),
            DataType::Float16 => Some(EngineDataType::Half),
            DataType::Int8 => Some(EngineDataType::Int8),
            DataType::Int32 => Some(EngineDataType::Int32),
            DataType::Bool => Some(EngineDataType::Bool),
            _ => None,
        }
    }

    /// Human-readable dtype name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            DataType::Undefined => "undefined",
            DataType::Float => "float32",
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::Float16 => "float16",
            DataType::Double => "float64",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Bfloat16 => "bfloat16",
        }
    }
}

impl EngineDataType {
    /// Size of one element in bytes
    pub fn width(self) -> usize {
        match self {
            EngineDataType::Float => 4,
            EngineDataType::Half => 2,
            EngineDataType::Int8 => 1,
            EngineDataType::Int32 => 4,
            EngineDataType::Bool => 1,
        }
    }

    /// Human-readable dtype name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            EngineDataType::Float => "float32",
            EngineDataType::Half => "float16",
            EngineDataType::Int8 => "int8",
            EngineDataType::Int32 => "int32",
            EngineDataType::Bool => "bool",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for EngineDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Size in bytes for a graph data type
pub fn dtype_size(dtype: DataType) -> ImportResult<usize> {
    dtype
        .width()
        .ok_or(ImportError::UnsupportedDataType(dtype as i32))
}

/// Check if data type is floating point
pub fn is_float_type(dtype: DataType) -> bool {
    matches!(
        dtype,
        DataType::Float | DataType::Double | DataType::Float16 | DataType::Bfloat16
    )
}

/// Check if data type is integer
pub fn is_int_type(dtype: DataType) -> bool {
    matches!(
        dtype,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_dtype_size() {
        assert_eq!(dtype_size(DataType::Float).unwrap(), 4);
        assert_eq!(dtype_size(DataType::Int64).unwrap(), 8);
        assert_eq!(dtype_size(DataType::Uint8).unwrap(), 1);
        assert_eq!(dtype_size(DataType::Bfloat16).unwrap(), 2);
        assert!(dtype_size(DataType::String).is_err());
    }

    #[test]
    fn test_from_i32() {
        assert_eq!(DataType::from_i32(1).unwrap(), DataType::Float);
        assert_eq!(DataType::from_i32(7).unwrap(), DataType::Int64);
        assert_eq!(DataType::from_i32(16).unwrap(), DataType::Bfloat16);
        let err = DataType::from_i32(999).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_to_engine() {
        assert_eq!(DataType::Float.to_engine(), Some(EngineDataType::Float));
        assert_eq!(DataType::Float16.to_engine(), Some(EngineDataType::Half));
        assert_eq!(DataType::Bool.to_engine(), Some(EngineDataType::Bool));
        // The engine has no 64-bit integer type; weights take the narrowing path.
        assert_eq!(DataType::Int64.to_engine(), None);
        assert_eq!(DataType::String.to_engine(), None);
    }

    #[test]
    fn test_is_float_type() {
        assert!(is_float_type(DataType::Float));
        assert!(is_float_type(DataType::Bfloat16));
        assert!(!is_float_type(DataType::Int32));
    }

    #[test]
    fn test_is_int_type() {
        assert!(is_int_type(DataType::Int32));
        assert!(is_int_type(DataType::Uint8));
        assert!(!is_int_type(DataType::Float));
        assert!(!is_int_type(DataType::Bool));
    }

    #[test]
    fn test_names() {
        assert_eq!(DataType::Float.name(), "float32");
        assert_eq!(EngineDataType::Half.to_string(), "float16");
    }
}
