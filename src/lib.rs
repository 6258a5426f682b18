//! # onnx-lower
//!
//! Graph-import lowering layer: converts a portable neural-network graph
//! description (nodes, typed weight tensors, symbolic shapes) into the
//! tensor/weight representation required by a target execution engine.
//!
//! The crate covers the geometry core of an importer:
//!
//! - **Weight buffers**: typed, shaped constant tensors over raw bytes,
//!   with checked decoding and engine descriptors
//! - **Transposition**: physical N-dimensional layout permutation of
//!   constants
//! - **Broadcasting**: trailing-alignment validation, shape merging and
//!   operand rank raising
//! - **Shape tensors**: symbolic integer sequences for slice/pad/reshape
//!   geometry that is only known at run time
//!
//! Model deserialization and the engine itself are collaborators reached
//! through the types in [`graph`] and the [`builder::NetworkBuilder`]
//! trait. Diagnostics go through `tracing`; the embedding application
//! picks the subscriber.
//!
//! ## Example
//!
//! ```ignore
//! use onnx_lower::prelude::*;
//!
//! let mut ctx = ImportContext::new(&mut network);
//! let weights = WeightBuffer::from_tensor(&initializer)?;
//! let transposed = transpose_weights(&weights, &Permutation::from_slice(&[1, 0]))?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod context;
pub mod error;
pub mod graph;
pub mod shape_tensor;
pub mod tensor;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use onnx_lower::prelude::*`
pub mod prelude {
    pub use crate::builder::{ElementwiseOp, NetworkBuilder, RecordingBuilder, TensorId};
    pub use crate::context::{ImportContext, TempWeightsArena, TensorOrWeights};
    pub use crate::error::{ErrorKind, ImportError, ImportResult};
    pub use crate::graph::{AttrValue, Attribute, Dim, NodeDesc, TensorDesc};
    pub use crate::shape_tensor::ShapeTensor;
    pub use crate::tensor::{
        broadcast_shapes, broadcast_tensors, transpose_weights, validate_broadcast, DataType,
        EngineDataType, Permutation, Shape, WeightBuffer, Weights, MAX_RANK,
    };
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{ErrorKind, ImportError, ImportResult};

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
