//! Tensor model
//!
//! The weight/shape/dtype layer of the importer:
//! - Data type registry (`dtype`)
//! - Shapes and shape arithmetic (`shape`)
//! - Shaped weight buffers (`weights`)
//! - Buffer-level transposition (`transpose`)
//! - Broadcast resolution (`broadcast`)

pub mod broadcast;
pub mod dtype;
pub mod shape;
pub mod transpose;
pub mod weights;

// Re-export commonly used items
pub use broadcast::{
    broadcast_shapes, broadcast_shapes3, broadcast_tensor, broadcast_tensors, broadcast_tensors3,
    validate_broadcast,
};
pub use dtype::{dtype_size, is_float_type, is_int_type, DataType, EngineDataType};
pub use shape::{ceil_div, normalize_axes, normalize_axis, Shape, MAX_RANK};
pub use transpose::{
    is_transpose_required, transpose_weights, Permutation, MAX_TRANSPOSE_RANK,
};
pub use weights::{convert_int64_weights, Scalar, WeightBuffer, Weights};
