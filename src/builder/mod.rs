//! Target-engine builder boundary
//!
//! The execution engine consumes the lowered graph through
//! [`NetworkBuilder`]; only the layer kinds the lowering helpers emit are
//! part of the boundary. [`RecordingBuilder`] is an in-memory
//! implementation used by this crate's tests and for lowering diagnostics.

pub mod recording;

pub use recording::{Layer, RecordingBuilder, TensorInfo};

use crate::error::ImportResult;
use crate::tensor::dtype::EngineDataType;
use crate::tensor::shape::Shape;
use crate::tensor::weights::Weights;

/// Handle to a tensor in the engine's graph
pub type TensorId = usize;

/// Binary elementwise operation on engine tensors
///
/// `CeilDiv` rounds toward positive infinity and is sign-correct for
/// negative divisors, matching the slice-size arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseOp {
    /// Elementwise sum
    Add,
    /// Elementwise difference
    Sub,
    /// Elementwise product
    Mul,
    /// Elementwise minimum
    Min,
    /// Elementwise maximum
    Max,
    /// Elementwise ceiling division
    CeilDiv,
}

impl ElementwiseOp {
    /// Operation name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ElementwiseOp::Add => "add",
            ElementwiseOp::Sub => "sub",
            ElementwiseOp::Mul => "mul",
            ElementwiseOp::Min => "min",
            ElementwiseOp::Max => "max",
            ElementwiseOp::CeilDiv => "ceil_div",
        }
    }
}

/// Graph-construction interface of the target engine
pub trait NetworkBuilder {
    /// Declare a network input tensor
    fn add_input(
        &mut self,
        name: &str,
        dtype: EngineDataType,
        shape: &Shape,
    ) -> ImportResult<TensorId>;

    /// Emit a constant layer from an opaque-weights descriptor
    fn add_constant(&mut self, shape: &Shape, weights: Weights) -> ImportResult<TensorId>;

    /// Emit a binary elementwise layer (broadcasting per the engine rules)
    fn add_elementwise(
        &mut self,
        lhs: TensorId,
        rhs: TensorId,
        op: ElementwiseOp,
    ) -> ImportResult<TensorId>;

    /// Emit a gather layer along `axis`
    fn add_gather(
        &mut self,
        data: TensorId,
        indices: TensorId,
        axis: usize,
    ) -> ImportResult<TensorId>;

    /// Emit a concatenation layer along `axis`
    fn add_concat(&mut self, inputs: &[TensorId], axis: usize) -> ImportResult<TensorId>;

    /// Emit a shape layer (the run-time shape of `input` as a 1-D tensor)
    fn add_shape(&mut self, input: TensorId) -> ImportResult<TensorId>;

    /// Emit a reshape layer with build-time dimensions
    fn add_reshape(&mut self, input: TensorId, dims: &Shape) -> ImportResult<TensorId>;

    /// Emit a reshape layer driven by a run-time shape tensor
    ///
    /// Used when the new dimensions are only known at run time; `dims`
    /// must be a 1-D integer tensor of build-time-known length.
    fn add_reshape_dynamic(&mut self, input: TensorId, dims: TensorId) -> ImportResult<TensorId>;

    /// Shape of a tensor as known to the builder, `-1` for dynamic extents
    fn tensor_shape(&self, tensor: TensorId) -> Shape;
}
