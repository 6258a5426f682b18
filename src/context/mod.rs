//! Import context
//!
//! One `ImportContext` lives for exactly one import pass. It owns the
//! temporary-weights arena and the insertion-ordered tensor registry, and
//! carries the handle to the target engine's graph builder. The pass is
//! strictly sequential; nothing here is shared across threads.

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::builder::{NetworkBuilder, TensorId};
use crate::error::{ImportError, ImportResult};
use crate::tensor::dtype::{dtype_size, DataType};
use crate::tensor::shape::Shape;
use crate::tensor::weights::{Scalar, WeightBuffer};

/// Arena backing synthesized weight buffers
///
/// Append-only for the lifetime of one import pass: buffers are allocated
/// (zero-initialized) or adopted, never freed individually. The arena and
/// every buffer it tracks are released together when the context is torn
/// down, on success and on early failure alike.
#[derive(Debug, Default)]
pub struct TempWeightsArena {
    buffers: Vec<Bytes>,
    total_bytes: usize,
}

impl TempWeightsArena {
    /// Create an empty arena
    pub fn new() -> TempWeightsArena {
        TempWeightsArena::default()
    }

    /// Allocate a zero-initialized buffer
    pub fn allocate_zeroed(&mut self, dtype: DataType, shape: &Shape) -> ImportResult<WeightBuffer> {
        if shape.is_dynamic() {
            return Err(ImportError::InvalidNode(format!(
                "cannot allocate weights with unknown dimensions: {shape}"
            )));
        }
        let width = dtype_size(dtype)?;
        let size = shape.volume().max(0) as usize * width;
        self.adopt(dtype, shape, vec![0u8; size])
    }

    /// Take ownership of freshly written bytes as a new buffer
    pub fn adopt(
        &mut self,
        dtype: DataType,
        shape: &Shape,
        data: Vec<u8>,
    ) -> ImportResult<WeightBuffer> {
        let data = Bytes::from(data);
        let buffer = WeightBuffer::new(dtype, shape.clone(), data.clone())?;
        self.total_bytes += data.len();
        self.buffers.push(data);
        Ok(buffer)
    }

    /// Number of buffers allocated so far
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the arena has allocated anything
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total bytes allocated so far
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

impl Drop for TempWeightsArena {
    fn drop(&mut self) {
        trace!(
            buffers = self.buffers.len(),
            bytes = self.total_bytes,
            "temporary-weights arena released"
        );
    }
}

/// An operand that is either an engine tensor or a constant buffer
#[derive(Debug, Clone)]
pub enum TensorOrWeights {
    /// Value produced by a layer in the target graph
    Tensor(TensorId),
    /// Constant weight buffer
    Weights(WeightBuffer),
}

impl TensorOrWeights {
    /// Whether this operand is a constant buffer
    pub fn is_weights(&self) -> bool {
        matches!(self, TensorOrWeights::Weights(_))
    }

    /// Whether this operand is an engine tensor
    pub fn is_tensor(&self) -> bool {
        matches!(self, TensorOrWeights::Tensor(_))
    }

    /// The constant buffer, if that is what this holds
    pub fn as_weights(&self) -> Option<&WeightBuffer> {
        match self {
            TensorOrWeights::Weights(w) => Some(w),
            TensorOrWeights::Tensor(_) => None,
        }
    }

    /// The engine tensor handle, if that is what this holds
    pub fn as_tensor(&self) -> Option<TensorId> {
        match self {
            TensorOrWeights::Tensor(t) => Some(*t),
            TensorOrWeights::Weights(_) => None,
        }
    }

    /// Shape of the operand as known at import time
    pub fn shape(&self, network: &dyn NetworkBuilder) -> Shape {
        match self {
            TensorOrWeights::Tensor(t) => network.tensor_shape(*t),
            TensorOrWeights::Weights(w) => w.shape().clone(),
        }
    }
}

impl From<WeightBuffer> for TensorOrWeights {
    fn from(weights: WeightBuffer) -> TensorOrWeights {
        TensorOrWeights::Weights(weights)
    }
}

impl From<TensorId> for TensorOrWeights {
    fn from(tensor: TensorId) -> TensorOrWeights {
        TensorOrWeights::Tensor(tensor)
    }
}

/// Mutable state of one import pass
pub struct ImportContext<'a> {
    network: &'a mut dyn NetworkBuilder,
    arena: TempWeightsArena,
    tensors: IndexMap<String, TensorOrWeights>,
}

impl<'a> ImportContext<'a> {
    /// Start an import pass against the given builder
    pub fn new(network: &'a mut dyn NetworkBuilder) -> ImportContext<'a> {
        ImportContext {
            network,
            arena: TempWeightsArena::new(),
            tensors: IndexMap::new(),
        }
    }

    /// The engine's graph builder
    pub fn network(&mut self) -> &mut dyn NetworkBuilder {
        &mut *self.network
    }

    /// Read-only view of the engine's graph builder
    pub fn network_ref(&self) -> &dyn NetworkBuilder {
        &*self.network
    }

    /// Arena statistics
    pub fn arena(&self) -> &TempWeightsArena {
        &self.arena
    }

    /// Allocate a zero-initialized temporary weight buffer
    pub fn create_temp_weights(
        &mut self,
        dtype: DataType,
        shape: &Shape,
    ) -> ImportResult<WeightBuffer> {
        self.arena.allocate_zeroed(dtype, shape)
    }

    /// Wrap freshly written bytes as an arena-tracked weight buffer
    pub fn make_temp_weights(
        &mut self,
        dtype: DataType,
        shape: &Shape,
        data: Vec<u8>,
    ) -> ImportResult<WeightBuffer> {
        self.arena.adopt(dtype, shape, data)
    }

    /// Register a named operand
    ///
    /// Graphs are single-assignment; a repeated name is a collaborator bug
    /// we tolerate by letting the latest registration win.
    pub fn register_tensor(&mut self, name: impl Into<String>, value: TensorOrWeights) {
        let name = name.into();
        if self.tensors.insert(name.clone(), value).is_some() {
            debug!(tensor = %name, "tensor registered twice, keeping the latest");
        }
    }

    /// Look up a registered operand
    pub fn tensor(&self, name: &str) -> Option<&TensorOrWeights> {
        self.tensors.get(name)
    }

    /// Registered operands in registration order
    pub fn tensors(&self) -> impl Iterator<Item = (&String, &TensorOrWeights)> {
        self.tensors.iter()
    }

    /// Emit a constant layer for a weight buffer
    pub fn add_constant(&mut self, weights: &WeightBuffer) -> ImportResult<TensorId> {
        let descriptor = weights.as_weights()?;
        self.network.add_constant(weights.shape(), descriptor)
    }

    /// Emit a constant layer from typed values
    ///
    /// Panics if the value count does not match the shape's volume or the
    /// value type does not match the dtype width; both indicate a bug in
    /// the calling importer.
    pub fn add_constant_values<T: Scalar>(
        &mut self,
        dtype: DataType,
        shape: &Shape,
        values: &[T],
    ) -> ImportResult<TensorId> {
        assert_eq!(
            shape.volume().max(0) as usize,
            values.len(),
            "shape does not match number of values provided"
        );
        assert_eq!(
            dtype.width(),
            Some(T::WIDTH),
            "dtype does not have the same width as the value type"
        );
        let mut raw = Vec::with_capacity(values.len() * T::WIDTH);
        for &v in values {
            v.write_le(&mut raw);
        }
        let buffer = self.make_temp_weights(dtype, shape, raw)?;
        self.add_constant(&buffer)
    }

    /// Emit a scalar constant layer
    pub fn add_constant_scalar<T: Scalar>(
        &mut self,
        dtype: DataType,
        value: T,
    ) -> ImportResult<TensorId> {
        self.add_constant_values(dtype, &Shape::scalar(), &[value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RecordingBuilder;
    use crate::tensor::dtype::EngineDataType;

    #[test]
    fn test_arena_accounting() {
        let mut arena = TempWeightsArena::new();
        assert!(arena.is_empty());

        let buffer = arena
            .allocate_zeroed(DataType::Float, &Shape::from_slice(&[2, 3]))
            .unwrap();
        assert_eq!(buffer.count(), 6);
        assert_eq!(buffer.decode::<f32>().unwrap(), vec![0.0; 6]);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.total_bytes(), 24);

        arena
            .adopt(DataType::Int32, &Shape::from_slice(&[1]), vec![1, 0, 0, 0])
            .unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.total_bytes(), 28);
    }

    #[test]
    fn test_create_temp_weights_rejects_dynamic() {
        let mut net = RecordingBuilder::new();
        let mut ctx = ImportContext::new(&mut net);
        let err = ctx
            .create_temp_weights(DataType::Float, &Shape::from_slice(&[-1, 3]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown dimensions"));
    }

    #[test]
    fn test_register_tensor_latest_wins() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[4]))
            .unwrap();
        let mut ctx = ImportContext::new(&mut net);

        ctx.register_tensor("X", TensorOrWeights::Tensor(input));
        let replacement = WeightBuffer::empty(DataType::Float);
        ctx.register_tensor("X", TensorOrWeights::Weights(replacement));

        assert!(ctx.tensor("X").unwrap().is_weights());
        assert_eq!(ctx.tensors().count(), 1);
    }

    #[test]
    fn test_add_constant_scalar() {
        let mut net = RecordingBuilder::new();
        let mut ctx = ImportContext::new(&mut net);
        let id = ctx.add_constant_scalar(DataType::Float, 1.5f32).unwrap();
        assert_eq!(ctx.network_ref().tensor_shape(id).rank(), 0);
        assert_eq!(ctx.arena().len(), 1);
    }

    #[test]
    fn test_add_constant_values() {
        let mut net = RecordingBuilder::new();
        let mut ctx = ImportContext::new(&mut net);
        let id = ctx
            .add_constant_values(DataType::Int32, &Shape::from_slice(&[3]), &[1i32, 2, 3])
            .unwrap();
        let shape = ctx.network_ref().tensor_shape(id);
        assert_eq!(shape.dims(), &[3]);
    }

    #[test]
    #[should_panic(expected = "does not match number of values")]
    fn test_add_constant_values_volume_mismatch() {
        let mut net = RecordingBuilder::new();
        let mut ctx = ImportContext::new(&mut net);
        let _ = ctx.add_constant_values(DataType::Int32, &Shape::from_slice(&[2]), &[1i32]);
    }
}
