//! In-memory network recording
//!
//! Records the layers the lowering helpers emit instead of handing them to
//! a real engine. Carries enough shape propagation to answer
//! `tensor_shape` queries, and can evaluate integer subgraphs so tests can
//! check what a deferred computation would produce at run time.

use rustc_hash::FxHashMap;

use crate::error::{ImportError, ImportResult};
use crate::tensor::broadcast::broadcast_shapes;
use crate::tensor::dtype::EngineDataType;
use crate::tensor::shape::{ceil_div, Shape, MAX_RANK};
use crate::tensor::weights::Weights;

use super::{ElementwiseOp, NetworkBuilder, TensorId};

/// Metadata for one recorded tensor
#[derive(Debug, Clone)]
pub struct TensorInfo {
    /// Tensor name; synthesized tensors get a layer-derived name
    pub name: String,
    /// Element type, when known
    pub dtype: Option<EngineDataType>,
    /// Propagated shape, `-1` for dynamic extents
    pub shape: Shape,
}

/// One recorded layer
#[derive(Debug, Clone)]
pub enum Layer {
    /// Constant layer
    Constant {
        /// Weights payload
        weights: Weights,
        /// Constant shape
        shape: Shape,
        /// Output tensor
        output: TensorId,
    },
    /// Binary elementwise layer
    Elementwise {
        /// Operation
        op: ElementwiseOp,
        /// Left operand
        lhs: TensorId,
        /// Right operand
        rhs: TensorId,
        /// Output tensor
        output: TensorId,
    },
    /// Gather layer
    Gather {
        /// Data operand
        data: TensorId,
        /// Index operand
        indices: TensorId,
        /// Gather axis
        axis: usize,
        /// Output tensor
        output: TensorId,
    },
    /// Concatenation layer
    Concat {
        /// Ordered operands
        inputs: Vec<TensorId>,
        /// Concatenation axis
        axis: usize,
        /// Output tensor
        output: TensorId,
    },
    /// Shape layer
    Shape {
        /// Tensor whose run-time shape is produced
        input: TensorId,
        /// Output tensor
        output: TensorId,
    },
    /// Reshape layer with build-time dimensions
    Reshape {
        /// Input tensor
        input: TensorId,
        /// Requested dimensions
        dims: Shape,
        /// Output tensor
        output: TensorId,
    },
    /// Reshape layer driven by a run-time shape tensor
    ReshapeDynamic {
        /// Input tensor
        input: TensorId,
        /// 1-D integer tensor holding the new dimensions
        dims: TensorId,
        /// Output tensor
        output: TensorId,
    },
}

impl Layer {
    /// The layer's output tensor
    pub fn output(&self) -> TensorId {
        match self {
            Layer::Constant { output, .. }
            | Layer::Elementwise { output, .. }
            | Layer::Gather { output, .. }
            | Layer::Concat { output, .. }
            | Layer::Shape { output, .. }
            | Layer::Reshape { output, .. }
            | Layer::ReshapeDynamic { output, .. } => *output,
        }
    }
}

/// Recording implementation of [`NetworkBuilder`]
#[derive(Debug, Default)]
pub struct RecordingBuilder {
    tensors: Vec<TensorInfo>,
    layers: Vec<Layer>,
    inputs_by_name: FxHashMap<String, TensorId>,
}

impl RecordingBuilder {
    /// Create an empty recording
    pub fn new() -> RecordingBuilder {
        RecordingBuilder::default()
    }

    /// All recorded layers in emission order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of recorded layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Metadata for a tensor handle
    pub fn tensor_info(&self, tensor: TensorId) -> &TensorInfo {
        &self.tensors[tensor]
    }

    /// Look up a declared input by name
    pub fn input(&self, name: &str) -> Option<TensorId> {
        self.inputs_by_name.get(name).copied()
    }

    fn new_tensor(&mut self, name: String, dtype: Option<EngineDataType>, shape: Shape) -> TensorId {
        let id = self.tensors.len();
        self.tensors.push(TensorInfo { name, dtype, shape });
        id
    }

    fn producer(&self, tensor: TensorId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.output() == tensor)
    }

    /// Evaluate an integer tensor the way the engine would at run time
    ///
    /// Follows producers recursively; only the integer layer kinds the
    /// shape-tensor arithmetic emits are supported, and network inputs are
    /// not evaluable at build time.
    pub fn evaluate(&self, tensor: TensorId) -> ImportResult<Vec<i64>> {
        let layer = self.producer(tensor).ok_or_else(|| {
            ImportError::Unsupported(format!(
                "tensor '{}' is not produced by a layer and cannot be evaluated at build time",
                self.tensors[tensor].name
            ))
        })?;
        match layer {
            Layer::Constant { weights, .. } => match weights.dtype {
                EngineDataType::Int32 => Ok(weights
                    .values
                    .chunks_exact(4)
                    .map(|b| i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
                    .collect()),
                other => Err(ImportError::Unsupported(format!(
                    "evaluating a {other} constant"
                ))),
            },
            Layer::Elementwise { op, lhs, rhs, .. } => {
                let a = self.evaluate(*lhs)?;
                let b = self.evaluate(*rhs)?;
                elementwise_eval(*op, &a, &b)
            }
            Layer::Gather { data, indices, axis, .. } => {
                if *axis != 0 {
                    return Err(ImportError::Unsupported(
                        "evaluating a gather along a non-zero axis".to_string(),
                    ));
                }
                let data = self.evaluate(*data)?;
                let indices = self.evaluate(*indices)?;
                indices
                    .iter()
                    .map(|&i| {
                        data.get(i as usize).copied().ok_or_else(|| {
                            ImportError::Internal(format!(
                                "gather index {i} out of range for length {}",
                                data.len()
                            ))
                        })
                    })
                    .collect()
            }
            Layer::Concat { inputs, axis, .. } => {
                if *axis != 0 {
                    return Err(ImportError::Unsupported(
                        "evaluating a concat along a non-zero axis".to_string(),
                    ));
                }
                let mut out = Vec::new();
                for &input in inputs {
                    out.extend(self.evaluate(input)?);
                }
                Ok(out)
            }
            Layer::Shape { input, .. } => {
                let shape = &self.tensors[*input].shape;
                if shape.is_dynamic() {
                    return Err(ImportError::Unsupported(
                        "evaluating the shape of a dynamic tensor".to_string(),
                    ));
                }
                Ok(shape.dims().to_vec())
            }
            Layer::Reshape { input, .. } | Layer::ReshapeDynamic { input, .. } => {
                self.evaluate(*input)
            }
        }
    }
}

fn elementwise_eval(op: ElementwiseOp, a: &[i64], b: &[i64]) -> ImportResult<Vec<i64>> {
    if a.len() != b.len() && a.len() != 1 && b.len() != 1 {
        return Err(ImportError::Internal(format!(
            "elementwise operands of length {} and {} do not broadcast",
            a.len(),
            b.len()
        )));
    }
    let len = a.len().max(b.len());
    let pick = |side: &[i64], i: usize| side[if side.len() == 1 { 0 } else { i }];
    Ok((0..len)
        .map(|i| {
            let (x, y) = (pick(a, i), pick(b, i));
            match op {
                ElementwiseOp::Add => x.saturating_add(y),
                ElementwiseOp::Sub => x.saturating_sub(y),
                ElementwiseOp::Mul => x.saturating_mul(y),
                ElementwiseOp::Min => x.min(y),
                ElementwiseOp::Max => x.max(y),
                ElementwiseOp::CeilDiv => ceil_div(x, y),
            }
        })
        .collect())
}

impl NetworkBuilder for RecordingBuilder {
    fn add_input(
        &mut self,
        name: &str,
        dtype: EngineDataType,
        shape: &Shape,
    ) -> ImportResult<TensorId> {
        let id = self.new_tensor(name.to_string(), Some(dtype), shape.clone());
        self.inputs_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    fn add_constant(&mut self, shape: &Shape, weights: Weights) -> ImportResult<TensorId> {
        let name = format!("constant_{}", self.layers.len());
        let output = self.new_tensor(name, Some(weights.dtype), shape.clone());
        self.layers.push(Layer::Constant {
            weights,
            shape: shape.clone(),
            output,
        });
        Ok(output)
    }

    fn add_elementwise(
        &mut self,
        lhs: TensorId,
        rhs: TensorId,
        op: ElementwiseOp,
    ) -> ImportResult<TensorId> {
        let shape = broadcast_shapes(&self.tensors[lhs].shape, &self.tensors[rhs].shape)?;
        let dtype = self.tensors[lhs].dtype;
        let name = format!("{}_{}", op.name(), self.layers.len());
        let output = self.new_tensor(name, dtype, shape);
        self.layers.push(Layer::Elementwise {
            op,
            lhs,
            rhs,
            output,
        });
        Ok(output)
    }

    fn add_gather(
        &mut self,
        data: TensorId,
        indices: TensorId,
        axis: usize,
    ) -> ImportResult<TensorId> {
        let data_shape = self.tensors[data].shape.clone();
        let index_shape = self.tensors[indices].shape.clone();
        if axis >= data_shape.rank() {
            return Err(ImportError::InvalidNode(format!(
                "gather axis {axis} out of bounds for shape {data_shape}"
            )));
        }
        // Result: data dims with the gathered axis replaced by the index dims.
        let rank = data_shape.rank() - 1 + index_shape.rank();
        if rank > MAX_RANK {
            return Err(ImportError::InvalidNode(format!(
                "gather result rank {rank} exceeds the supported maximum of {MAX_RANK}"
            )));
        }
        let mut shape = Shape::scalar();
        for &d in &data_shape.dims()[..axis] {
            shape.push(d);
        }
        for &d in index_shape.dims() {
            shape.push(d);
        }
        for &d in &data_shape.dims()[axis + 1..] {
            shape.push(d);
        }
        let dtype = self.tensors[data].dtype;
        let name = format!("gather_{}", self.layers.len());
        let output = self.new_tensor(name, dtype, shape);
        self.layers.push(Layer::Gather {
            data,
            indices,
            axis,
            output,
        });
        Ok(output)
    }

    fn add_concat(&mut self, inputs: &[TensorId], axis: usize) -> ImportResult<TensorId> {
        let first = inputs.first().ok_or_else(|| {
            ImportError::InvalidNode("concat with no inputs".to_string())
        })?;
        let mut shape = self.tensors[*first].shape.clone();
        if axis >= shape.rank() {
            return Err(ImportError::InvalidNode(format!(
                "concat axis {axis} out of bounds for shape {shape}"
            )));
        }
        let mut total = 0i64;
        for &input in inputs {
            let d = self.tensors[input].shape.dim(axis);
            if d < 0 || total < 0 {
                total = -1;
            } else {
                total += d;
            }
        }
        let mut dims: Vec<i64> = shape.dims().to_vec();
        dims[axis] = total;
        shape = Shape::from_slice(&dims);
        let dtype = self.tensors[*first].dtype;
        let name = format!("concat_{}", self.layers.len());
        let output = self.new_tensor(name, dtype, shape);
        self.layers.push(Layer::Concat {
            inputs: inputs.to_vec(),
            axis,
            output,
        });
        Ok(output)
    }

    fn add_shape(&mut self, input: TensorId) -> ImportResult<TensorId> {
        let rank = self.tensors[input].shape.rank();
        let name = format!("shape_{}", self.layers.len());
        let output = self.new_tensor(
            name,
            Some(EngineDataType::Int32),
            Shape::from_slice(&[rank as i64]),
        );
        self.layers.push(Layer::Shape { input, output });
        Ok(output)
    }

    fn add_reshape(&mut self, input: TensorId, dims: &Shape) -> ImportResult<TensorId> {
        let dtype = self.tensors[input].dtype;
        let name = format!("reshape_{}", self.layers.len());
        let output = self.new_tensor(name, dtype, dims.clone());
        self.layers.push(Layer::Reshape {
            input,
            dims: dims.clone(),
            output,
        });
        Ok(output)
    }

    fn add_reshape_dynamic(&mut self, input: TensorId, dims: TensorId) -> ImportResult<TensorId> {
        let dims_shape = self.tensors[dims].shape.clone();
        if dims_shape.rank() != 1 || dims_shape.is_dynamic() {
            return Err(ImportError::InvalidNode(format!(
                "reshape dimensions must be a 1-D tensor of known length, got {dims_shape}"
            )));
        }
        // Dimension values are unknown until run time unless the shape
        // tensor itself evaluates at build time.
        let rank = dims_shape.dim(0) as usize;
        if rank > MAX_RANK {
            return Err(ImportError::InvalidNode(format!(
                "reshape to rank {rank} exceeds the supported maximum of {MAX_RANK}"
            )));
        }
        let result = match self.evaluate(dims) {
            Ok(values) if values.len() == rank => Shape::from_slice(&values),
            _ => Shape::filled(rank, -1),
        };
        let dtype = self.tensors[input].dtype;
        let name = format!("reshape_{}", self.layers.len());
        let output = self.new_tensor(name, dtype, result);
        self.layers.push(Layer::ReshapeDynamic {
            input,
            dims,
            output,
        });
        Ok(output)
    }

    fn tensor_shape(&self, tensor: TensorId) -> Shape {
        self.tensors[tensor].shape.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn i32_weights(values: &[i32]) -> Weights {
        let mut raw = Vec::with_capacity(values.len() * 4);
        for &v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        Weights {
            dtype: EngineDataType::Int32,
            values: Bytes::from(raw),
            count: values.len(),
        }
    }

    #[test]
    fn test_constant_evaluate() {
        let mut net = RecordingBuilder::new();
        let c = net
            .add_constant(&Shape::from_slice(&[3]), i32_weights(&[1, 2, 3]))
            .unwrap();
        assert_eq!(net.evaluate(c).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_elementwise_shapes_and_eval() {
        let mut net = RecordingBuilder::new();
        let a = net
            .add_constant(&Shape::from_slice(&[3]), i32_weights(&[10, 20, 30]))
            .unwrap();
        let b = net
            .add_constant(&Shape::from_slice(&[3]), i32_weights(&[1, 2, 3]))
            .unwrap();
        let diff = net.add_elementwise(a, b, ElementwiseOp::Sub).unwrap();
        assert_eq!(net.tensor_shape(diff).dims(), &[3]);
        assert_eq!(net.evaluate(diff).unwrap(), vec![9, 18, 27]);
    }

    #[test]
    fn test_gather_concat_eval() {
        let mut net = RecordingBuilder::new();
        let data = net
            .add_constant(&Shape::from_slice(&[3]), i32_weights(&[5, 6, 7]))
            .unwrap();
        let extra = net
            .add_constant(&Shape::from_slice(&[1]), i32_weights(&[9]))
            .unwrap();
        let cat = net.add_concat(&[data, extra], 0).unwrap();
        assert_eq!(net.tensor_shape(cat).dims(), &[4]);

        let idx = net
            .add_constant(&Shape::from_slice(&[2]), i32_weights(&[3, 0]))
            .unwrap();
        let picked = net.add_gather(cat, idx, 0).unwrap();
        assert_eq!(net.evaluate(picked).unwrap(), vec![9, 5]);
    }

    #[test]
    fn test_shape_layer() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[2, 3, 4]))
            .unwrap();
        let shape = net.add_shape(input).unwrap();
        assert_eq!(net.tensor_shape(shape).dims(), &[3]);
        assert_eq!(net.evaluate(shape).unwrap(), vec![2, 3, 4]);
        assert_eq!(net.input("X"), Some(input));
    }

    #[test]
    fn test_input_not_evaluable() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Int32, &Shape::from_slice(&[4]))
            .unwrap();
        assert!(net.evaluate(input).is_err());
    }

    #[test]
    fn test_reshape_static() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[3, 4]))
            .unwrap();
        let reshaped = net
            .add_reshape(input, &Shape::from_slice(&[1, 3, 4]))
            .unwrap();
        assert_eq!(net.tensor_shape(reshaped).dims(), &[1, 3, 4]);
    }

    #[test]
    fn test_reshape_dynamic_rank_known() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[-1, 7]))
            .unwrap();
        let dims = net
            .add_input("dims", EngineDataType::Int32, &Shape::from_slice(&[3]))
            .unwrap();
        let reshaped = net.add_reshape_dynamic(input, dims).unwrap();
        // Values are unknown until run time; the rank is not.
        assert_eq!(net.tensor_shape(reshaped).dims(), &[-1, -1, -1]);
    }
}
