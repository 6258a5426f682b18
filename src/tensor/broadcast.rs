//! Broadcast resolution
//!
//! Numpy-style trailing-alignment broadcasting: shape validation, merged
//! shape computation, and rank raising of operands to a common rank.

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::shape_tensor::{concat, shape_of, ShapeTensor};

use super::shape::Shape;
use super::weights::WeightBuffer;

/// Aligned dimension pair, trailing axes first
fn aligned(a: &Shape, b: &Shape, index: usize) -> (i64, i64) {
    let dim = |s: &Shape| {
        if index < s.rank() {
            s.dim(s.rank() - 1 - index)
        } else {
            1
        }
    };
    (dim(a), dim(b))
}

/// Check that two shapes conform to the broadcasting rules
///
/// Aligned at the trailing axis, each dimension pair must be equal or
/// contain a 1. Unknown dimensions are optimistically assumed compatible;
/// their legality is deferred to run time.
pub fn validate_broadcast(a: &Shape, b: &Shape) -> ImportResult<()> {
    for i in 0..a.rank().max(b.rank()) {
        let (da, db) = aligned(a, b, i);
        if da < 0 || db < 0 {
            continue;
        }
        if da != db && da != 1 && db != 1 {
            return Err(ImportError::InvalidNode(format!(
                "shapes {a} and {b} are not broadcast compatible"
            )));
        }
    }
    Ok(())
}

/// Compute the common shape of two broadcast-compatible shapes
///
/// Per aligned axis the non-1 side wins; the result is unknown when either
/// side is unknown and the other is not a known value greater than 1.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> ImportResult<Shape> {
    validate_broadcast(a, b)?;

    let rank = a.rank().max(b.rank());
    let mut dims = [0i64; crate::tensor::shape::MAX_RANK];
    for i in 0..rank {
        let (da, db) = aligned(a, b, i);
        dims[rank - 1 - i] = if da < 0 || db < 0 {
            let known = if da < 0 { db } else { da };
            if known > 1 {
                known
            } else {
                -1
            }
        } else {
            da.max(db)
        };
    }
    Ok(Shape::from_slice(&dims[..rank]))
}

/// Three-way broadcast, folded pairwise
pub fn broadcast_shapes3(a: &Shape, b: &Shape, c: &Shape) -> ImportResult<Shape> {
    broadcast_shapes(&broadcast_shapes(a, b)?, c)
}

/// Raise an operand to the given rank by prepending size-1 axes
///
/// An operand already at the target rank is untouched. Raising past the
/// target rank is a bug in the calling importer, not model data, and
/// panics.
///
/// Weight buffers are re-tagged in place (prepended 1-axes do not move any
/// bytes, so the storage is shared); engine tensors get a reshape layer,
/// driven by a run-time shape tensor when the dimensions are dynamic.
pub fn broadcast_tensor(
    ctx: &mut ImportContext<'_>,
    operand: &mut TensorOrWeights,
    rank: usize,
) -> ImportResult<()> {
    let shape = operand.shape(ctx.network_ref());
    assert!(
        shape.rank() <= rank,
        "cannot broadcast a rank {} operand down to rank {}",
        shape.rank(),
        rank
    );
    if shape.rank() == rank {
        return Ok(());
    }
    let pad = rank - shape.rank();

    match operand {
        TensorOrWeights::Weights(w) => {
            let mut lifted =
                WeightBuffer::new(w.dtype(), w.shape().prepend_ones(pad), w.data().clone())?;
            if let Some(name) = w.name() {
                lifted.set_name(name);
            }
            *operand = TensorOrWeights::Weights(lifted);
        }
        TensorOrWeights::Tensor(t) => {
            let input = *t;
            let reshaped = if !shape.is_dynamic() {
                ctx.network().add_reshape(input, &shape.prepend_ones(pad))?
            } else {
                let ones = ShapeTensor::from_values(&vec![1i64; pad]);
                let input_shape = shape_of(ctx, input)?;
                let dims = concat(ctx, &ones, &input_shape)?;
                let dims_id = dims.to_tensor(ctx)?;
                ctx.network().add_reshape_dynamic(input, dims_id)?
            };
            *operand = TensorOrWeights::Tensor(reshaped);
        }
    }
    Ok(())
}

/// Raise two operands to their common rank
pub fn broadcast_tensors(
    ctx: &mut ImportContext<'_>,
    a: &mut TensorOrWeights,
    b: &mut TensorOrWeights,
) -> ImportResult<()> {
    let rank = a
        .shape(ctx.network_ref())
        .rank()
        .max(b.shape(ctx.network_ref()).rank());
    broadcast_tensor(ctx, a, rank)?;
    broadcast_tensor(ctx, b, rank)
}

/// Raise three operands to their common rank
pub fn broadcast_tensors3(
    ctx: &mut ImportContext<'_>,
    a: &mut TensorOrWeights,
    b: &mut TensorOrWeights,
    c: &mut TensorOrWeights,
) -> ImportResult<()> {
    let rank = a
        .shape(ctx.network_ref())
        .rank()
        .max(b.shape(ctx.network_ref()).rank())
        .max(c.shape(ctx.network_ref()).rank());
    broadcast_tensor(ctx, a, rank)?;
    broadcast_tensor(ctx, b, rank)?;
    broadcast_tensor(ctx, c, rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Layer, NetworkBuilder, RecordingBuilder};
    use crate::error::ErrorKind;
    use crate::tensor::dtype::{DataType, EngineDataType};
    use bytes::Bytes;

    #[test]
    fn test_validate_broadcast() {
        assert!(validate_broadcast(
            &Shape::from_slice(&[5, 1, 3]),
            &Shape::from_slice(&[1, 4, 3])
        )
        .is_ok());
        assert!(validate_broadcast(&Shape::from_slice(&[3, 4]), &Shape::from_slice(&[4])).is_ok());

        let err =
            validate_broadcast(&Shape::from_slice(&[5, 2]), &Shape::from_slice(&[5, 3])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("(5, 2)"));
        assert!(err.to_string().contains("(5, 3)"));
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(
            broadcast_shapes(&Shape::from_slice(&[5, 1, 3]), &Shape::from_slice(&[1, 4, 3]))
                .unwrap()
                .dims(),
            &[5, 4, 3]
        );
        assert_eq!(
            broadcast_shapes(&Shape::from_slice(&[3, 4]), &Shape::from_slice(&[4]))
                .unwrap()
                .dims(),
            &[3, 4]
        );
    }

    #[test]
    fn test_unknown_dimension_optimism() {
        // Unknown dims are assumed compatible at import time.
        assert!(validate_broadcast(&Shape::from_slice(&[-1, 3]), &Shape::from_slice(&[4, 3]))
            .is_ok());
        assert_eq!(
            broadcast_shapes(&Shape::from_slice(&[-1, 3]), &Shape::from_slice(&[4, 3]))
                .unwrap()
                .dims(),
            &[4, 3]
        );
        // Against a 1 or another unknown, the merged dimension stays unknown.
        assert_eq!(
            broadcast_shapes(&Shape::from_slice(&[-1]), &Shape::from_slice(&[1])).unwrap().dims(),
            &[-1]
        );
        assert_eq!(
            broadcast_shapes(&Shape::from_slice(&[-1]), &Shape::from_slice(&[-1]))
                .unwrap()
                .dims(),
            &[-1]
        );
    }

    #[test]
    fn test_broadcast_shapes3() {
        assert_eq!(
            broadcast_shapes3(
                &Shape::from_slice(&[5, 1, 3]),
                &Shape::from_slice(&[4, 1]),
                &Shape::from_slice(&[1])
            )
            .unwrap()
            .dims(),
            &[5, 4, 3]
        );
    }

    #[test]
    fn test_broadcast_weights_shares_storage() {
        let mut net = RecordingBuilder::new();
        let mut ctx = ImportContext::new(&mut net);

        let raw: Vec<u8> = [1.0f32, 2.0, 3.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        let buffer =
            WeightBuffer::new(DataType::Float, Shape::from_slice(&[3]), Bytes::from(raw)).unwrap();
        let source_data = buffer.data().clone();

        let mut operand = TensorOrWeights::Weights(buffer);
        broadcast_tensor(&mut ctx, &mut operand, 3).unwrap();

        let lifted = operand.as_weights().unwrap();
        assert_eq!(lifted.shape().dims(), &[1, 1, 3]);
        // Same bytes, not a copy.
        assert_eq!(lifted.data().as_ptr(), source_data.as_ptr());
    }

    #[test]
    fn test_broadcast_static_tensor_reshapes() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[3, 4]))
            .unwrap();
        let mut ctx = ImportContext::new(&mut net);

        let mut operand = TensorOrWeights::Tensor(input);
        broadcast_tensor(&mut ctx, &mut operand, 4).unwrap();

        let id = operand.as_tensor().unwrap();
        drop(ctx);
        assert_eq!(net.tensor_shape(id).dims(), &[1, 1, 3, 4]);
        assert!(matches!(net.layers().last(), Some(Layer::Reshape { .. })));
    }

    #[test]
    fn test_broadcast_dynamic_tensor_uses_shape_tensor() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[-1, 4]))
            .unwrap();
        let mut ctx = ImportContext::new(&mut net);

        let mut operand = TensorOrWeights::Tensor(input);
        broadcast_tensor(&mut ctx, &mut operand, 4).unwrap();

        let id = operand.as_tensor().unwrap();
        drop(ctx);
        assert_eq!(net.tensor_shape(id).rank(), 4);
        assert!(matches!(
            net.layers().last(),
            Some(Layer::ReshapeDynamic { .. })
        ));
    }

    #[test]
    fn test_broadcast_tensors_pairwise() {
        let mut net = RecordingBuilder::new();
        let lhs = net
            .add_input("A", EngineDataType::Float, &Shape::from_slice(&[2, 3, 4]))
            .unwrap();
        let rhs = net
            .add_input("B", EngineDataType::Float, &Shape::from_slice(&[4]))
            .unwrap();
        let mut ctx = ImportContext::new(&mut net);

        let mut a = TensorOrWeights::Tensor(lhs);
        let mut b = TensorOrWeights::Tensor(rhs);
        broadcast_tensors(&mut ctx, &mut a, &mut b).unwrap();

        assert_eq!(a.shape(ctx.network_ref()).rank(), 3);
        assert_eq!(b.shape(ctx.network_ref()).dims(), &[1, 1, 4]);
    }

    #[test]
    #[should_panic(expected = "cannot broadcast")]
    fn test_rank_lowering_panics() {
        let mut net = RecordingBuilder::new();
        let input = net
            .add_input("X", EngineDataType::Float, &Shape::from_slice(&[2, 3, 4]))
            .unwrap();
        let mut ctx = ImportContext::new(&mut net);

        let mut operand = TensorOrWeights::Tensor(input);
        let _ = broadcast_tensor(&mut ctx, &mut operand, 2);
    }
}
