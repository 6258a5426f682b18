//! Weight-buffer transposition
//!
//! Physically reorders a constant's bytes according to an axis
//! permutation. The strided copy runs over a fixed-rank padded iteration
//! space so every supported rank takes the same path.

use bytes::Bytes;
use smallvec::SmallVec;
use tracing::warn;

use crate::error::{ImportError, ImportResult};

use super::dtype::DataType;
use super::shape::{Shape, MAX_RANK};
use super::weights::WeightBuffer;

/// Highest rank the buffer-level transpose supports
///
/// Beyond this the caller must lower to an explicit permute operator in
/// the target graph instead of rewriting the constant.
pub const MAX_TRANSPOSE_RANK: usize = 4;

/// A bijective axis reordering
///
/// Axis `i` of the output takes data from axis `order[i]` of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: SmallVec<[usize; MAX_RANK]>,
}

impl Permutation {
    /// Build a permutation from an axis order
    ///
    /// Panics unless `order` is a bijection on `[0, len)`; a malformed
    /// permutation is a bug in the calling node importer.
    pub fn from_slice(order: &[usize]) -> Permutation {
        assert!(order.len() <= MAX_RANK, "permutation rank exceeds MAX_RANK");
        let mut seen = [false; MAX_RANK];
        for &axis in order {
            assert!(axis < order.len(), "permutation entry {axis} out of range");
            assert!(!seen[axis], "permutation repeats axis {axis}");
            seen[axis] = true;
        }
        Permutation {
            order: SmallVec::from_slice(order),
        }
    }

    /// The identity permutation of the given rank
    pub fn identity(rank: usize) -> Permutation {
        assert!(rank <= MAX_RANK, "permutation rank exceeds MAX_RANK");
        Permutation {
            order: (0..rank).collect(),
        }
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.order.len()
    }

    /// The axis order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// The inverse reordering
    pub fn inverse(&self) -> Permutation {
        let mut order = SmallVec::from_elem(0usize, self.order.len());
        for (i, &axis) in self.order.iter().enumerate() {
            order[axis] = i;
        }
        Permutation { order }
    }

    /// Apply to a shape: `result.d[i] = shape.d[order[i]]`
    pub fn permute_shape(&self, shape: &Shape) -> Shape {
        assert_eq!(
            self.rank(),
            shape.rank(),
            "permutation rank does not match shape rank"
        );
        let mut result = Shape::scalar();
        for &axis in self.order.iter() {
            result.push(shape.dim(axis));
        }
        result
    }
}

impl std::fmt::Display for Permutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, axis) in self.order.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{axis}")?;
        }
        write!(f, ")")
    }
}

/// Whether applying `perm` moves any axis
pub fn is_transpose_required(perm: &Permutation) -> bool {
    perm.order().iter().enumerate().any(|(i, &axis)| i != axis)
}

/// Transpose a weight buffer according to an axis permutation
///
/// Produces a new buffer whose bytes are physically reordered; the source
/// is never touched. Supported: rank at most [`MAX_TRANSPOSE_RANK`],
/// element type float32 or a 16-bit float pattern (moved as opaque 16-bit
/// words). Anything else fails with an `Unsupported` kind and writes
/// nothing.
///
/// On success a non-fatal advisory names the buffer and the permutation:
/// replacement weights supplied later through a refit mechanism must
/// already be pre-transposed.
pub fn transpose_weights(weights: &WeightBuffer, perm: &Permutation) -> ImportResult<WeightBuffer> {
    let shape = weights.shape();
    assert_eq!(
        perm.rank(),
        shape.rank(),
        "permutation rank does not match buffer rank"
    );

    if shape.rank() > MAX_TRANSPOSE_RANK {
        return Err(ImportError::Unsupported(format!(
            "transpose of rank {} weights (maximum {})",
            shape.rank(),
            MAX_TRANSPOSE_RANK
        )));
    }
    let elem_width = match weights.dtype() {
        DataType::Float => 4,
        DataType::Float16 | DataType::Bfloat16 => 2,
        other => {
            return Err(ImportError::Unsupported(format!(
                "transpose of {other} weights"
            )))
        }
    };

    let new_shape = perm.permute_shape(shape);

    // Left-pad shape and permutation to the fixed rank with size-1 axes and
    // an identity prefix, so one strided loop covers every supported rank.
    let pad = MAX_TRANSPOSE_RANK - shape.rank();
    let src_shape = shape.prepend_ones(pad);
    let dst_shape = new_shape.prepend_ones(pad);
    let mut padded_order = [0usize; MAX_TRANSPOSE_RANK];
    for (i, slot) in padded_order.iter_mut().enumerate().take(pad) {
        *slot = i;
    }
    for i in 0..shape.rank() {
        padded_order[pad + i] = perm.order()[i] + pad;
    }

    let src_strides = src_shape.strides();
    let dst_strides = dst_shape.strides();
    let count = weights.count();

    let src = weights.data();
    let mut dst = vec![0u8; count * elem_width];

    for linear in 0..count {
        // The destination coordinate on axis `i` is the source coordinate
        // on axis `order[i]`.
        let mut dst_index = 0usize;
        for i in 0..MAX_TRANSPOSE_RANK {
            let axis = padded_order[i];
            let coord = (linear / src_strides[axis]) % src_shape.dim(axis) as usize;
            dst_index += coord * dst_strides[i];
        }
        dst[dst_index * elem_width..(dst_index + 1) * elem_width]
            .copy_from_slice(&src[linear * elem_width..(linear + 1) * elem_width]);
    }

    let mut result = WeightBuffer::new(weights.dtype(), new_shape, Bytes::from(dst))?;
    if let Some(name) = weights.name() {
        result.set_name(name);
    }

    warn!(
        buffer = weights.name().unwrap_or("<unnamed>"),
        permutation = %perm,
        "weights have been transposed; replacement weights supplied through \
         a refit mechanism must be pre-transposed"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tensor::weights::Scalar;

    fn f32_buffer(shape: &[i64], values: &[f32]) -> WeightBuffer {
        let mut raw = Vec::with_capacity(values.len() * 4);
        for &v in values {
            v.write_le(&mut raw);
        }
        WeightBuffer::new(DataType::Float, Shape::from_slice(shape), Bytes::from(raw)).unwrap()
    }

    #[test]
    fn test_permutation_inverse() {
        let perm = Permutation::from_slice(&[2, 0, 1]);
        assert_eq!(perm.inverse().order(), &[1, 2, 0]);
        assert_eq!(Permutation::identity(3).inverse(), Permutation::identity(3));
    }

    #[test]
    fn test_is_transpose_required() {
        assert!(!is_transpose_required(&Permutation::identity(4)));
        assert!(is_transpose_required(&Permutation::from_slice(&[1, 0])));
    }

    #[test]
    #[should_panic(expected = "repeats axis")]
    fn test_malformed_permutation_panics() {
        Permutation::from_slice(&[0, 0]);
    }

    #[test]
    fn test_transpose_2d() {
        // [[1,2,3],[4,5,6]] with permutation (1,0) -> [[1,4],[2,5],[3,6]]
        let buffer = f32_buffer(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let result = transpose_weights(&buffer, &Permutation::from_slice(&[1, 0])).unwrap();
        assert_eq!(result.shape().dims(), &[3, 2]);
        assert_eq!(
            result.decode::<f32>().unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
    }

    #[test]
    fn test_transpose_roundtrip() {
        let values: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let buffer = f32_buffer(&[2, 3, 4], &values);
        let perm = Permutation::from_slice(&[2, 0, 1]);

        let transposed = transpose_weights(&buffer, &perm).unwrap();
        assert_eq!(transposed.shape().dims(), &[4, 2, 3]);

        let back = transpose_weights(&transposed, &perm.inverse()).unwrap();
        assert_eq!(back.shape().dims(), buffer.shape().dims());
        assert_eq!(back.data(), buffer.data());
    }

    #[test]
    fn test_transpose_matches_ndarray() {
        use ndarray::{ArrayD, IxDyn};

        let values: Vec<f32> = (0..120).map(|v| v as f32 * 0.5).collect();
        let buffer = f32_buffer(&[2, 3, 4, 5], &values);
        let perm = Permutation::from_slice(&[3, 1, 0, 2]);

        let result = transpose_weights(&buffer, &perm).unwrap();

        let array = ArrayD::from_shape_vec(IxDyn(&[2, 3, 4, 5]), values).unwrap();
        let expected: Vec<f32> = array
            .permuted_axes(IxDyn(&[3, 1, 0, 2]))
            .iter()
            .copied()
            .collect();

        assert_eq!(result.shape().dims(), &[5, 3, 2, 4]);
        assert_eq!(result.decode::<f32>().unwrap(), expected);
    }

    #[test]
    fn test_transpose_f16_words() {
        // 16-bit elements move as opaque words.
        let mut raw = Vec::new();
        for v in [1u16, 2, 3, 4, 5, 6] {
            v.write_le(&mut raw);
        }
        let buffer =
            WeightBuffer::new(DataType::Float16, Shape::from_slice(&[2, 3]), Bytes::from(raw))
                .unwrap();
        let result = transpose_weights(&buffer, &Permutation::from_slice(&[1, 0])).unwrap();
        assert_eq!(result.decode::<u16>().unwrap(), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_transpose_rank1_and_scalar() {
        let buffer = f32_buffer(&[4], &[1.0, 2.0, 3.0, 4.0]);
        let result = transpose_weights(&buffer, &Permutation::identity(1)).unwrap();
        assert_eq!(result.decode::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let scalar = f32_buffer(&[], &[9.0]);
        let result = transpose_weights(&scalar, &Permutation::identity(0)).unwrap();
        assert_eq!(result.count(), 1);
    }

    #[test]
    fn test_transpose_rank5_unsupported() {
        let values: Vec<f32> = (0..32).map(|v| v as f32).collect();
        let buffer = f32_buffer(&[2, 2, 2, 2, 2], &values);
        let err =
            transpose_weights(&buffer, &Permutation::from_slice(&[4, 3, 2, 1, 0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_transpose_int_unsupported() {
        let mut raw = Vec::new();
        for v in [1i32, 2] {
            v.write_le(&mut raw);
        }
        let buffer =
            WeightBuffer::new(DataType::Int32, Shape::from_slice(&[2]), Bytes::from(raw)).unwrap();
        let err = transpose_weights(&buffer, &Permutation::identity(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_name_carried_over() {
        let mut buffer = f32_buffer(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        buffer.set_name("conv.weight");
        let result = transpose_weights(&buffer, &Permutation::from_slice(&[1, 0])).unwrap();
        assert_eq!(result.name(), Some("conv.weight"));
    }
}
