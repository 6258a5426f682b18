//! Shape-tensor arithmetic
//!
//! A [`ShapeTensor`] is an integer sequence that is either fully known at
//! import time or deferred to a computation in the target graph. Slice
//! bounds, padding amounts and reshape targets flow through this type so
//! dynamic models take the same code path as static ones: every operation
//! folds concretely when all operand values are known and otherwise emits
//! engine layers computing the same formula at run time.

pub mod slice;

pub use slice::{axes_to_interlace_subscripts, compute_slice_sizes, decode_starts_and_ends};

use std::cell::Cell;

use smallvec::SmallVec;

use crate::builder::{ElementwiseOp, TensorId};
use crate::context::ImportContext;
use crate::error::{ImportError, ImportResult};
use crate::tensor::dtype::DataType;
use crate::tensor::shape::{ceil_div as fold_ceil_div, Shape, MAX_RANK};

/// A possibly-deferred integer sequence
///
/// Rank is 0 (scalar) or 1 (vector); the element count is always known at
/// import time, because it mirrors the static rank of some tensor even
/// when that tensor's dimensions are dynamic.
#[derive(Debug, Clone)]
pub struct ShapeTensor {
    rank: usize,
    size: usize,
    values: Option<SmallVec<[i64; MAX_RANK]>>,
    tensor: Cell<Option<TensorId>>,
}

impl ShapeTensor {
    /// A known scalar
    pub fn scalar(value: i64) -> ShapeTensor {
        ShapeTensor {
            rank: 0,
            size: 1,
            values: Some(SmallVec::from_slice(&[value])),
            tensor: Cell::new(None),
        }
    }

    /// A known vector
    pub fn from_values(values: &[i64]) -> ShapeTensor {
        ShapeTensor {
            rank: 1,
            size: values.len(),
            values: Some(SmallVec::from_slice(values)),
            tensor: Cell::new(None),
        }
    }

    /// The dimensions of a fully-known shape as a known vector
    pub fn from_shape(shape: &Shape) -> ShapeTensor {
        assert!(
            !shape.is_dynamic(),
            "shape tensor from a dynamic shape must go through shape_of"
        );
        ShapeTensor::from_values(shape.dims())
    }

    /// Wrap an engine tensor as a deferred shape tensor
    ///
    /// The tensor must be 0-D or 1-D with a build-time-known length.
    pub fn from_tensor(ctx: &ImportContext<'_>, tensor: TensorId) -> ImportResult<ShapeTensor> {
        let shape = ctx.network_ref().tensor_shape(tensor);
        if shape.rank() > 1 || shape.is_dynamic() {
            return Err(ImportError::Unsupported(format!(
                "shape tensor must be 0-D or 1-D with known length, got {shape}"
            )));
        }
        let size = shape.volume().max(0) as usize;
        Ok(ShapeTensor {
            rank: shape.rank(),
            size,
            values: None,
            tensor: Cell::new(Some(tensor)),
        })
    }

    fn deferred(tensor: TensorId, rank: usize, size: usize) -> ShapeTensor {
        ShapeTensor {
            rank,
            size,
            values: None,
            tensor: Cell::new(Some(tensor)),
        }
    }

    /// 0 for scalars, 1 for vectors
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether every element is known at import time
    pub fn all_values_known(&self) -> bool {
        self.values.is_some()
    }

    /// The known element values, when available
    pub fn values(&self) -> Option<&[i64]> {
        self.values.as_deref()
    }

    /// Interpret a known vector as a [`Shape`]
    pub fn to_shape(&self) -> ImportResult<Shape> {
        let values = self.values().ok_or_else(|| {
            ImportError::Unsupported("shape is not known until run time".to_string())
        })?;
        if values.len() > MAX_RANK {
            return Err(ImportError::InvalidNode(format!(
                "shape rank {} exceeds the supported maximum of {MAX_RANK}",
                values.len()
            )));
        }
        Ok(Shape::from_slice(values))
    }

    /// Realize this value as an engine tensor
    ///
    /// Deferred values return their cached tensor; known values are emitted
    /// once as an Int32 constant and cached.
    pub fn to_tensor(&self, ctx: &mut ImportContext<'_>) -> ImportResult<TensorId> {
        if let Some(id) = self.tensor.get() {
            return Ok(id);
        }
        let values = self.values.as_ref().ok_or_else(|| {
            ImportError::Internal("deferred shape tensor lost its engine tensor".to_string())
        })?;
        let mut narrowed = Vec::with_capacity(values.len());
        for &v in values.iter() {
            let n = i32::try_from(v).map_err(|_| {
                ImportError::InvalidNode(format!("shape value {v} is out of the int32 range"))
            })?;
            narrowed.push(n);
        }
        let shape = if self.rank == 0 {
            Shape::scalar()
        } else {
            Shape::from_slice(&[self.size as i64])
        };
        let id = ctx.add_constant_values(DataType::Int32, &shape, &narrowed)?;
        self.tensor.set(Some(id));
        Ok(id)
    }
}

/// A known tensor with the same size and rank as `like`, filled with `value`
pub fn similar(like: &ShapeTensor, value: i64) -> ShapeTensor {
    ShapeTensor {
        rank: like.rank,
        size: like.size,
        values: Some(SmallVec::from_elem(value, like.size)),
        tensor: Cell::new(None),
    }
}

fn binary(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
    op: ElementwiseOp,
    fold: impl Fn(i64, i64) -> i64,
) -> ImportResult<ShapeTensor> {
    assert!(
        lhs.size == rhs.size || lhs.size == 1 || rhs.size == 1,
        "shape tensors of size {} and {} do not broadcast",
        lhs.size,
        rhs.size
    );
    let rank = lhs.rank.max(rhs.rank);
    let size = lhs.size.max(rhs.size);

    if let (Some(a), Some(b)) = (lhs.values(), rhs.values()) {
        let pick = |side: &[i64], i: usize| side[if side.len() == 1 { 0 } else { i }];
        let values: SmallVec<[i64; MAX_RANK]> =
            (0..size).map(|i| fold(pick(a, i), pick(b, i))).collect();
        return Ok(ShapeTensor {
            rank,
            size,
            values: Some(values),
            tensor: Cell::new(None),
        });
    }

    let a = lhs.to_tensor(ctx)?;
    let b = rhs.to_tensor(ctx)?;
    let out = ctx.network().add_elementwise(a, b, op)?;
    Ok(ShapeTensor::deferred(out, rank, size))
}

/// Elementwise sum
pub fn add(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    binary(ctx, lhs, rhs, ElementwiseOp::Add, i64::saturating_add)
}

/// Elementwise difference
pub fn sub(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    binary(ctx, lhs, rhs, ElementwiseOp::Sub, i64::saturating_sub)
}

/// Elementwise product
pub fn mul(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    binary(ctx, lhs, rhs, ElementwiseOp::Mul, i64::saturating_mul)
}

/// Elementwise minimum
pub fn min(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    binary(ctx, lhs, rhs, ElementwiseOp::Min, i64::min)
}

/// Elementwise maximum
pub fn max(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    binary(ctx, lhs, rhs, ElementwiseOp::Max, i64::max)
}

/// Elementwise ceiling division, sign-correct for negative divisors
pub fn ceil_div(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    binary(ctx, lhs, rhs, ElementwiseOp::CeilDiv, fold_ceil_div)
}

/// Concatenate two shape tensors into one vector
pub fn concat(
    ctx: &mut ImportContext<'_>,
    lhs: &ShapeTensor,
    rhs: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    let size = lhs.size + rhs.size;

    if let (Some(a), Some(b)) = (lhs.values(), rhs.values()) {
        let mut values: SmallVec<[i64; MAX_RANK]> = SmallVec::from_slice(a);
        values.extend_from_slice(b);
        return Ok(ShapeTensor {
            rank: 1,
            size,
            values: Some(values),
            tensor: Cell::new(None),
        });
    }

    let a = as_vector(ctx, lhs)?;
    let b = as_vector(ctx, rhs)?;
    let out = ctx.network().add_concat(&[a, b], 0)?;
    Ok(ShapeTensor::deferred(out, 1, size))
}

/// Gather `data[indices[i]]` for each index
///
/// The result takes the indices' rank and size.
pub fn gather(
    ctx: &mut ImportContext<'_>,
    data: &ShapeTensor,
    indices: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    if let (Some(d), Some(idx)) = (data.values(), indices.values()) {
        let mut values: SmallVec<[i64; MAX_RANK]> = SmallVec::with_capacity(indices.size);
        for &i in idx {
            let v = usize::try_from(i)
                .ok()
                .and_then(|i| d.get(i).copied())
                .ok_or_else(|| {
                    ImportError::Internal(format!(
                        "gather index {i} out of range for length {}",
                        d.len()
                    ))
                })?;
            values.push(v);
        }
        return Ok(ShapeTensor {
            rank: indices.rank,
            size: indices.size,
            values: Some(values),
            tensor: Cell::new(None),
        });
    }

    let d = as_vector(ctx, data)?;
    let idx = indices.to_tensor(ctx)?;
    let out = ctx.network().add_gather(d, idx, 0)?;
    Ok(ShapeTensor::deferred(out, indices.rank, indices.size))
}

/// The run-time shape of an engine tensor
///
/// Folds to a known vector when the builder already knows every dimension;
/// otherwise emits a shape layer.
pub fn shape_of(ctx: &mut ImportContext<'_>, tensor: TensorId) -> ImportResult<ShapeTensor> {
    let shape = ctx.network_ref().tensor_shape(tensor);
    if !shape.is_dynamic() {
        return Ok(ShapeTensor::from_shape(&shape));
    }
    let out = ctx.network().add_shape(tensor)?;
    Ok(ShapeTensor::deferred(out, 1, shape.rank()))
}

/// Realize as an engine tensor, reshaping a scalar to a one-element vector
fn as_vector(ctx: &mut ImportContext<'_>, t: &ShapeTensor) -> ImportResult<TensorId> {
    let id = t.to_tensor(ctx)?;
    if t.rank() == 1 {
        return Ok(id);
    }
    ctx.network().add_reshape(id, &Shape::from_slice(&[1]))
}
