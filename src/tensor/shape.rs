//! Tensor shapes
//!
//! Fixed-capacity dimension lists and the shape arithmetic used by the
//! lowering helpers.

use smallvec::SmallVec;

use crate::error::{ImportError, ImportResult};
use crate::graph::Dim;

/// Maximum rank of any shape handled by this layer
pub const MAX_RANK: usize = 8;

/// Ordered list of signed dimension sizes
///
/// A dimension value of `-1` denotes "unknown at import time". Shapes are
/// plain values, copied freely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[i64; MAX_RANK]>,
}

impl Shape {
    /// The rank-0 (scalar) shape
    pub fn scalar() -> Shape {
        Shape {
            dims: SmallVec::new(),
        }
    }

    /// Build a shape from a dimension slice
    ///
    /// Panics if `dims` is longer than [`MAX_RANK`]; ranks beyond that are a
    /// caller bug, not model data.
    pub fn from_slice(dims: &[i64]) -> Shape {
        assert!(
            dims.len() <= MAX_RANK,
            "shape rank {} exceeds MAX_RANK {}",
            dims.len(),
            MAX_RANK
        );
        Shape {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Build a shape of `rank` dimensions all equal to `value`
    pub fn filled(rank: usize, value: i64) -> Shape {
        assert!(rank <= MAX_RANK, "shape rank {rank} exceeds MAX_RANK {MAX_RANK}");
        Shape {
            dims: SmallVec::from_elem(value, rank),
        }
    }

    /// Convert a graph dimension list, mapping symbolic names to `-1`
    ///
    /// Model data may carry any rank, so an over-long list is a recoverable
    /// error rather than a contract violation.
    pub fn try_from_dims(dims: &[Dim]) -> ImportResult<Shape> {
        if dims.len() > MAX_RANK {
            return Err(ImportError::InvalidNode(format!(
                "tensor rank {} exceeds the supported maximum of {}",
                dims.len(),
                MAX_RANK
            )));
        }
        Ok(Shape {
            dims: dims.iter().map(Dim::value).collect(),
        })
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The dimensions as a slice
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    /// Dimension at `axis`
    pub fn dim(&self, axis: usize) -> i64 {
        self.dims[axis]
    }

    /// Append a trailing dimension
    pub fn push(&mut self, dim: i64) {
        assert!(self.dims.len() < MAX_RANK, "shape rank exceeds MAX_RANK {MAX_RANK}");
        self.dims.push(dim);
    }

    /// Product of all dimensions
    ///
    /// A rank-0 shape has volume 1 (scalars). Returns `-1` when any
    /// dimension is unknown.
    pub fn volume(&self) -> i64 {
        if self.is_dynamic() {
            return -1;
        }
        self.dims.iter().product()
    }

    /// Check whether any dimension is unknown
    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|&d| d < 0)
    }

    /// This shape with `count` size-1 axes prepended
    pub fn prepend_ones(&self, count: usize) -> Shape {
        assert!(
            self.rank() + count <= MAX_RANK,
            "shape rank {} exceeds MAX_RANK {} after prepending",
            self.rank() + count,
            MAX_RANK
        );
        let mut dims = SmallVec::with_capacity(self.rank() + count);
        dims.extend(std::iter::repeat(1).take(count));
        dims.extend_from_slice(&self.dims);
        Shape { dims }
    }

    /// Row-major strides (pitches) of this shape, innermost axis last
    ///
    /// Only defined for fully-known shapes.
    pub fn strides(&self) -> SmallVec<[usize; MAX_RANK]> {
        assert!(!self.is_dynamic(), "strides of a dynamic shape");
        let rank = self.rank();
        let mut strides = SmallVec::from_elem(1usize, rank);
        for axis in (0..rank.saturating_sub(1)).rev() {
            strides[axis] = self.dims[axis + 1] as usize * strides[axis + 1];
        }
        strides
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

/// Normalize a possibly-negative axis to a positive index
pub fn normalize_axis(axis: i64, rank: usize) -> ImportResult<usize> {
    let rank_i64 = rank as i64;
    let normalized = if axis < 0 { axis + rank_i64 } else { axis };

    if normalized < 0 || normalized >= rank_i64 {
        return Err(ImportError::InvalidNode(format!(
            "axis {axis} out of bounds for rank {rank}"
        )));
    }

    Ok(normalized as usize)
}

/// Normalize multiple axes
pub fn normalize_axes(axes: &[i64], rank: usize) -> ImportResult<Vec<usize>> {
    axes.iter().map(|&a| normalize_axis(a, rank)).collect()
}

/// Ceiling division rounding toward positive infinity, sign-correct
///
/// The divisor may be negative: `ceil_div(-10, -1)` is 10. Used by the
/// slice-size computation where the step may run backwards.
pub fn ceil_div(n: i64, d: i64) -> i64 {
    debug_assert!(d != 0, "ceil_div by zero");
    let q = n / d;
    let r = n % d;
    if r != 0 && (n < 0) == (d < 0) {
        q + 1
    } else {
        q
    }
}
