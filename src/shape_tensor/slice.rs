//! Slice geometry
//!
//! Decodes ONNX slice bounds and computes result sizes. The formulas are
//! built from the shape-tensor primitives, so the same construction folds
//! at import time for static models and lowers to engine layers for
//! dynamic ones; nothing re-derives the clamp rules at realization time.

use crate::context::ImportContext;
use crate::error::ImportResult;

use super::{add, ceil_div, max, min, mul, similar, sub, ShapeTensor};

/// 1 where `x` is negative, 0 elsewhere
///
/// `-min(max(x, -1), 0)` expressed in the available primitives.
fn negative_indicator(
    ctx: &mut ImportContext<'_>,
    x: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    let zero = similar(x, 0);
    let upper = max(ctx, x, &similar(x, -1))?;
    let clipped = min(ctx, &upper, &zero)?;
    sub(ctx, &zero, &clipped)
}

/// Decode one bounds vector against the slice rules
///
/// Negative entries count from the end of the axis. The decoded value is
/// clamped into `[0, dim]` for a forward step and `[-1, dim - 1]` for a
/// backward step; the `-1` lower bound lets a backward slice address one
/// before the first element as its exclusive end.
fn decode_index(
    ctx: &mut ImportContext<'_>,
    dims: &ShapeTensor,
    steps: &ShapeTensor,
    index: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    let wrap = negative_indicator(ctx, index)?;
    let offset = mul(ctx, dims, &wrap)?;
    let adjusted = add(ctx, index, &offset)?;

    let backward = negative_indicator(ctx, steps)?;
    let zero = similar(index, 0);
    let lower = sub(ctx, &zero, &backward)?;
    let upper = sub(ctx, dims, &backward)?;
    let floored = max(ctx, &adjusted, &lower)?;
    min(ctx, &floored, &upper)
}

/// Decode in place the starts and ends indices according to ONNX Slice rules
pub fn decode_starts_and_ends(
    ctx: &mut ImportContext<'_>,
    input_dims: &ShapeTensor,
    steps: &ShapeTensor,
    starts: &mut ShapeTensor,
    ends: &mut ShapeTensor,
) -> ImportResult<()> {
    assert_eq!(
        input_dims.size(),
        steps.size(),
        "per-axis slice vectors must have matching sizes"
    );
    assert_eq!(input_dims.size(), starts.size(), "starts size mismatch");
    assert_eq!(input_dims.size(), ends.size(), "ends size mismatch");

    *starts = decode_index(ctx, input_dims, steps, starts)?;
    *ends = decode_index(ctx, input_dims, steps, ends)?;
    Ok(())
}

/// Size of the slice result per axis: `max(0, ceil((end - start) / step))`
///
/// `starts` and `ends` must already be decoded by
/// [`decode_starts_and_ends`].
pub fn compute_slice_sizes(
    ctx: &mut ImportContext<'_>,
    starts: &ShapeTensor,
    ends: &ShapeTensor,
    steps: &ShapeTensor,
    dims: &ShapeTensor,
) -> ImportResult<ShapeTensor> {
    let zero = similar(dims, 0);
    let span = sub(ctx, ends, starts)?;
    let count = ceil_div(ctx, &span, steps)?;
    max(ctx, &zero, &count)
}

/// Subscripts that splice per-axis overrides into a full-rank default
///
/// Gathering `concat(defaults, overrides)` with the returned subscripts
/// yields `defaults` with the positions named by `axes` replaced by the
/// overrides, in order; all other positions keep their relative order.
/// `axes` must be known and already normalized into `[0, rank)`.
pub fn axes_to_interlace_subscripts(axes: &ShapeTensor, rank: usize) -> ShapeTensor {
    let values = axes
        .values()
        .expect("interlace axes must be known at import time");
    let mut subscripts: Vec<i64> = (0..rank as i64).collect();
    for (i, &axis) in values.iter().enumerate() {
        assert!(
            (axis as usize) < rank && axis >= 0,
            "interlace axis {axis} out of range for rank {rank}"
        );
        subscripts[axis as usize] = (rank + i) as i64;
    }
    ShapeTensor::from_values(&subscripts)
}
