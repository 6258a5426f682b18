//! Shaped weight buffers
//!
//! A [`WeightBuffer`] is an untyped byte region tagged with a dtype and a
//! shape, representing a constant tensor. Storage is a refcounted byte
//! slice, so a buffer lifted from the model is a zero-copy view of
//! graph-owned bytes while a synthesized buffer owns freshly written ones;
//! either way the bytes are immutable once the buffer exists.

use bytes::Bytes;
use tracing::warn;

use crate::error::{ImportError, ImportResult};
use crate::graph::TensorDesc;

use super::dtype::{dtype_size, DataType, EngineDataType};
use super::shape::Shape;

/// Fixed-width element that can be decoded from a little-endian payload
pub trait Scalar: Copy {
    /// Element width in bytes
    const WIDTH: usize;

    /// Decode one element from exactly [`Self::WIDTH`] bytes
    fn from_le(bytes: &[u8]) -> Self;

    /// Append this element's little-endian encoding
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_scalar {
    ($($ty:ty),*) => {
        $(impl Scalar for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn from_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        })*
    };
}

impl_scalar!(f32, f64, i8, u8, i16, u16, i32, i64, u32, u64);

/// Opaque-weights descriptor handed to the target engine
///
/// Exposes `{dtype, bytes, element count}` the way the engine's constant
/// layers expect it.
#[derive(Debug, Clone)]
pub struct Weights {
    /// Engine element type
    pub dtype: EngineDataType,
    /// Little-endian element payload
    pub values: Bytes,
    /// Number of elements
    pub count: usize,
}

/// A typed, shaped, immutable constant tensor
#[derive(Debug, Clone)]
pub struct WeightBuffer {
    dtype: DataType,
    shape: Shape,
    data: Bytes,
    name: Option<String>,
}

impl WeightBuffer {
    /// Create a buffer over existing storage
    ///
    /// The payload length must equal `volume(shape) * dtype_width`; the
    /// shape must be fully known.
    pub fn new(dtype: DataType, shape: Shape, data: Bytes) -> ImportResult<WeightBuffer> {
        if shape.is_dynamic() {
            return Err(ImportError::InvalidNode(format!(
                "weight tensor with unknown dimension: {shape}"
            )));
        }
        let width = dtype_size(dtype)?;
        let buffer = WeightBuffer {
            dtype,
            shape,
            data,
            name: None,
        };
        let expected = buffer.count() * width;
        if buffer.data.len() != expected {
            return Err(ImportError::MalformedTensor {
                name: String::new(),
                actual: buffer.data.len(),
                expected,
            });
        }
        Ok(buffer)
    }

    /// An empty buffer of the given dtype (no shape, no data, count 0)
    pub fn empty(dtype: DataType) -> WeightBuffer {
        WeightBuffer {
            dtype,
            shape: Shape::scalar(),
            data: Bytes::new(),
            name: None,
        }
    }

    /// Lift a constant tensor out of the graph description
    ///
    /// Validates the payload length before any transform is attempted; the
    /// returned buffer is a zero-copy view of the graph-owned bytes.
    pub fn from_tensor(tensor: &TensorDesc) -> ImportResult<WeightBuffer> {
        let dtype = tensor.elem_type()?;
        let shape = tensor.shape()?;
        let mut buffer =
            WeightBuffer::new(dtype, shape, tensor.raw_data.clone()).map_err(|e| match e {
                ImportError::MalformedTensor {
                    actual, expected, ..
                } => ImportError::MalformedTensor {
                    name: tensor.name.clone(),
                    actual,
                    expected,
                },
                other => other,
            })?;
        if !tensor.name.is_empty() {
            buffer.name = Some(tensor.name.clone());
        }
        Ok(buffer)
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Shape of the constant
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Raw little-endian payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Buffer name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Assign a name for diagnostics
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Whether the buffer holds any bytes
    pub fn has_values(&self) -> bool {
        !self.data.is_empty()
    }

    /// Number of elements
    ///
    /// A rank-0 shape counts as one element (scalars); a buffer with no
    /// shape and no data counts as zero.
    pub fn count(&self) -> usize {
        if self.data.is_empty() && self.shape.rank() == 0 {
            return 0;
        }
        self.shape.volume().max(0) as usize
    }

    /// Total payload size in bytes
    pub fn size_bytes(&self) -> usize {
        self.count() * self.dtype.width().unwrap_or(0)
    }

    /// Convert to the engine's opaque-weights descriptor
    ///
    /// Fails with an `Unsupported` kind when the dtype has no engine
    /// equivalent, so the call site can fall back (e.g. narrow int64 first).
    pub fn as_weights(&self) -> ImportResult<Weights> {
        let dtype = self
            .dtype
            .to_engine()
            .ok_or(ImportError::UnsupportedDataType(self.dtype as i32))?;
        Ok(Weights {
            dtype,
            values: self.data.clone(),
            count: self.count(),
        })
    }

    /// Decode the payload as a vector of `T`
    ///
    /// Checked dynamically-typed view: fails if `T`'s width does not match
    /// the stored dtype's width. There is no unchecked reinterpretation
    /// path across this boundary.
    pub fn decode<T: Scalar>(&self) -> ImportResult<Vec<T>> {
        let width = dtype_size(self.dtype)?;
        if width != T::WIDTH {
            return Err(ImportError::Internal(format!(
                "decode width mismatch: buffer holds {} ({} bytes/elem), requested {} bytes/elem",
                self.dtype,
                width,
                T::WIDTH
            )));
        }
        Ok(self.data.chunks_exact(width).map(T::from_le).collect())
    }

    /// Extract an integer-like payload as `i64` values
    ///
    /// Accepts Int32, Int64 and Bool buffers; anything else is an invalid
    /// node (the callers feed axis lists, slice bounds and padding vectors
    /// through this).
    pub fn to_i64_vec(&self) -> ImportResult<Vec<i64>> {
        match self.dtype {
            DataType::Int64 => self.decode::<i64>(),
            DataType::Int32 => Ok(self.decode::<i32>()?.into_iter().map(i64::from).collect()),
            DataType::Bool => Ok(self.decode::<u8>()?.into_iter().map(i64::from).collect()),
            other => Err(ImportError::InvalidNode(format!(
                "expected an integer tensor, got {other}"
            ))),
        }
    }
}

/// Narrow an Int64 buffer to Int32, clamping out-of-range values
///
/// The engine has no 64-bit integer type. Values outside the `i32` range
/// are clamped and a warning names the buffer, matching what the original
/// weights would have produced.
pub fn convert_int64_weights(weights: &WeightBuffer) -> ImportResult<WeightBuffer> {
    if weights.dtype() != DataType::Int64 {
        return Err(ImportError::Internal(format!(
            "int64 narrowing applied to a {} buffer",
            weights.dtype()
        )));
    }
    let values = weights.decode::<i64>()?;
    let mut clamped = 0usize;
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        let narrow = if v > i64::from(i32::MAX) {
            clamped += 1;
            i32::MAX
        } else if v < i64::from(i32::MIN) {
            clamped += 1;
            i32::MIN
        } else {
            v as i32
        };
        narrow.write_le(&mut out);
    }
    if clamped > 0 {
        warn!(
            buffer = weights.name().unwrap_or("<unnamed>"),
            clamped, "int64 weights outside the int32 range were clamped"
        );
    }
    let mut result = WeightBuffer::new(DataType::Int32, weights.shape().clone(), Bytes::from(out))?;
    if let Some(name) = weights.name() {
        result.set_name(name);
    }
    Ok(result)
}
