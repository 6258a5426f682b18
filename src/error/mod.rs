//! Error types for the import/lowering pass
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Main error type for graph lowering operations
#[derive(Error, Debug)]
pub enum ImportError {
    /// Construct recognized but not implementable by this layer
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Data type with no engine mapping or no known byte width
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(i32),

    /// Invalid node configuration (shapes or values violate a precondition)
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Tensor payload does not match its declared shape and data type
    #[error("Malformed tensor '{name}': payload is {actual} bytes, expected {expected}")]
    MalformedTensor {
        /// Tensor name from the graph description
        name: String,
        /// Observed payload length in bytes
        actual: usize,
        /// `volume(shape) * dtype_width`
        expected: usize,
    },

    /// Missing required field or attribute
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// An invariant the importer itself maintains was violated
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`ImportError`]
///
/// Call sites react to the kind, not the variant: `Unsupported` means the
/// caller should pick an alternate lowering strategy, `InvalidInput` means
/// the model is at fault, `Internal` is a defect in the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recognized but not implementable by this layer
    Unsupported,
    /// The imported model violates a stated precondition
    InvalidInput,
    /// Importer defect
    Internal,
}

impl ImportError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::Unsupported(_) | ImportError::UnsupportedDataType(_) => {
                ErrorKind::Unsupported
            }
            ImportError::InvalidNode(_)
            | ImportError::MalformedTensor { .. }
            | ImportError::MissingField(_) => ErrorKind::InvalidInput,
            ImportError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for import operations
pub type ImportResult<T> = Result<T, ImportError>;
