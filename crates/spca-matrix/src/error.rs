//! Error types for matrix allocation, reshaping and persistence

use std::path::PathBuf;

use crate::matrix::MatrixMode;

pub type Result<T> = std::result::Result<T, MatrixError>;

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// Requested element count exceeds [`crate::MAX_ELEMENTS`]
    #[error("matrix allocation of {requested} elements exceeds limit of {limit}")]
    AllocationTooLarge { requested: u128, limit: usize },

    /// A leading extent is zero while a trailing one is not
    #[error("invalid matrix dimensions {dims:?}: zero leading extent with non-zero trailing extent")]
    ZeroLeadingDimension { dims: [usize; 3] },

    /// Operation requires a different dimensionality
    #[error("matrix mode mismatch: expected {expected}, found {actual}")]
    ModeMismatch { expected: MatrixMode, actual: MatrixMode },

    /// Dimension conversion target does not cover the current element count
    #[error("cannot convert {from} {from_dims:?} to {to} {to_dims:?}")]
    ShapeMismatch {
        from: MatrixMode,
        from_dims: [usize; 3],
        to: MatrixMode,
        to_dims: [usize; 3],
    },

    /// Conversion was asked to go the wrong direction (or nowhere)
    #[error("conversion from {from} to {to} is not a {direction}")]
    InvalidConversion {
        from: MatrixMode,
        to: MatrixMode,
        direction: &'static str,
    },

    /// Data length does not match the declared size
    #[error("matrix data length mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("file group io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed matrix config {path}: {reason}")]
    MalformedConfig { path: PathBuf, reason: String },
}

impl MatrixError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedConfig {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
