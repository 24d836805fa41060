//! Error types for device discovery, resource construction, data contracts,
//! transfers and dispatch

use std::path::PathBuf;

use spca_matrix::{MatrixError, MatrixMode};

use crate::backend::TransferDirection;

/// Result type for compute operations
pub type Result<T> = std::result::Result<T, ComputeError>;

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// Platform/device query failed
    #[error("device enumeration failed (code {code}): {message}")]
    Enumeration { code: i32, message: String },

    /// Capability or descriptive attribute could not be read
    #[error("device query failed (code {code}): {message}")]
    DeviceQuery { code: i32, message: String },

    #[error("device index {index} out of range ({available} devices)")]
    DeviceIndexOutOfRange { index: usize, available: usize },

    #[error("context creation failed (code {code}): {message}")]
    ContextCreation { code: i32, message: String },

    #[error("command queue creation failed (code {code}): {message}")]
    QueueCreation { code: i32, message: String },

    /// Compilation failed; `log` holds the bounded compiler diagnostic
    #[error("program build failed (code {code}):\n{log}")]
    ProgramBuild { code: i32, log: String },

    #[error("failed to read kernel source {path}: {source}")]
    KernelSourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel entry point {entry:?} not found (code {code})")]
    KernelNotFound { entry: String, code: i32 },

    /// Declared dimensions do not describe an addressable byte size
    #[error("memory object {width}x{height} overflows the addressable byte size")]
    InvalidAttribute { width: usize, height: usize },

    #[error("buffer creation failed for {bytes} bytes (code {code})")]
    BufferCreation { bytes: usize, code: i32 },

    #[error("binding kernel argument {index} failed (code {code})")]
    KernelArgument { index: u32, code: i32 },

    /// Every IN descriptor already has a matrix queued
    #[error("input dataset full: {capacity} input descriptors")]
    DatasetFull { capacity: usize },

    /// Pushed matrix disagrees with the next IN descriptor
    #[error("matrix for input {index} mismatches descriptor: expected 2d {expected_bytes} bytes, got {mode} {actual_bytes} bytes")]
    DatasetMismatch {
        index: usize,
        expected_bytes: usize,
        actual_bytes: usize,
        mode: MatrixMode,
    },

    #[error("input dataset incomplete: {pushed} of {expected} matrices pushed")]
    IncompleteDataset { pushed: usize, expected: usize },

    #[error("{direction} transfer of descriptor {index} failed (code {code}): {message}")]
    Transfer {
        direction: TransferDirection,
        index: usize,
        code: i32,
        message: String,
    },

    #[error("kernel dispatch failed (code {code}): {message}")]
    Dispatch { code: i32, message: String },

    #[error("invalid work-group {x}x{y}: both dimensions must be greater than 1")]
    InvalidWorkgroup { x: usize, y: usize },

    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Backend rejected a handle or argument outside the classes above
    #[error("backend error (code {code}): {message}")]
    Backend { code: i32, message: String },

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

impl ComputeError {
    pub fn backend(code: i32, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    /// Build failure carrying at most `limit` bytes of `log`, cut on a char boundary.
    pub fn program_build(code: i32, mut log: String, limit: usize) -> Self {
        if log.len() > limit {
            let mut end = limit;
            while !log.is_char_boundary(end) {
                end -= 1;
            }
            log.truncate(end);
        }
        Self::ProgramBuild { code, log }
    }

    pub fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Native status code carried by the error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Enumeration { code, .. }
            | Self::DeviceQuery { code, .. }
            | Self::ContextCreation { code, .. }
            | Self::QueueCreation { code, .. }
            | Self::ProgramBuild { code, .. }
            | Self::KernelNotFound { code, .. }
            | Self::BufferCreation { code, .. }
            | Self::KernelArgument { code, .. }
            | Self::Transfer { code, .. }
            | Self::Dispatch { code, .. }
            | Self::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the error is a rejected data push (state left unchanged).
    pub fn is_data_contract(&self) -> bool {
        matches!(
            self,
            Self::DatasetFull { .. } | Self::DatasetMismatch { .. } | Self::IncompleteDataset { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_build_log_cut_on_char_boundary() {
        let err = ComputeError::program_build(-11, "ab\u{e9}cd".to_string(), 3);
        match err {
            ComputeError::ProgramBuild { code, log } => {
                assert_eq!(code, -11);
                assert_eq!(log, "ab");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            ComputeError::program_build(-11, "short".to_string(), 64),
            ComputeError::ProgramBuild { ref log, .. } if log == "short"
        ));
    }
}
