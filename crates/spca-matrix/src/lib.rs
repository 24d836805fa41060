//! # spca-matrix
//!
//! Host-side matrix storage for the compute session.
//!
//! [`IndexMatrix`] is a flat `f32` buffer tagged with a dimensionality
//! ([`MatrixMode`]) and up to three extents. The compute layer only ever looks
//! at its mode, extents, byte size and raw bytes; contents are opaque to it.
//!
//! [`filegroup`] persists a 3D matrix as a `.bin` + `.matcfg` pair.

pub mod error;
pub mod filegroup;
pub mod matrix;

pub use error::{MatrixError, Result};
pub use filegroup::{read_file_group, write_file_group, FileGroup};
pub use matrix::{IndexMatrix, MatrixMode, ELEMENT_SIZE, MAX_ELEMENTS};
