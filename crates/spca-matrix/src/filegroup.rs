//! Persisted matrix file group.
//!
//! A group named `name` inside `folder` is two files:
//!
//! - `name.bin`: raw little-endian `f32` values in row-major order
//! - `name.matcfg`: `"<timestamp_us> <dimX> <dimY> <dimZ> \n<path to name.bin>"`
//!
//! Only 3D matrices are written. Reading follows the `.bin` path recorded in
//! the config and rejects data whose length is not `dimX * dimY * dimZ * 4`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

use crate::error::{MatrixError, Result};
use crate::matrix::{IndexMatrix, MatrixMode, ELEMENT_SIZE, MAX_ELEMENTS};

pub const BIN_EXTENSION: &str = "bin";
pub const CONFIG_EXTENSION: &str = "matcfg";

/// A matrix read back from disk plus the timestamp recorded when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct FileGroup {
    pub matrix: IndexMatrix,
    pub timestamp_us: u64,
}

pub fn bin_path(folder: &Path, name: &str) -> PathBuf {
    folder.join(format!("{name}.{BIN_EXTENSION}"))
}

pub fn config_path(folder: &Path, name: &str) -> PathBuf {
    folder.join(format!("{name}.{CONFIG_EXTENSION}"))
}

/// Write `matrix` as the group `name` in `folder`, returning the timestamp stored.
pub fn write_file_group(folder: impl AsRef<Path>, name: &str, matrix: &IndexMatrix) -> Result<u64> {
    let folder = folder.as_ref();
    if matrix.mode() != MatrixMode::Matrix3D {
        error!(mode = %matrix.mode(), "failed write matrix file group, mode != 3d");
        return Err(MatrixError::ModeMismatch {
            expected: MatrixMode::Matrix3D,
            actual: matrix.mode(),
        });
    }

    let bin = bin_path(folder, name);
    let bytes: Vec<u8> = matrix.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(&bin, &bytes).map_err(|err| {
        error!(path = %bin.display(), "failed write matrix file group data");
        MatrixError::io(&bin, err)
    })?;

    let timestamp_us = now_us();
    let [x, y, z] = matrix.dims();
    let config = format!("{timestamp_us} {x} {y} {z} \n{}", bin.display());
    let cfg = config_path(folder, name);
    fs::write(&cfg, config).map_err(|err| {
        error!(path = %cfg.display(), "failed write matrix file group config");
        MatrixError::io(&cfg, err)
    })?;

    debug!(group = name, bytes = bytes.len(), timestamp_us, "matrix file group written");
    Ok(timestamp_us)
}

/// Read the group `name` from `folder` into a 3D matrix.
pub fn read_file_group(folder: impl AsRef<Path>, name: &str) -> Result<FileGroup> {
    let cfg = config_path(folder.as_ref(), name);
    let text = fs::read_to_string(&cfg).map_err(|err| MatrixError::io(&cfg, err))?;
    let (timestamp_us, dims, bin) = parse_config(&cfg, &text)?;
    let expected = dims
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .filter(|elements| *elements <= MAX_ELEMENTS)
        .map(|elements| elements * ELEMENT_SIZE)
        .ok_or_else(|| {
            error!(path = %cfg.display(), ?dims, "failed read matrix file group, dims exceed element limit");
            MatrixError::malformed(&cfg, format!("dimensions {dims:?} exceed {MAX_ELEMENTS} elements"))
        })?;

    let bytes = fs::read(&bin).map_err(|err| MatrixError::io(&bin, err))?;
    if bytes.len() != expected {
        error!(
            path = %bin.display(),
            expected,
            actual = bytes.len(),
            "failed read matrix file group, dim != data_len"
        );
        return Err(MatrixError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let data = bytes
        .chunks_exact(ELEMENT_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let matrix = IndexMatrix::from_vec(MatrixMode::Matrix3D, dims, data)?;

    Ok(FileGroup { matrix, timestamp_us })
}

fn parse_config(path: &Path, text: &str) -> Result<(u64, [usize; 3], PathBuf)> {
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| MatrixError::malformed(path, "missing header line"))?;
    let bin = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| MatrixError::malformed(path, "missing data path line"))?;

    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(MatrixError::malformed(
            path,
            format!("expected 4 header fields, found {}", fields.len()),
        ));
    }

    let timestamp_us = fields[0]
        .parse::<u64>()
        .map_err(|err| MatrixError::malformed(path, format!("timestamp: {err}")))?;
    let mut dims = [0usize; 3];
    for (slot, field) in dims.iter_mut().zip(&fields[1..]) {
        *slot = field
            .parse::<usize>()
            .map_err(|err| MatrixError::malformed(path, format!("dimension {field:?}: {err}")))?;
    }

    Ok((timestamp_us, dims, PathBuf::from(bin)))
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}
