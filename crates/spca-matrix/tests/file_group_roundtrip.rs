use std::fs;

use spca_matrix::filegroup::{bin_path, config_path};
use spca_matrix::{read_file_group, write_file_group, IndexMatrix, MatrixError, MatrixMode};
use tempfile::TempDir;

fn cube(dims: [usize; 3]) -> IndexMatrix {
    let len = dims.iter().product::<usize>();
    let data = (0..len).map(|i| i as f32 * 0.25 - 3.5).collect();
    IndexMatrix::from_vec(MatrixMode::Matrix3D, dims, data).unwrap()
}

#[test]
fn roundtrip_preserves_dims_and_bits() -> Result<(), MatrixError> {
    let dir = TempDir::new().unwrap();
    let mut matrix = cube([3, 4, 5]);
    *matrix.get_3d_mut(0, 0, 0).unwrap() = f32::MIN_POSITIVE;
    *matrix.get_3d_mut(2, 3, 4).unwrap() = -0.0;

    let written_ts = write_file_group(dir.path(), "weights", &matrix)?;
    let group = read_file_group(dir.path(), "weights")?;

    assert_eq!(group.timestamp_us, written_ts);
    assert_eq!(group.matrix.dims(), [3, 4, 5]);
    let original: Vec<u32> = matrix.as_slice().iter().map(|v| v.to_bits()).collect();
    let restored: Vec<u32> = group.matrix.as_slice().iter().map(|v| v.to_bits()).collect();
    assert_eq!(original, restored);
    Ok(())
}

#[test]
fn bin_file_is_little_endian_f32() -> Result<(), MatrixError> {
    let dir = TempDir::new().unwrap();
    let matrix = IndexMatrix::from_vec(MatrixMode::Matrix3D, [1, 1, 2], vec![1.0, -2.0]).unwrap();
    write_file_group(dir.path(), "le", &matrix)?;

    let bytes = fs::read(bin_path(dir.path(), "le")).unwrap();
    let mut expected = 1.0f32.to_le_bytes().to_vec();
    expected.extend_from_slice(&(-2.0f32).to_le_bytes());
    assert_eq!(bytes, expected);

    let config = fs::read_to_string(config_path(dir.path(), "le")).unwrap();
    let mut lines = config.lines();
    let header: Vec<&str> = lines.next().unwrap().split_whitespace().collect();
    assert_eq!(&header[1..], &["1", "1", "2"]);
    assert!(lines.next().unwrap().ends_with("le.bin"));
    Ok(())
}

#[test]
fn write_rejects_non_3d_matrix() {
    let dir = TempDir::new().unwrap();
    let flat = IndexMatrix::zeros_2d(4, 4).unwrap();
    let err = write_file_group(dir.path(), "flat", &flat).unwrap_err();
    assert!(matches!(err, MatrixError::ModeMismatch { .. }));
    assert!(!bin_path(dir.path(), "flat").exists());
}

#[test]
fn read_rejects_truncated_bin() -> Result<(), MatrixError> {
    let dir = TempDir::new().unwrap();
    write_file_group(dir.path(), "short", &cube([2, 2, 2]))?;

    let bin = bin_path(dir.path(), "short");
    let mut bytes = fs::read(&bin).unwrap();
    bytes.truncate(bytes.len() - 4);
    fs::write(&bin, bytes).unwrap();

    let err = read_file_group(dir.path(), "short").unwrap_err();
    assert!(matches!(err, MatrixError::SizeMismatch { expected: 32, actual: 28 }));
    Ok(())
}

#[test]
fn read_rejects_dims_beyond_element_limit() {
    let dir = TempDir::new().unwrap();
    let bin = bin_path(dir.path(), "huge");
    fs::write(&bin, []).unwrap();

    for header in ["1 4294967296 4294967296 8", "1 2048 2048 512"] {
        fs::write(config_path(dir.path(), "huge"), format!("{header} \n{}", bin.display())).unwrap();
        let err = read_file_group(dir.path(), "huge").unwrap_err();
        assert!(matches!(err, MatrixError::MalformedConfig { .. }), "{header}: {err}");
    }
}

#[test]
fn read_missing_group_is_io_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        read_file_group(dir.path(), "absent"),
        Err(MatrixError::Io { .. })
    ));
}
