//! Workspace-level round trips: matrix file group → compute session → file group

use std::sync::Arc;

use starry_pca::compute::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE};
use starry_pca::matrix::MatrixMode;
use starry_pca::prelude::*;

#[test]
fn test_file_group_through_copy_session() -> Result<(), Box<dyn std::error::Error>> {
    starry_pca::tracing::init_test_tracing();
    let dir = tempfile::tempdir()?;

    // A 3D matrix persisted as a file group, flattened to 2D for the device.
    let mut volume = IndexMatrix::new(MatrixMode::Matrix3D);
    volume.alloc(8, 4, 2)?;
    for (i, v) in volume.as_mut_slice().iter_mut().enumerate() {
        *v = i as f32 * 0.25;
    }
    write_file_group(dir.path(), "volume", &volume)?;

    let group = read_file_group(dir.path(), "volume")?;
    let mut plane = group.matrix;
    plane.reduce(MatrixMode::Matrix2D)?;
    let [w, h, _] = plane.dims();

    let mut session = ComputeSession::new(Arc::new(HostBackend::new()));
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(w, h, Direction::In)?;
    session.push_matrix_attribute(w, h, Direction::Out)?;
    session.create_memory_objects()?;
    session.push_matrix_data(&plane)?;
    session.write_and_compute(w, h)?;

    let mut result = session.read_result()?.remove(0);
    assert_eq!(result.as_slice(), plane.as_slice());

    result.expand(MatrixMode::Matrix3D, [8, 4, 2])?;
    write_file_group(dir.path(), "result", &result)?;
    let back = read_file_group(dir.path(), "result")?;
    assert_eq!(back.matrix.dims(), [8, 4, 2]);
    assert_eq!(back.matrix.as_slice(), volume.as_slice());
    Ok(())
}

#[test]
fn test_device_listing_through_prelude() {
    let backend: Arc<dyn ComputeBackend> = Arc::new(HostBackend::new());
    let session = ComputeSession::new(backend);
    assert!(!session.devices().is_empty());
    let info = session.device_info(0).expect("device 0");
    assert!(info.contains("device_model_name: Host CPU (rayon)"));
    assert!(session.device_info(9).is_err());
}
