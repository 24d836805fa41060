//! End-to-end compute protocol on the host backend
//!
//! Covers the full declare → create → push → dispatch → read cycle,
//! dataset rejection, device selection and rollback after failures.

use std::io::Write;
use std::sync::Arc;

use spca_compute::backend::{MemAccess, NdRange2, ResourceKind};
use spca_compute::backends::host::{HostArgs, HostBackend, HostDevice, HostPlatform, HostStep};
use spca_compute::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE, CONV_FP32_ENTRY, CONV_FP32_SOURCE};
use spca_compute::{
    ComputeError, ComputeSession, Direction, DispatchGateway, KernelSource, SessionConfig, SessionState,
};
use spca_matrix::IndexMatrix;

fn host() -> Arc<HostBackend> {
    spca_tracing::init_test_tracing();
    Arc::new(HostBackend::new())
}

#[test]
fn test_copy_kernel_returns_input() -> spca_compute::Result<()> {
    let host = host();
    let mut session = ComputeSession::new(host.clone());
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(64, 64, Direction::In)?;
    session.push_matrix_attribute(64, 64, Direction::Out)?;
    session.create_memory_objects()?;

    session.push_matrix_data(&IndexMatrix::filled_2d(64, 64, 1.0)?)?;
    session.write_and_compute(64, 64)?;
    let results = session.read_result()?;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].dims(), [64, 64, 0]);
    assert!(results[0].as_slice().iter().all(|v| *v == 1.0));
    Ok(())
}

#[test]
fn test_result_order_follows_out_declarations() -> spca_compute::Result<()> {
    let host = host();
    // A kernel that writes its argument index into each output.
    host.register_kernel(
        "Stamp",
        3,
        Arc::new(|_range: &NdRange2, args: &mut HostArgs| {
            for index in [1, 2] {
                let (_, out) = args.split_output(index)?;
                out.fill(index as f32);
            }
            Ok::<(), String>(())
        }),
    );
    let source = "__kernel void Stamp(__global const float* a, __global float* b, __global float* c) {}";

    let mut session = ComputeSession::new(host.clone());
    session.init_calc_system(KernelSource::inline(source), "Stamp")?;
    session.push_matrix_attribute(4, 4, Direction::In)?;
    session.push_matrix_attribute(2, 2, Direction::Out)?;
    session.push_matrix_attribute(8, 2, Direction::Out)?;
    session.create_memory_objects()?;

    session.push_matrix_data(&IndexMatrix::zeros_2d(4, 4)?)?;
    session.write_and_compute(4, 4)?;
    let results = session.read_result()?;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].dims(), [2, 2, 0]);
    assert!(results[0].as_slice().iter().all(|v| *v == 1.0));
    assert_eq!(results[1].dims(), [8, 2, 0]);
    assert!(results[1].as_slice().iter().all(|v| *v == 2.0));
    Ok(())
}

#[test]
fn test_conv_kernel_produces_finite_output() -> spca_compute::Result<()> {
    let host = host();
    let mut session = ComputeSession::new(host.clone());
    session.init_calc_system(KernelSource::inline(CONV_FP32_SOURCE), CONV_FP32_ENTRY)?;
    session.alloc_workgroup(4, 4)?;
    for (w, h, direction) in [
        (16, 16, Direction::In),
        (3, 3, Direction::In),
        (3, 3, Direction::In),
        (2, 1, Direction::In),
        (16, 16, Direction::Out),
    ] {
        session.push_matrix_attribute(w, h, direction)?;
    }
    session.create_memory_objects()?;

    let mut params = IndexMatrix::zeros_2d(2, 1)?;
    params.as_mut_slice().copy_from_slice(&[3.0, 3.0]);
    session.push_matrix_data(&IndexMatrix::filled_2d(16, 16, 1.0)?)?;
    session.push_matrix_data(&IndexMatrix::filled_2d(3, 3, 0.5)?)?;
    session.push_matrix_data(&IndexMatrix::filled_2d(3, 3, 0.5)?)?;
    session.push_matrix_data(&params)?;
    session.write_and_compute(16, 16)?;

    let results = session.read_result()?;
    let out = results[0].as_slice();
    assert!(out.iter().all(|v| v.is_finite()));
    // Interior points see all nine taps, corners only four.
    let interior = results[0].get_2d(8, 8).unwrap_or_default();
    let corner = results[0].get_2d(0, 0).unwrap_or_default();
    assert!(interior > corner && corner > 0.0);
    Ok(())
}

#[test]
fn test_second_push_fails_and_dataset_stays_at_one() -> spca_compute::Result<()> {
    let host = host();
    let mut session = ComputeSession::new(host);
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(8, 8, Direction::In)?;
    session.push_matrix_attribute(8, 8, Direction::Out)?;
    session.create_memory_objects()?;

    let matrix = IndexMatrix::filled_2d(8, 8, 1.0)?;
    session.push_matrix_data(&matrix)?;
    assert!(session.push_matrix_data(&matrix).is_err());
    assert_eq!(session.dataset_len(), 1);
    Ok(())
}

#[test]
fn test_out_of_range_device_keeps_previous_selection() {
    spca_tracing::init_test_tracing();
    let host = Arc::new(HostBackend::with_platforms(vec![
        HostPlatform::new("p0", vec![HostDevice::cpu("a")]),
        HostPlatform::new("p1", vec![HostDevice::cpu("b")]),
    ]));
    let mut session = ComputeSession::new(host);
    assert_eq!(session.devices().len(), 2);
    session.set_calc_device(1).unwrap();

    assert!(matches!(
        session.set_calc_device(5),
        Err(ComputeError::DeviceIndexOutOfRange { index: 5, available: 2 })
    ));
    assert_eq!(session.device_index(), 1);
}

#[test]
fn test_selected_device_is_bound() -> spca_compute::Result<()> {
    spca_tracing::init_test_tracing();
    let host = Arc::new(HostBackend::with_platforms(vec![HostPlatform::new(
        "p",
        vec![HostDevice::cpu("a"), HostDevice::cpu("b")],
    )]));
    let mut session = ComputeSession::new(host);
    session.set_calc_device(1)?;
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;

    let bound = session.resources().map(|g| g.device().id);
    assert_eq!(bound, Some(session.devices()[1].id));
    Ok(())
}

#[test]
fn test_every_init_failure_leaves_nothing_live() {
    for step in [
        HostStep::CreateContext,
        HostStep::CreateQueue,
        HostStep::BuildProgram,
        HostStep::CreateKernel,
    ] {
        let host = host();
        host.inject_fault(step, 0);
        let mut session = ComputeSession::new(host.clone());
        assert!(session
            .init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)
            .is_err());
        assert_eq!(host.live_resources().total(), 0, "leak after {step:?}");
        assert_eq!(session.state(), SessionState::Uninit);
    }
}

#[test]
fn test_buffer_failure_releases_group_in_order() -> spca_compute::Result<()> {
    let host = host();
    let mut session = ComputeSession::new(host.clone());
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(8, 8, Direction::In)?;
    session.push_matrix_attribute(8, 8, Direction::Out)?;
    host.inject_fault(HostStep::CreateBuffer, 1);

    assert!(matches!(
        session.create_memory_objects(),
        Err(ComputeError::BufferCreation { .. })
    ));
    assert_eq!(session.state(), SessionState::Released);
    assert_eq!(host.live_resources().total(), 0);
    assert_eq!(
        host.take_release_log(),
        vec![
            ResourceKind::Buffer,
            ResourceKind::Queue,
            ResourceKind::Kernel,
            ResourceKind::Program,
            ResourceKind::Context,
        ]
    );
    Ok(())
}

#[test]
fn test_buffers_follow_declared_access() -> spca_compute::Result<()> {
    let host = host();
    let mut session = ComputeSession::new(host.clone());
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(8, 8, Direction::In)?;
    session.push_matrix_attribute(8, 8, Direction::Out)?;
    session.create_memory_objects()?;

    let table = session.memory().expect("memory table");
    for descriptor in table.descriptors() {
        let buffer = descriptor.buffer().expect("materialized");
        assert_eq!(host.buffer_access(buffer), Some(descriptor.direction.access()));
    }
    assert_eq!(host.live_resources().buffers, 2);
    assert_eq!(
        host.buffer_access(table.get(1).and_then(|d| d.buffer()).expect("out buffer")),
        Some(MemAccess::ReadWrite)
    );
    Ok(())
}

#[test]
fn test_kernel_source_from_path() -> spca_compute::Result<()> {
    let host = host();
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(BANDWIDTH_SOURCE.as_bytes()).expect("write source");

    let mut session = ComputeSession::new(host);
    session.init_calc_system(KernelSource::path(file.path()), BANDWIDTH_ENTRY)?;
    assert_eq!(session.state(), SessionState::KernelReady);
    Ok(())
}

#[test]
fn test_missing_source_file_rolls_back() {
    let host = host();
    let mut session = ComputeSession::new(host.clone());
    let err = session
        .init_calc_system(KernelSource::path("/nonexistent/spca/kernel.cl"), BANDWIDTH_ENTRY)
        .unwrap_err();
    assert!(matches!(err, ComputeError::KernelSourceRead { .. }));
    assert_eq!(host.live_resources().total(), 0);
}

#[test]
fn test_untimed_transfers_complete_before_results() -> spca_compute::Result<()> {
    let host = host();
    let config = SessionConfig::default().with_timed_transfers(false);
    let mut session = ComputeSession::with_config(host.clone(), DispatchGateway::global(), config);
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(32, 32, Direction::In)?;
    session.push_matrix_attribute(32, 32, Direction::Out)?;
    session.create_memory_objects()?;

    session.push_matrix_data(&IndexMatrix::filled_2d(32, 32, 7.0)?)?;
    session.write_and_compute(32, 32)?;
    let results = session.read_result()?;

    assert!(results[0].as_slice().iter().all(|v| *v == 7.0));
    assert_eq!(session.timers().upload_ms, 0.0);
    assert_eq!(host.live_resources().events, 0);
    Ok(())
}

#[test]
fn test_sessions_share_one_gateway() -> spca_compute::Result<()> {
    let host = host();
    let gateway = Arc::new(DispatchGateway::new());
    let mut sessions = Vec::new();
    for _ in 0..2 {
        let mut session = ComputeSession::with_config(host.clone(), gateway.clone(), SessionConfig::default());
        session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
        session.push_matrix_attribute(4, 4, Direction::In)?;
        session.push_matrix_attribute(4, 4, Direction::Out)?;
        session.create_memory_objects()?;
        sessions.push(session);
    }
    for session in &mut sessions {
        session.push_matrix_data(&IndexMatrix::filled_2d(4, 4, 1.0)?)?;
        session.write_and_compute(4, 4)?;
    }
    assert_eq!(gateway.dispatched(), 2);
    Ok(())
}

#[test]
fn test_default_sessions_dispatch_through_global_gateway() -> spca_compute::Result<()> {
    let host = host();
    let mut first = ComputeSession::new(host.clone());
    let second = ComputeSession::new(host.clone());
    assert!(Arc::ptr_eq(first.gateway(), second.gateway()));
    assert!(Arc::ptr_eq(first.gateway(), &DispatchGateway::global()));

    first.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    first.push_matrix_attribute(4, 4, Direction::In)?;
    first.push_matrix_attribute(4, 4, Direction::Out)?;
    first.create_memory_objects()?;
    let before = second.gateway().dispatched();
    first.push_matrix_data(&IndexMatrix::filled_2d(4, 4, 1.0)?)?;
    first.write_and_compute(4, 4)?;
    assert!(second.gateway().dispatched() > before);
    Ok(())
}

#[test]
fn test_read_failure_returns_error_and_keeps_session() -> spca_compute::Result<()> {
    let host = host();
    let mut session = ComputeSession::new(host.clone());
    session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
    session.push_matrix_attribute(4, 4, Direction::In)?;
    session.push_matrix_attribute(4, 4, Direction::Out)?;
    session.create_memory_objects()?;
    session.push_matrix_data(&IndexMatrix::filled_2d(4, 4, 1.0)?)?;
    session.write_and_compute(4, 4)?;

    host.inject_fault(HostStep::Read, 0);
    assert!(matches!(session.read_result(), Err(ComputeError::Transfer { .. })));
    assert_eq!(session.state(), SessionState::Executable);
    assert_eq!(session.read_result()?.len(), 1);
    Ok(())
}
