//! Host-backend round trips through a compute session
//!
//! Measures upload + copy dispatch + download for square matrices, and the
//! cost of building a session from scratch.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spca_compute::backends::HostBackend;
use spca_compute::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE};
use spca_compute::{ComputeSession, Direction, KernelSource};
use spca_matrix::IndexMatrix;

fn copy_session(backend: Arc<HostBackend>, edge: usize) -> ComputeSession {
    let mut session = ComputeSession::new(backend);
    session
        .init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)
        .unwrap();
    session.alloc_workgroup(16, 16).unwrap();
    session.push_matrix_attribute(edge, edge, Direction::In).unwrap();
    session.push_matrix_attribute(edge, edge, Direction::Out).unwrap();
    session.create_memory_objects().unwrap();
    session
}

fn benchmark_copy_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_copy_round_trip");

    for edge in [64usize, 256, 1024].iter() {
        group.throughput(Throughput::Bytes((edge * edge * 4 * 2) as u64));
        group.bench_with_input(BenchmarkId::new("copy", edge), edge, |bencher, &edge| {
            let mut session = copy_session(Arc::new(HostBackend::new()), edge);
            let input = IndexMatrix::filled_2d(edge, edge, 1.0).unwrap();

            bencher.iter(|| {
                session.push_matrix_data(&input).unwrap();
                session.write_and_compute(edge, edge).unwrap();
                black_box(session.read_result().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_session_setup(c: &mut Criterion) {
    let backend = Arc::new(HostBackend::new());
    c.bench_function("session_setup_64", |bencher| {
        bencher.iter(|| black_box(copy_session(backend.clone(), 64)));
    });
}

criterion_group!(benches, benchmark_copy_round_trip, benchmark_session_setup);
criterion_main!(benches);
