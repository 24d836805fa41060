//! # starry-pca
//!
//! Host-side GPGPU matrix orchestration. This crate re-exports the
//! workspace members:
//!
//! - [`compute`]: device catalog, backends, resource lifecycle, transfers, sessions
//! - [`matrix`]: the index-matrix container and the `.bin`/`.matcfg` file group
//! - [`bench`]: FP32 convolution and bandwidth benchmark
//! - [`tracing`]: subscriber setup and performance events

pub use spca_bench as bench;
pub use spca_compute as compute;
pub use spca_matrix as matrix;
pub use spca_tracing as tracing;

pub use spca_compute::{ComputeError, ComputeSession, Direction, KernelSource, SessionConfig};
pub use spca_matrix::IndexMatrix;

pub mod prelude {
    pub use spca_compute::backends::HostBackend;
    #[cfg(feature = "opencl")]
    pub use spca_compute::backends::OpenClBackend;
    pub use spca_compute::{
        ComputeBackend, ComputeError, ComputeSession, DeviceCatalog, Direction, DispatchGateway, KernelSource,
        SessionConfig,
    };
    pub use spca_matrix::{read_file_group, write_file_group, IndexMatrix, MatrixMode};
}
