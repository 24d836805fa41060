//! # spca-bench
//!
//! FP32 convolution throughput and host/device bandwidth measured through
//! [`spca_compute::ComputeSession`].
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use spca_bench::{BenchmarkConfig, BenchmarkConvFp32};
//! use spca_compute::backends::HostBackend;
//!
//! let mut bench = BenchmarkConvFp32::new(Arc::new(HostBackend::new()), BenchmarkConfig::quick());
//! let result = bench.run_all()?;
//! assert!(result.calculate_gflops > 0.0);
//! # Ok::<(), spca_bench::BenchError>(())
//! ```

pub mod config;
pub mod conv;
pub mod error;
pub mod report;

pub use config::BenchmarkConfig;
pub use conv::{list_devices, workgroup_edge, BenchmarkConvFp32, DeviceSummary};
pub use error::{BenchError, Result};
pub use report::{gflops, BenchmarkResult};
