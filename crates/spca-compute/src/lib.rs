//! # spca-compute
//!
//! Host-side orchestration over a GPGPU compute API: device discovery,
//! kernel build, device buffer lifecycle, timed matrix transfers and
//! serialized 2D dispatch.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ComputeSession                        │
//! │  init → attributes → memory objects → push → run → read  │
//! └───────┬──────────────┬───────────────┬───────────────────┘
//!         │              │               │
//!         ▼              ▼               ▼
//!  ┌─────────────┐ ┌──────────────┐ ┌────────────────┐
//!  │DeviceCatalog│ │ResourceGroup │ │ TransferEngine │
//!  │             │ │ + MemoryObj. │ │ DispatchGateway│
//!  └──────┬──────┘ └──────┬───────┘ └───────┬────────┘
//!         └───────────────┼─────────────────┘
//!                         ▼
//!              ┌──────────────────────┐
//!              │    ComputeBackend    │
//!              │  host  │  opencl     │
//!              └──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use spca_compute::backends::HostBackend;
//! use spca_compute::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE};
//! use spca_compute::{ComputeSession, Direction, KernelSource};
//! use spca_matrix::IndexMatrix;
//!
//! let mut session = ComputeSession::new(Arc::new(HostBackend::new()));
//! session.init_calc_system(KernelSource::inline(BANDWIDTH_SOURCE), BANDWIDTH_ENTRY)?;
//! session.push_matrix_attribute(32, 32, Direction::In)?;
//! session.push_matrix_attribute(32, 32, Direction::Out)?;
//! session.create_memory_objects()?;
//!
//! session.push_matrix_data(&IndexMatrix::filled_2d(32, 32, 1.0)?)?;
//! session.write_and_compute(32, 32)?;
//! let results = session.read_result()?;
//! assert_eq!(results[0].as_slice()[0], 1.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod backends;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod kernels;
pub mod memory;
pub mod resource;
pub mod session;
pub mod timing;
pub mod transfer;

pub use backend::{ComputeBackend, DeviceAttribute, DeviceClass, DeviceId, MemAccess, NdRange2, TransferDirection};
pub use config::SessionConfig;
pub use device::{format_device_info, Device, DeviceCatalog};
pub use dispatch::DispatchGateway;
pub use error::{ComputeError, Result};
pub use memory::{Direction, MemoryObjectDescriptor, MemoryObjectTable};
pub use resource::{KernelSource, ResourceGroup};
pub use session::{ComputeSession, SessionState};
pub use timing::{SessionTimers, TransferReport};
pub use transfer::TransferEngine;
