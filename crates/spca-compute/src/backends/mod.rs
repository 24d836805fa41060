//! Backend implementations

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use host::HostBackend;
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;
