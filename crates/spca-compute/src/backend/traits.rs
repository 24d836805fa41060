//! Backend trait over a GPGPU compute API
//!
//! The orchestration layer (catalog, resource group, transfers, session) only
//! talks to devices through this trait. Two implementations ship with the
//! crate:
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │        ComputeBackend        │
//!                │  discovery · objects · queue │
//!                └──────────────┬───────────────┘
//!                    ┌──────────┴──────────┐
//!                    ▼                     ▼
//!             ┌─────────────┐       ┌─────────────┐
//!             │ HostBackend │       │OpenClBackend│
//!             │ (rayon CPU) │       │  (opencl3)  │
//!             └─────────────┘       └─────────────┘
//! ```
//!
//! Every method takes `&self`; implementations keep their object tables
//! behind interior locks so one backend can be shared as
//! `Arc<dyn ComputeBackend>` between a catalog and several sessions.
//!
//! Errors are already classified ([`ComputeError::ContextCreation`],
//! [`ComputeError::Transfer`], ...) and carry the native status code.
//!
//! [`ComputeError::ContextCreation`]: crate::ComputeError::ContextCreation
//! [`ComputeError::Transfer`]: crate::ComputeError::Transfer

use super::types::{
    BufferHandle, ContextHandle, DeviceAttribute, DeviceClass, DeviceId, DeviceText, EventHandle, EventProfile,
    KernelHandle, MemAccess, NdRange2, PlatformId, ProgramHandle, QueueHandle, ResourceHandle,
};
use crate::error::Result;

pub trait ComputeBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    // ============================================================================================
    // Discovery
    // ============================================================================================

    fn platforms(&self) -> Result<Vec<PlatformId>>;

    fn platform_devices(&self, platform: PlatformId) -> Result<Vec<DeviceId>>;

    /// Native device type mapped onto [`DeviceClass`].
    fn device_class(&self, device: DeviceId) -> Result<DeviceClass>;

    fn platform_name(&self, platform: PlatformId) -> Result<String>;

    fn device_attribute(&self, device: DeviceId, attribute: DeviceAttribute) -> Result<u64>;

    fn device_text(&self, device: DeviceId, field: DeviceText) -> Result<String>;

    // ============================================================================================
    // Object construction
    // ============================================================================================

    /// Single-device context.
    fn create_context(&self, device: DeviceId) -> Result<ContextHandle>;

    /// In-order queue with profiling enabled.
    fn create_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle>;

    /// Compile `source` for `device`.
    ///
    /// On failure the partially built program is already released and the
    /// returned [`crate::ComputeError::ProgramBuild`] carries the compiler log
    /// truncated to `log_limit` bytes.
    fn build_program(
        &self,
        context: ContextHandle,
        device: DeviceId,
        source: &str,
        log_limit: usize,
    ) -> Result<ProgramHandle>;

    fn create_kernel(&self, program: ProgramHandle, entry: &str) -> Result<KernelHandle>;

    fn create_buffer(&self, context: ContextHandle, access: MemAccess, bytes: usize) -> Result<BufferHandle>;

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, buffer: BufferHandle) -> Result<()>;

    // ============================================================================================
    // Queue operations
    // ============================================================================================

    /// Enqueue a non-blocking write of `data` into the start of `buffer`.
    ///
    /// # Safety
    ///
    /// The device may read `data` after this call returns. The caller must keep
    /// the memory alive and unmodified until the returned event has completed
    /// (via [`ComputeBackend::wait_event`]) or the queue has been finished.
    unsafe fn enqueue_write(&self, queue: QueueHandle, buffer: BufferHandle, data: &[u8]) -> Result<EventHandle>;

    /// Enqueue a non-blocking read of the start of `buffer` into `data`.
    ///
    /// # Safety
    ///
    /// The device may write `data` after this call returns. The caller must
    /// keep the memory alive and must neither read nor move it until the
    /// returned event has completed or the queue has been finished.
    unsafe fn enqueue_read(&self, queue: QueueHandle, buffer: BufferHandle, data: &mut [u8]) -> Result<EventHandle>;

    /// Enqueue a 2D dispatch of `kernel` over `range`.
    ///
    /// Callers outside this crate should go through
    /// [`crate::DispatchGateway`], which serializes this call process-wide.
    fn enqueue_kernel_2d(&self, queue: QueueHandle, kernel: KernelHandle, range: NdRange2) -> Result<EventHandle>;

    /// Block until `event` completes.
    fn wait_event(&self, event: EventHandle) -> Result<()>;

    /// Device-clock start/end of a completed command.
    fn event_profile(&self, event: EventHandle) -> Result<EventProfile>;

    /// Block until every command on `queue` completes.
    fn finish(&self, queue: QueueHandle) -> Result<()>;

    // ============================================================================================
    // Release
    // ============================================================================================

    fn release(&self, handle: ResourceHandle) -> Result<()>;
}
