//! Owning aggregate of the device-side objects of one session
//!
//! Every handle is wrapped in an [`Owned`] guard that releases it on drop.
//! [`ResourceGroup::release`] tears the group down in dependency order
//! (buffers, queue, kernel, program, context) and also runs from `Drop`, so
//! an early return during [`ResourceGroup::initialize`] leaves nothing behind.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{ComputeBackend, ContextHandle, KernelHandle, ProgramHandle, QueueHandle, ResourceHandle};
use crate::device::Device;
use crate::error::{ComputeError, Result};
use crate::memory::MemoryObjectTable;

/// Kernel program text, inline or read from a file at init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    Inline(String),
    Path(PathBuf),
}

impl KernelSource {
    pub fn inline(source: impl Into<String>) -> Self {
        Self::Inline(source.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn load(&self) -> Result<Cow<'_, str>> {
        match self {
            Self::Inline(text) => Ok(Cow::Borrowed(text)),
            Self::Path(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| ComputeError::KernelSourceRead {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

/// Scoped owner of one backend handle.
pub struct Owned<H>
where
    H: Copy + Into<ResourceHandle>,
{
    backend: Arc<dyn ComputeBackend>,
    handle: H,
}

impl<H> Owned<H>
where
    H: Copy + Into<ResourceHandle>,
{
    pub fn new(backend: Arc<dyn ComputeBackend>, handle: H) -> Self {
        Self { backend, handle }
    }

    /// The wrapped handle. Valid until the guard is dropped.
    pub fn get(&self) -> H {
        self.handle
    }
}

impl<H> Drop for Owned<H>
where
    H: Copy + Into<ResourceHandle>,
{
    fn drop(&mut self) {
        let handle: ResourceHandle = self.handle.into();
        if let Err(err) = self.backend.release(handle) {
            warn!(%handle, error = %err, "release failed");
        }
    }
}

impl<H> fmt::Debug for Owned<H>
where
    H: Copy + Into<ResourceHandle>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle: ResourceHandle = self.handle.into();
        write!(f, "Owned({handle})")
    }
}

/// Device, context, queue, program, kernel and memory objects of a session.
pub struct ResourceGroup {
    backend: Arc<dyn ComputeBackend>,
    device: Device,
    context: Option<Owned<ContextHandle>>,
    queue: Option<Owned<QueueHandle>>,
    program: Option<Owned<ProgramHandle>>,
    kernel: Option<Owned<KernelHandle>>,
    memory: MemoryObjectTable,
}

impl ResourceGroup {
    /// Build context, profiling queue, program and kernel for `device`.
    ///
    /// Stops at the first failing step; whatever was built is released
    /// before the error is returned.
    pub fn initialize(
        backend: Arc<dyn ComputeBackend>,
        device: Device,
        source: &KernelSource,
        entry: &str,
        build_log_limit: usize,
    ) -> Result<Self> {
        let mut group = Self {
            backend: Arc::clone(&backend),
            device,
            context: None,
            queue: None,
            program: None,
            kernel: None,
            memory: MemoryObjectTable::new(),
        };

        let context = backend.create_context(device.id)?;
        group.context = Some(Owned::new(Arc::clone(&backend), context));
        debug!(device = %device.id, %context, "context ready");

        let queue = backend.create_queue(context, device.id)?;
        group.queue = Some(Owned::new(Arc::clone(&backend), queue));
        debug!(%queue, "profiling queue ready");

        let text = source.load()?;
        let program = backend.build_program(context, device.id, &text, build_log_limit)?;
        group.program = Some(Owned::new(Arc::clone(&backend), program));
        debug!(%program, "program built");

        let kernel = backend.create_kernel(program, entry)?;
        group.kernel = Some(Owned::new(Arc::clone(&backend), kernel));
        info!(device = %device.id, entry, "kernel ready");

        Ok(group)
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> Option<ContextHandle> {
        self.context.as_ref().map(Owned::get)
    }

    pub fn queue(&self) -> Option<QueueHandle> {
        self.queue.as_ref().map(Owned::get)
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program.as_ref().map(Owned::get)
    }

    pub fn kernel(&self) -> Option<KernelHandle> {
        self.kernel.as_ref().map(Owned::get)
    }

    pub fn memory(&self) -> &MemoryObjectTable {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryObjectTable {
        &mut self.memory
    }

    /// Allocate and bind every declared memory object.
    pub fn create_memory_objects(&mut self) -> Result<()> {
        let (Some(context), Some(kernel)) = (self.context(), self.kernel()) else {
            return Err(ComputeError::invalid_state("create_memory_objects", "released"));
        };
        self.memory.materialize(&self.backend, context, kernel)
    }

    /// Release all objects: buffers, queue, kernel, program, context.
    /// Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }
        let buffers = self.memory.release_buffers();
        self.queue = None;
        self.kernel = None;
        self.program = None;
        self.context = None;
        debug!(device = %self.device.id, buffers, "resource group released");
    }

    pub fn is_released(&self) -> bool {
        self.context.is_none()
    }
}

impl Drop for ResourceGroup {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("backend", &self.backend.name())
            .field("device", &self.device)
            .field("context", &self.context)
            .field("queue", &self.queue)
            .field("program", &self.program)
            .field("kernel", &self.kernel)
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResourceKind;
    use crate::backends::host::{HostBackend, HostStep};
    use crate::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE};
    use crate::device::DeviceCatalog;
    use crate::memory::Direction;

    fn setup() -> (Arc<HostBackend>, Device) {
        let host = Arc::new(HostBackend::new());
        let device = DeviceCatalog::discover(host.as_ref()).devices()[0];
        (host, device)
    }

    fn init(host: &Arc<HostBackend>, device: Device) -> Result<ResourceGroup> {
        ResourceGroup::initialize(
            host.clone(),
            device,
            &KernelSource::inline(BANDWIDTH_SOURCE),
            BANDWIDTH_ENTRY,
            10240,
        )
    }

    #[test]
    fn test_initialize_builds_every_stage() {
        let (host, device) = setup();
        let group = init(&host, device).unwrap();
        assert!(group.context().is_some());
        assert!(group.queue().is_some());
        assert!(group.program().is_some());
        assert!(group.kernel().is_some());
        let live = host.live_resources();
        assert_eq!((live.contexts, live.queues, live.programs, live.kernels), (1, 1, 1, 1));
    }

    #[test]
    fn test_failed_step_rolls_back_earlier_stages() {
        for step in [HostStep::CreateQueue, HostStep::BuildProgram, HostStep::CreateKernel] {
            let (host, device) = setup();
            host.inject_fault(step, 0);
            assert!(init(&host, device).is_err(), "{step:?} should fail");
            assert_eq!(host.live_resources().total(), 0, "leak after {step:?}");
        }
    }

    #[test]
    fn test_unreadable_source_releases_context_and_queue() {
        let (host, device) = setup();
        let err = ResourceGroup::initialize(
            host.clone(),
            device,
            &KernelSource::path("/nonexistent/kernel.cl"),
            BANDWIDTH_ENTRY,
            10240,
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::KernelSourceRead { .. }));
        assert_eq!(host.take_release_log(), vec![ResourceKind::Queue, ResourceKind::Context]);
    }

    #[test]
    fn test_release_order() {
        let (host, device) = setup();
        let mut group = init(&host, device).unwrap();
        group.memory_mut().push(4, 4, Direction::In).unwrap();
        group.memory_mut().push(4, 4, Direction::Out).unwrap();
        group.create_memory_objects().unwrap();

        group.release();
        assert!(group.is_released());
        assert_eq!(
            host.take_release_log(),
            vec![
                ResourceKind::Buffer,
                ResourceKind::Buffer,
                ResourceKind::Queue,
                ResourceKind::Kernel,
                ResourceKind::Program,
                ResourceKind::Context,
            ]
        );

        group.release();
        drop(group);
        assert!(host.take_release_log().is_empty());
        assert_eq!(host.live_resources().total(), 0);
    }
}
