//! Host reference backend
//!
//! Executes registered Rust kernels on the CPU (rayon) behind the same
//! object model a GPGPU driver exposes: platforms, devices, contexts,
//! profiling queues, programs, kernels, buffers and events. Commands run to
//! completion at enqueue time, so events are always complete and carry
//! monotonic nanosecond timestamps.
//!
//! Test hooks:
//! - [`HostBackend::inject_fault`] arms a one-shot failure for a step
//! - [`HostBackend::live_resources`] counts outstanding objects
//! - [`HostBackend::take_release_log`] records release order

mod kernels;
mod platform;

pub use kernels::{
    check_source, declared_entries, HostArg, HostArgs, HostKernel, HostKernelFn, HostKernelRegistry, ReadArgs,
};
pub use platform::{HostDevice, HostPlatform};

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::backend::{
    status, BufferHandle, ComputeBackend, ContextHandle, DeviceAttribute, DeviceClass, DeviceId, DeviceText,
    EventHandle, EventProfile, KernelHandle, MemAccess, NdRange2, PlatformId, ProgramHandle, QueueHandle,
    ResourceHandle, ResourceKind, TransferDirection,
};
use crate::error::{ComputeError, Result};

/// Steps that can be made to fail with [`HostBackend::inject_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostStep {
    Platforms,
    PlatformDevices,
    DeviceClass,
    CreateContext,
    CreateQueue,
    BuildProgram,
    CreateKernel,
    CreateBuffer,
    SetKernelArg,
    Write,
    Read,
    Dispatch,
    Wait,
}

#[derive(Debug)]
struct ArmedFault {
    step: HostStep,
    skip: usize,
}

/// Outstanding object counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveResources {
    pub contexts: usize,
    pub queues: usize,
    pub programs: usize,
    pub kernels: usize,
    pub buffers: usize,
    pub events: usize,
}

impl LiveResources {
    pub fn total(&self) -> usize {
        self.contexts + self.queues + self.programs + self.kernels + self.buffers + self.events
    }
}

#[derive(Debug)]
struct HostContext {
    device: DeviceId,
}

#[derive(Debug)]
struct HostQueue {
    context: ContextHandle,
    device: DeviceId,
}

#[derive(Debug)]
struct HostProgram {
    entries: Vec<String>,
}

#[derive(Debug)]
struct BoundKernel {
    name: String,
    kernel: HostKernel,
    args: Vec<Option<BufferHandle>>,
}

#[derive(Debug)]
struct HostBuffer {
    context: ContextHandle,
    access: MemAccess,
    bytes: usize,
    data: Vec<f32>,
}

#[derive(Debug, Default)]
struct HostState {
    contexts: HashMap<u64, HostContext>,
    queues: HashMap<u64, HostQueue>,
    programs: HashMap<u64, HostProgram>,
    kernels: HashMap<u64, BoundKernel>,
    buffers: HashMap<u64, HostBuffer>,
    events: HashMap<u64, EventProfile>,
    release_log: Vec<ResourceKind>,
    next_handle: u64,
}

impl HostState {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

pub struct HostBackend {
    platforms: Vec<HostPlatform>,
    registry: RwLock<HostKernelRegistry>,
    state: RwLock<HostState>,
    faults: Mutex<Vec<ArmedFault>>,
    epoch: Instant,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// One platform with one CPU device and the built-in kernels.
    pub fn new() -> Self {
        Self::with_platforms(vec![HostPlatform::default()])
    }

    pub fn with_platforms(platforms: Vec<HostPlatform>) -> Self {
        Self {
            platforms,
            registry: RwLock::new(HostKernelRegistry::with_builtins()),
            state: RwLock::new(HostState::default()),
            faults: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// Register (or replace) a host implementation for entry point `name`.
    pub fn register_kernel(&self, name: impl Into<String>, arity: usize, func: HostKernelFn) {
        self.registry.write().register(name, arity, func);
    }

    /// Fail the call to `step` that follows `skip` successful ones. One-shot.
    pub fn inject_fault(&self, step: HostStep, skip: usize) {
        self.faults.lock().push(ArmedFault { step, skip });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    pub fn live_resources(&self) -> LiveResources {
        let state = self.state.read();
        LiveResources {
            contexts: state.contexts.len(),
            queues: state.queues.len(),
            programs: state.programs.len(),
            kernels: state.kernels.len(),
            buffers: state.buffers.len(),
            events: state.events.len(),
        }
    }

    /// Kinds of every object released since the last call, in release order.
    pub fn take_release_log(&self) -> Vec<ResourceKind> {
        std::mem::take(&mut self.state.write().release_log)
    }

    /// Access mode of a live buffer.
    pub fn buffer_access(&self, buffer: BufferHandle) -> Option<MemAccess> {
        self.state.read().buffers.get(&buffer.id()).map(|b| b.access)
    }

    fn check_fault(&self, step: HostStep) -> bool {
        let mut faults = self.faults.lock();
        let Some(pos) = faults.iter().position(|f| f.step == step) else {
            return false;
        };
        if faults[pos].skip == 0 {
            faults.remove(pos);
            true
        } else {
            faults[pos].skip -= 1;
            false
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn device(&self, device: DeviceId) -> Result<&HostDevice> {
        let (platform, index) = split_device_id(device);
        self.platforms
            .get(platform)
            .and_then(|p| p.devices.get(index))
            .ok_or_else(|| ComputeError::backend(status::INVALID_DEVICE, format!("unknown {device}")))
    }

    fn record_event(&self, state: &mut HostState, start_ns: u64) -> EventHandle {
        let end_ns = self.now_ns().max(start_ns + 1);
        let id = state.next_id();
        state.events.insert(id, EventProfile { start_ns, end_ns });
        EventHandle::new(id)
    }

    fn transfer_error(direction: TransferDirection, code: i32, message: impl Into<String>) -> ComputeError {
        ComputeError::Transfer {
            direction,
            index: 0,
            code,
            message: message.into(),
        }
    }
}

// Device ids pack (platform, device index) so discovery needs no table.
fn device_id(platform: usize, index: usize) -> DeviceId {
    DeviceId::new(((platform as u64) << 32) | index as u64)
}

fn split_device_id(device: DeviceId) -> (usize, usize) {
    ((device.id() >> 32) as usize, (device.id() & 0xffff_ffff) as usize)
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformId>> {
        if self.check_fault(HostStep::Platforms) {
            return Err(ComputeError::Enumeration {
                code: status::OUT_OF_RESOURCES,
                message: "injected platform query failure".to_string(),
            });
        }
        Ok((0..self.platforms.len() as u64).map(PlatformId::new).collect())
    }

    fn platform_devices(&self, platform: PlatformId) -> Result<Vec<DeviceId>> {
        if self.check_fault(HostStep::PlatformDevices) {
            return Err(ComputeError::Enumeration {
                code: status::DEVICE_NOT_FOUND,
                message: format!("injected device query failure on {platform}"),
            });
        }
        let index = platform.id() as usize;
        let host = self.platforms.get(index).ok_or_else(|| ComputeError::Enumeration {
            code: status::INVALID_PLATFORM,
            message: format!("unknown {platform}"),
        })?;
        Ok((0..host.devices.len()).map(|i| device_id(index, i)).collect())
    }

    fn device_class(&self, device: DeviceId) -> Result<DeviceClass> {
        if self.check_fault(HostStep::DeviceClass) {
            return Err(ComputeError::DeviceQuery {
                code: status::INVALID_DEVICE,
                message: format!("injected class query failure on {device}"),
            });
        }
        self.device(device).map(|d| d.class)
    }

    fn platform_name(&self, platform: PlatformId) -> Result<String> {
        self.platforms
            .get(platform.id() as usize)
            .map(|p| p.name.clone())
            .ok_or_else(|| ComputeError::DeviceQuery {
                code: status::INVALID_PLATFORM,
                message: format!("unknown {platform}"),
            })
    }

    fn device_attribute(&self, device: DeviceId, attribute: DeviceAttribute) -> Result<u64> {
        self.device(device)?
            .attribute(attribute)
            .ok_or_else(|| ComputeError::DeviceQuery {
                code: status::INVALID_VALUE,
                message: format!("{device} does not report {}", attribute.label()),
            })
    }

    fn device_text(&self, device: DeviceId, field: DeviceText) -> Result<String> {
        let host = self.device(device)?;
        Ok(match field {
            DeviceText::Name => host.name.clone(),
            DeviceText::Vendor => host.vendor.clone(),
            DeviceText::Version => host.version.clone(),
            DeviceText::Profile => host.profile.clone(),
        })
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextHandle> {
        if self.device(device).is_err() {
            return Err(ComputeError::ContextCreation {
                code: status::INVALID_DEVICE,
                message: format!("unknown {device}"),
            });
        }
        if self.check_fault(HostStep::CreateContext) {
            return Err(ComputeError::ContextCreation {
                code: status::OUT_OF_RESOURCES,
                message: "injected context failure".to_string(),
            });
        }
        let mut state = self.state.write();
        let id = state.next_id();
        state.contexts.insert(id, HostContext { device });
        Ok(ContextHandle::new(id))
    }

    fn create_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle> {
        if self.check_fault(HostStep::CreateQueue) {
            return Err(ComputeError::QueueCreation {
                code: status::OUT_OF_RESOURCES,
                message: "injected queue failure".to_string(),
            });
        }
        let mut state = self.state.write();
        match state.contexts.get(&context.id()) {
            Some(ctx) if ctx.device == device => {}
            Some(_) => {
                return Err(ComputeError::QueueCreation {
                    code: status::INVALID_DEVICE,
                    message: format!("{device} is not part of {context}"),
                })
            }
            None => {
                return Err(ComputeError::QueueCreation {
                    code: status::INVALID_CONTEXT,
                    message: format!("unknown {context}"),
                })
            }
        }
        let id = state.next_id();
        state.queues.insert(id, HostQueue { context, device });
        Ok(QueueHandle::new(id))
    }

    fn build_program(
        &self,
        context: ContextHandle,
        device: DeviceId,
        source: &str,
        log_limit: usize,
    ) -> Result<ProgramHandle> {
        if !self.state.read().contexts.contains_key(&context.id()) {
            return Err(ComputeError::ProgramBuild {
                code: status::INVALID_CONTEXT,
                log: String::new(),
            });
        }
        let entries = if self.check_fault(HostStep::BuildProgram) {
            Err(format!("<source>: error: injected build failure for {device}"))
        } else {
            check_source(source)
        };
        let entries =
            entries.map_err(|log| ComputeError::program_build(status::BUILD_PROGRAM_FAILURE, log, log_limit))?;

        let mut state = self.state.write();
        let id = state.next_id();
        trace!(program = id, entries = ?entries, "host program built");
        state.programs.insert(id, HostProgram { entries });
        Ok(ProgramHandle::new(id))
    }

    fn create_kernel(&self, program: ProgramHandle, entry: &str) -> Result<KernelHandle> {
        let not_found = || ComputeError::KernelNotFound {
            entry: entry.to_string(),
            code: status::INVALID_KERNEL_NAME,
        };
        if self.check_fault(HostStep::CreateKernel) {
            return Err(not_found());
        }

        let mut state = self.state.write();
        let declared = state
            .programs
            .get(&program.id())
            .ok_or_else(|| ComputeError::backend(status::INVALID_PROGRAM, format!("unknown {program}")))?
            .entries
            .iter()
            .any(|e| e == entry);
        if !declared {
            return Err(not_found());
        }
        let kernel = self.registry.read().get(entry).cloned().ok_or_else(not_found)?;

        let id = state.next_id();
        state.kernels.insert(
            id,
            BoundKernel {
                name: entry.to_string(),
                args: vec![None; kernel.arity],
                kernel,
            },
        );
        Ok(KernelHandle::new(id))
    }

    fn create_buffer(&self, context: ContextHandle, access: MemAccess, bytes: usize) -> Result<BufferHandle> {
        let failure = |code| ComputeError::BufferCreation { bytes, code };
        if bytes == 0 {
            return Err(failure(status::INVALID_BUFFER_SIZE));
        }
        if self.check_fault(HostStep::CreateBuffer) {
            return Err(failure(status::MEM_OBJECT_ALLOCATION_FAILURE));
        }
        let mut state = self.state.write();
        let device = state
            .contexts
            .get(&context.id())
            .map(|ctx| ctx.device)
            .ok_or_else(|| failure(status::INVALID_CONTEXT))?;
        let limit = self.device(device)?.attribute(DeviceAttribute::GlobalMemSize).unwrap_or(u64::MAX);
        if bytes as u64 > limit {
            return Err(failure(status::INVALID_BUFFER_SIZE));
        }

        let id = state.next_id();
        state.buffers.insert(
            id,
            HostBuffer {
                context,
                access,
                bytes,
                data: vec![0.0; bytes.div_ceil(4)],
            },
        );
        Ok(BufferHandle::new(id))
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, buffer: BufferHandle) -> Result<()> {
        let failure = |code| ComputeError::KernelArgument { index, code };
        if self.check_fault(HostStep::SetKernelArg) {
            return Err(failure(status::INVALID_KERNEL_ARGS));
        }
        let mut state = self.state.write();
        if !state.buffers.contains_key(&buffer.id()) {
            return Err(failure(status::INVALID_MEM_OBJECT));
        }
        let bound = state
            .kernels
            .get_mut(&kernel.id())
            .ok_or_else(|| failure(status::INVALID_KERNEL))?;
        let slot = bound
            .args
            .get_mut(index as usize)
            .ok_or_else(|| failure(status::INVALID_ARG_INDEX))?;
        *slot = Some(buffer);
        Ok(())
    }

    unsafe fn enqueue_write(&self, queue: QueueHandle, buffer: BufferHandle, data: &[u8]) -> Result<EventHandle> {
        let fail = |code, message: String| Self::transfer_error(TransferDirection::Upload, code, message);
        if self.check_fault(HostStep::Write) {
            return Err(fail(status::OUT_OF_RESOURCES, "injected write failure".to_string()));
        }
        let start_ns = self.now_ns();
        let mut state = self.state.write();
        let queue_ctx = state
            .queues
            .get(&queue.id())
            .map(|q| q.context)
            .ok_or_else(|| fail(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let target = state
            .buffers
            .get_mut(&buffer.id())
            .ok_or_else(|| fail(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;
        if target.context != queue_ctx {
            return Err(fail(status::INVALID_CONTEXT, format!("{buffer} belongs to another context")));
        }
        if data.len() > target.bytes {
            return Err(fail(
                status::INVALID_VALUE,
                format!("write of {} bytes exceeds {buffer} ({} bytes)", data.len(), target.bytes),
            ));
        }
        bytemuck::cast_slice_mut::<f32, u8>(&mut target.data)[..data.len()].copy_from_slice(data);
        Ok(self.record_event(&mut state, start_ns))
    }

    unsafe fn enqueue_read(&self, queue: QueueHandle, buffer: BufferHandle, data: &mut [u8]) -> Result<EventHandle> {
        let fail = |code, message: String| Self::transfer_error(TransferDirection::Download, code, message);
        if self.check_fault(HostStep::Read) {
            return Err(fail(status::OUT_OF_RESOURCES, "injected read failure".to_string()));
        }
        let start_ns = self.now_ns();
        let mut state = self.state.write();
        let queue_ctx = state
            .queues
            .get(&queue.id())
            .map(|q| q.context)
            .ok_or_else(|| fail(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let source = state
            .buffers
            .get(&buffer.id())
            .ok_or_else(|| fail(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;
        if source.context != queue_ctx {
            return Err(fail(status::INVALID_CONTEXT, format!("{buffer} belongs to another context")));
        }
        if data.len() > source.bytes {
            return Err(fail(
                status::INVALID_VALUE,
                format!("read of {} bytes exceeds {buffer} ({} bytes)", data.len(), source.bytes),
            ));
        }
        data.copy_from_slice(&bytemuck::cast_slice::<f32, u8>(&source.data)[..data.len()]);
        Ok(self.record_event(&mut state, start_ns))
    }

    fn enqueue_kernel_2d(&self, queue: QueueHandle, kernel: KernelHandle, range: NdRange2) -> Result<EventHandle> {
        let fail = |code, message: String| ComputeError::Dispatch { code, message };
        if self.check_fault(HostStep::Dispatch) {
            return Err(fail(status::OUT_OF_RESOURCES, "injected dispatch failure".to_string()));
        }

        let start_ns = self.now_ns();
        let mut state = self.state.write();
        let device = state
            .queues
            .get(&queue.id())
            .map(|q| q.device)
            .ok_or_else(|| fail(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let max_group = self
            .device(device)?
            .attribute(DeviceAttribute::MaxWorkGroupSize)
            .unwrap_or(u64::MAX);

        let [lx, ly] = range.local;
        let divisible = range.global.iter().zip(range.local.iter()).all(|(&g, &l)| l > 0 && g % l == 0);
        if !divisible || range.group_size() as u64 > max_group {
            return Err(fail(
                status::INVALID_WORK_GROUP_SIZE,
                format!("{range} invalid for max work-group {max_group} ({lx}x{ly})"),
            ));
        }

        let bound = state
            .kernels
            .get(&kernel.id())
            .ok_or_else(|| fail(status::INVALID_KERNEL, format!("unknown {kernel}")))?;
        let handles: Vec<BufferHandle> = bound
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| arg.ok_or_else(|| fail(status::INVALID_KERNEL_ARGS, format!("argument {i} not set"))))
            .collect::<Result<_>>()?;
        let name = bound.name.clone();
        let func = bound.kernel.func.clone();

        // Aliased bindings would need two owners of one buffer.
        let mut seen = std::collections::HashSet::new();
        if !handles.iter().all(|h| seen.insert(*h)) {
            return Err(fail(status::INVALID_KERNEL_ARGS, format!("{name}: buffer bound twice")));
        }

        let mut taken = Vec::with_capacity(handles.len());
        for handle in &handles {
            let buffer = state
                .buffers
                .get_mut(&handle.id())
                .ok_or_else(|| fail(status::INVALID_MEM_OBJECT, format!("{handle} released")))?;
            taken.push(HostArg {
                access: buffer.access,
                data: std::mem::take(&mut buffer.data),
            });
        }

        let mut args = HostArgs::new(taken);
        let outcome = func(&range, &mut args);
        for (handle, arg) in handles.iter().zip(args.into_inner()) {
            if let Some(buffer) = state.buffers.get_mut(&handle.id()) {
                buffer.data = arg.data;
            }
        }
        outcome.map_err(|message| fail(status::OUT_OF_RESOURCES, format!("{name}: {message}")))?;

        debug!(kernel = %name, %range, "host dispatch complete");
        Ok(self.record_event(&mut state, start_ns))
    }

    fn wait_event(&self, event: EventHandle) -> Result<()> {
        if self.check_fault(HostStep::Wait) {
            return Err(ComputeError::backend(status::OUT_OF_RESOURCES, "injected wait failure"));
        }
        if self.state.read().events.contains_key(&event.id()) {
            Ok(())
        } else {
            Err(ComputeError::backend(status::INVALID_EVENT, format!("unknown {event}")))
        }
    }

    fn event_profile(&self, event: EventHandle) -> Result<EventProfile> {
        self.state
            .read()
            .events
            .get(&event.id())
            .copied()
            .ok_or_else(|| ComputeError::backend(status::INVALID_EVENT, format!("unknown {event}")))
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        if self.state.read().queues.contains_key(&queue.id()) {
            Ok(())
        } else {
            Err(ComputeError::backend(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))
        }
    }

    fn release(&self, handle: ResourceHandle) -> Result<()> {
        let mut state = self.state.write();
        let removed = match handle {
            ResourceHandle::Context(h) => state.contexts.remove(&h.id()).is_some(),
            ResourceHandle::Queue(h) => state.queues.remove(&h.id()).is_some(),
            ResourceHandle::Program(h) => state.programs.remove(&h.id()).is_some(),
            ResourceHandle::Kernel(h) => state.kernels.remove(&h.id()).is_some(),
            ResourceHandle::Buffer(h) => state.buffers.remove(&h.id()).is_some(),
            ResourceHandle::Event(h) => state.events.remove(&h.id()).is_some(),
        };
        if !removed {
            return Err(ComputeError::backend(status::INVALID_VALUE, format!("release of unknown {handle}")));
        }
        state.release_log.push(handle.kind());
        Ok(())
    }
}
