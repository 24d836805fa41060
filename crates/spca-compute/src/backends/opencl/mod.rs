//! OpenCL backend over the `opencl3` bindings
//!
//! Objects live in handle tables behind one `RwLock`; releasing a handle
//! drops the wrapper, which calls the matching `clRelease*`.

use std::collections::HashMap;
use std::ptr;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_type, cl_uchar, CL_NON_BLOCKING};
use parking_lot::RwLock;
use tracing::debug;

use crate::backend::{
    status, BufferHandle, ComputeBackend, ContextHandle, DeviceAttribute, DeviceClass, DeviceId, DeviceText,
    EventHandle, EventProfile, KernelHandle, MemAccess, NdRange2, PlatformId, ProgramHandle, QueueHandle,
    ResourceHandle, TransferDirection,
};
use crate::error::{ComputeError, Result};

#[derive(Default)]
struct Registry {
    platforms: Vec<Platform>,
    devices: HashMap<u64, Device>,
    contexts: HashMap<u64, Context>,
    queues: HashMap<u64, CommandQueue>,
    programs: HashMap<u64, Program>,
    kernels: HashMap<u64, Kernel>,
    buffers: HashMap<u64, Buffer<cl_uchar>>,
    events: HashMap<u64, Event>,
    next_handle: u64,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Default)]
pub struct OpenClBackend {
    registry: RwLock<Registry>,
}

impl OpenClBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn device_id(platform: usize, index: usize) -> DeviceId {
    DeviceId::new(((platform as u64) << 32) | index as u64)
}

fn class_of(native: cl_device_type) -> DeviceClass {
    if native & CL_DEVICE_TYPE_GPU != 0 {
        DeviceClass::Gpu
    } else if native & CL_DEVICE_TYPE_CPU != 0 {
        DeviceClass::Cpu
    } else if native & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceClass::Accelerator
    } else {
        DeviceClass::Default
    }
}

fn query_error(err: ClError) -> ComputeError {
    ComputeError::DeviceQuery {
        code: err.0,
        message: err.to_string(),
    }
}

fn backend_error(err: ClError) -> ComputeError {
    ComputeError::backend(err.0, err.to_string())
}

fn unknown(code: i32, what: impl std::fmt::Display) -> ComputeError {
    ComputeError::backend(code, format!("unknown {what}"))
}

impl ComputeBackend for OpenClBackend {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformId>> {
        let platforms = get_platforms().map_err(|err| ComputeError::Enumeration {
            code: err.0,
            message: err.to_string(),
        })?;
        let ids = (0..platforms.len() as u64).map(PlatformId::new).collect();
        self.registry.write().platforms = platforms;
        Ok(ids)
    }

    fn platform_devices(&self, platform: PlatformId) -> Result<Vec<DeviceId>> {
        let mut registry = self.registry.write();
        let index = platform.id() as usize;
        let host = *registry.platforms.get(index).ok_or_else(|| ComputeError::Enumeration {
            code: status::INVALID_PLATFORM,
            message: format!("unknown {platform}"),
        })?;
        let ids = host.get_devices(CL_DEVICE_TYPE_ALL).map_err(|err| ComputeError::Enumeration {
            code: err.0,
            message: err.to_string(),
        })?;

        let mut found = Vec::with_capacity(ids.len());
        for (i, raw) in ids.into_iter().enumerate() {
            let id = device_id(index, i);
            registry.devices.insert(id.id(), Device::new(raw));
            found.push(id);
        }
        Ok(found)
    }

    fn device_class(&self, device: DeviceId) -> Result<DeviceClass> {
        let registry = self.registry.read();
        let dev = registry
            .devices
            .get(&device.id())
            .ok_or_else(|| unknown(status::INVALID_DEVICE, device))?;
        dev.dev_type().map(class_of).map_err(query_error)
    }

    fn platform_name(&self, platform: PlatformId) -> Result<String> {
        let registry = self.registry.read();
        let host = registry
            .platforms
            .get(platform.id() as usize)
            .ok_or_else(|| unknown(status::INVALID_PLATFORM, platform))?;
        host.name().map_err(query_error)
    }

    fn device_attribute(&self, device: DeviceId, attribute: DeviceAttribute) -> Result<u64> {
        let registry = self.registry.read();
        let dev = registry
            .devices
            .get(&device.id())
            .ok_or_else(|| unknown(status::INVALID_DEVICE, device))?;
        let value = match attribute {
            DeviceAttribute::MaxWorkGroupSize => dev.max_work_group_size().map(|v| v as u64),
            DeviceAttribute::GlobalMemSize => dev.global_mem_size(),
            DeviceAttribute::GlobalMemCacheSize => dev.global_mem_cache_size(),
            DeviceAttribute::MaxClockFrequency => dev.max_clock_frequency().map(u64::from),
            DeviceAttribute::MaxConstantBufferSize => dev.max_constant_buffer_size(),
            DeviceAttribute::MaxConstantArgs => dev.max_constant_args().map(u64::from),
        };
        value.map_err(query_error)
    }

    fn device_text(&self, device: DeviceId, field: DeviceText) -> Result<String> {
        let registry = self.registry.read();
        let dev = registry
            .devices
            .get(&device.id())
            .ok_or_else(|| unknown(status::INVALID_DEVICE, device))?;
        let text = match field {
            DeviceText::Name => dev.name(),
            DeviceText::Vendor => dev.vendor(),
            DeviceText::Version => dev.version(),
            DeviceText::Profile => dev.profile(),
        };
        text.map_err(query_error)
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextHandle> {
        let mut registry = self.registry.write();
        let dev = registry.devices.get(&device.id()).ok_or_else(|| ComputeError::ContextCreation {
            code: status::INVALID_DEVICE,
            message: format!("unknown {device}"),
        })?;
        let context = Context::from_device(dev).map_err(|err| ComputeError::ContextCreation {
            code: err.0,
            message: err.to_string(),
        })?;
        let id = registry.next_id();
        registry.contexts.insert(id, context);
        Ok(ContextHandle::new(id))
    }

    fn create_queue(&self, context: ContextHandle, _device: DeviceId) -> Result<QueueHandle> {
        let mut registry = self.registry.write();
        let ctx = registry.contexts.get(&context.id()).ok_or_else(|| ComputeError::QueueCreation {
            code: status::INVALID_CONTEXT,
            message: format!("unknown {context}"),
        })?;
        let queue = CommandQueue::create_default_with_properties(ctx, CL_QUEUE_PROFILING_ENABLE, 0).map_err(
            |err| ComputeError::QueueCreation {
                code: err.0,
                message: err.to_string(),
            },
        )?;
        let id = registry.next_id();
        registry.queues.insert(id, queue);
        Ok(QueueHandle::new(id))
    }

    fn build_program(
        &self,
        context: ContextHandle,
        device: DeviceId,
        source: &str,
        log_limit: usize,
    ) -> Result<ProgramHandle> {
        let mut registry = self.registry.write();
        let raw_device = registry
            .devices
            .get(&device.id())
            .map(|d| d.id())
            .ok_or_else(|| unknown(status::INVALID_DEVICE, device))?;
        let ctx = registry.contexts.get(&context.id()).ok_or_else(|| ComputeError::ProgramBuild {
            code: status::INVALID_CONTEXT,
            log: String::new(),
        })?;

        let mut program = Program::create_from_source(ctx, source).map_err(|err| ComputeError::ProgramBuild {
            code: err.0,
            log: err.to_string(),
        })?;
        if let Err(err) = program.build(&[raw_device], "") {
            let log = program.get_build_log(raw_device).unwrap_or_else(|e| e.to_string());
            // `program` drops here, releasing the partial build.
            return Err(ComputeError::program_build(err.0, log, log_limit));
        }

        let id = registry.next_id();
        registry.programs.insert(id, program);
        Ok(ProgramHandle::new(id))
    }

    fn create_kernel(&self, program: ProgramHandle, entry: &str) -> Result<KernelHandle> {
        let mut registry = self.registry.write();
        let prog = registry
            .programs
            .get(&program.id())
            .ok_or_else(|| unknown(status::INVALID_PROGRAM, program))?;
        let kernel = Kernel::create(prog, entry).map_err(|err| ComputeError::KernelNotFound {
            entry: entry.to_string(),
            code: err.0,
        })?;
        let id = registry.next_id();
        registry.kernels.insert(id, kernel);
        Ok(KernelHandle::new(id))
    }

    fn create_buffer(&self, context: ContextHandle, access: MemAccess, bytes: usize) -> Result<BufferHandle> {
        let mut registry = self.registry.write();
        let ctx = registry.contexts.get(&context.id()).ok_or(ComputeError::BufferCreation {
            bytes,
            code: status::INVALID_CONTEXT,
        })?;
        let flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        // SAFETY: no host pointer is supplied, the buffer owns device memory.
        let buffer = unsafe { Buffer::<cl_uchar>::create(ctx, flags, bytes, ptr::null_mut()) }
            .map_err(|err| ComputeError::BufferCreation { bytes, code: err.0 })?;
        let id = registry.next_id();
        registry.buffers.insert(id, buffer);
        Ok(BufferHandle::new(id))
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, buffer: BufferHandle) -> Result<()> {
        let registry = self.registry.read();
        let mem = registry
            .buffers
            .get(&buffer.id())
            .map(|b| b.get())
            .ok_or(ComputeError::KernelArgument {
                index,
                code: status::INVALID_MEM_OBJECT,
            })?;
        let kern = registry.kernels.get(&kernel.id()).ok_or(ComputeError::KernelArgument {
            index,
            code: status::INVALID_KERNEL,
        })?;
        // SAFETY: the argument is a live cl_mem owned by this backend.
        unsafe { kern.set_arg(index, &mem) }.map_err(|err| ComputeError::KernelArgument { index, code: err.0 })
    }

    unsafe fn enqueue_write(&self, queue: QueueHandle, buffer: BufferHandle, data: &[u8]) -> Result<EventHandle> {
        let fail = |code, message: String| ComputeError::Transfer {
            direction: TransferDirection::Upload,
            index: 0,
            code,
            message,
        };
        let mut registry = self.registry.write();
        let Registry { queues, buffers, .. } = &mut *registry;
        let q = queues
            .get(&queue.id())
            .ok_or_else(|| fail(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let buf = buffers
            .get_mut(&buffer.id())
            .ok_or_else(|| fail(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;
        // SAFETY: the caller keeps `data` alive until the event completes.
        let event = unsafe { q.enqueue_write_buffer(buf, CL_NON_BLOCKING, 0, data, &[]) }
            .map_err(|err| fail(err.0, err.to_string()))?;
        let id = registry.next_id();
        registry.events.insert(id, event);
        Ok(EventHandle::new(id))
    }

    unsafe fn enqueue_read(&self, queue: QueueHandle, buffer: BufferHandle, data: &mut [u8]) -> Result<EventHandle> {
        let fail = |code, message: String| ComputeError::Transfer {
            direction: TransferDirection::Download,
            index: 0,
            code,
            message,
        };
        let mut registry = self.registry.write();
        let q = registry
            .queues
            .get(&queue.id())
            .ok_or_else(|| fail(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let buf = registry
            .buffers
            .get(&buffer.id())
            .ok_or_else(|| fail(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;
        // SAFETY: the caller keeps `data` alive and untouched until the event completes.
        let event = unsafe { q.enqueue_read_buffer(buf, CL_NON_BLOCKING, 0, data, &[]) }
            .map_err(|err| fail(err.0, err.to_string()))?;
        let id = registry.next_id();
        registry.events.insert(id, event);
        Ok(EventHandle::new(id))
    }

    fn enqueue_kernel_2d(&self, queue: QueueHandle, kernel: KernelHandle, range: NdRange2) -> Result<EventHandle> {
        let fail = |code, message: String| ComputeError::Dispatch { code, message };
        let mut registry = self.registry.write();
        let q = registry
            .queues
            .get(&queue.id())
            .ok_or_else(|| fail(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let kern = registry
            .kernels
            .get(&kernel.id())
            .ok_or_else(|| fail(status::INVALID_KERNEL, format!("unknown {kernel}")))?;
        // SAFETY: both size arrays hold two elements matching work_dim.
        let event = unsafe {
            q.enqueue_nd_range_kernel(
                kern.get(),
                2,
                ptr::null(),
                range.global.as_ptr(),
                range.local.as_ptr(),
                &[],
            )
        }
        .map_err(|err| fail(err.0, err.to_string()))?;
        let id = registry.next_id();
        registry.events.insert(id, event);
        debug!(%range, "opencl dispatch enqueued");
        Ok(EventHandle::new(id))
    }

    fn wait_event(&self, event: EventHandle) -> Result<()> {
        let registry = self.registry.read();
        registry
            .events
            .get(&event.id())
            .ok_or_else(|| unknown(status::INVALID_EVENT, event))?
            .wait()
            .map_err(backend_error)
    }

    fn event_profile(&self, event: EventHandle) -> Result<EventProfile> {
        let registry = self.registry.read();
        let ev = registry
            .events
            .get(&event.id())
            .ok_or_else(|| unknown(status::INVALID_EVENT, event))?;
        let start_ns = ev.profiling_command_start().map_err(backend_error)?;
        let end_ns = ev.profiling_command_end().map_err(backend_error)?;
        Ok(EventProfile { start_ns, end_ns })
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        let registry = self.registry.read();
        registry
            .queues
            .get(&queue.id())
            .ok_or_else(|| unknown(status::INVALID_COMMAND_QUEUE, queue))?
            .finish()
            .map_err(backend_error)
    }

    fn release(&self, handle: ResourceHandle) -> Result<()> {
        let mut registry = self.registry.write();
        let removed = match handle {
            ResourceHandle::Context(h) => registry.contexts.remove(&h.id()).is_some(),
            ResourceHandle::Queue(h) => registry.queues.remove(&h.id()).is_some(),
            ResourceHandle::Program(h) => registry.programs.remove(&h.id()).is_some(),
            ResourceHandle::Kernel(h) => registry.kernels.remove(&h.id()).is_some(),
            ResourceHandle::Buffer(h) => registry.buffers.remove(&h.id()).is_some(),
            ResourceHandle::Event(h) => registry.events.remove(&h.id()).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(unknown(status::INVALID_VALUE, handle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_mapping_prefers_gpu_bit() {
        assert_eq!(class_of(CL_DEVICE_TYPE_GPU), DeviceClass::Gpu);
        assert_eq!(class_of(CL_DEVICE_TYPE_CPU), DeviceClass::Cpu);
        assert_eq!(class_of(CL_DEVICE_TYPE_ACCELERATOR), DeviceClass::Accelerator);
        assert_eq!(class_of(0), DeviceClass::Default);
    }

    #[test]
    fn test_discovery_does_not_panic_without_icd() {
        let backend = OpenClBackend::new();
        if let Ok(platforms) = backend.platforms() {
            for platform in platforms {
                for device in backend.platform_devices(platform).unwrap_or_default() {
                    let _ = backend.device_class(device);
                }
            }
        }
    }
}
