//! Handles and plain data exchanged with a [`super::ComputeBackend`]

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                $name(id)
            }

            pub const fn id(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// A compute platform (driver/vendor runtime)
    PlatformId,
    "platform"
);
handle_type!(
    /// A device on a platform
    DeviceId,
    "device"
);
handle_type!(ContextHandle, "ctx");
handle_type!(
    /// In-order command queue with profiling enabled
    QueueHandle,
    "queue"
);
handle_type!(ProgramHandle, "prog");
handle_type!(KernelHandle, "kernel");
handle_type!(BufferHandle, "buf");
handle_type!(
    /// Completion event of one enqueued command
    EventHandle,
    "event"
);

/// Any releasable backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Context(ContextHandle),
    Queue(QueueHandle),
    Program(ProgramHandle),
    Kernel(KernelHandle),
    Buffer(BufferHandle),
    Event(EventHandle),
}

impl ResourceHandle {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Context(_) => ResourceKind::Context,
            Self::Queue(_) => ResourceKind::Queue,
            Self::Program(_) => ResourceKind::Program,
            Self::Kernel(_) => ResourceKind::Kernel,
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Event(_) => ResourceKind::Event,
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(h) => fmt::Display::fmt(h, f),
            Self::Queue(h) => fmt::Display::fmt(h, f),
            Self::Program(h) => fmt::Display::fmt(h, f),
            Self::Kernel(h) => fmt::Display::fmt(h, f),
            Self::Buffer(h) => fmt::Display::fmt(h, f),
            Self::Event(h) => fmt::Display::fmt(h, f),
        }
    }
}

macro_rules! impl_into_resource {
    ($($handle:ident => $variant:ident),+ $(,)?) => {
        $(
            impl From<$handle> for ResourceHandle {
                fn from(handle: $handle) -> Self {
                    ResourceHandle::$variant(handle)
                }
            }
        )+
    };
}

impl_into_resource!(
    ContextHandle => Context,
    QueueHandle => Queue,
    ProgramHandle => Program,
    KernelHandle => Kernel,
    BufferHandle => Buffer,
    EventHandle => Event,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
    Event,
}

/// Device class as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
    Default,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "CPU",
            Self::Gpu => "GPU",
            Self::Accelerator => "ACCELERATOR",
            Self::Default => "DEFAULT",
        };
        f.write_str(name)
    }
}

/// Fixed numeric capability attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAttribute {
    MaxWorkGroupSize,
    GlobalMemSize,
    GlobalMemCacheSize,
    MaxClockFrequency,
    MaxConstantBufferSize,
    MaxConstantArgs,
}

impl DeviceAttribute {
    pub const ALL: [DeviceAttribute; 6] = [
        Self::MaxWorkGroupSize,
        Self::GlobalMemSize,
        Self::GlobalMemCacheSize,
        Self::MaxClockFrequency,
        Self::MaxConstantBufferSize,
        Self::MaxConstantArgs,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::MaxWorkGroupSize => "work_group",
            Self::GlobalMemSize => "global_memory",
            Self::GlobalMemCacheSize => "global_cache",
            Self::MaxClockFrequency => "clock_frequency",
            Self::MaxConstantBufferSize => "const_buffer",
            Self::MaxConstantArgs => "const_params",
        }
    }
}

/// Descriptive device strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceText {
    Name,
    Vendor,
    Version,
    Profile,
}

/// Device-side access granted to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemAccess {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Host to device
    Upload,
    /// Device to host
    Download,
}

impl TransferDirection {
    /// Short tag used in performance events.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Upload => "H2D",
            Self::Download => "D2H",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
        }
    }
}

/// 2D index space for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NdRange2 {
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl NdRange2 {
    pub const fn new(global: [usize; 2], local: [usize; 2]) -> Self {
        Self { global, local }
    }

    pub const fn work_items(&self) -> usize {
        self.global[0] * self.global[1]
    }

    pub const fn group_size(&self) -> usize {
        self.local[0] * self.local[1]
    }
}

impl fmt::Display for NdRange2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "global {}x{} local {}x{}",
            self.global[0], self.global[1], self.local[0], self.local[1]
        )
    }
}

/// Device-clock timestamps of a completed command, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventProfile {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl EventProfile {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ns() as f64 / 1_000_000.0
    }
}

/// Native status codes shared by the backends (OpenCL numbering).
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_PLATFORM: i32 = -32;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_CONTEXT: i32 = -34;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_PROGRAM: i32 = -44;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_KERNEL: i32 = -48;
    pub const INVALID_ARG_INDEX: i32 = -49;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_EVENT: i32 = -58;
    pub const INVALID_OPERATION: i32 = -59;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const PROFILING_INFO_NOT_AVAILABLE: i32 = -7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(BufferHandle::new(7).to_string(), "buf7");
        assert_eq!(ResourceHandle::from(QueueHandle::new(2)).to_string(), "queue2");
        assert_eq!(ResourceHandle::from(EventHandle::new(1)).kind(), ResourceKind::Event);
    }

    #[test]
    fn test_event_profile_duration() {
        let profile = EventProfile {
            start_ns: 1_000,
            end_ns: 2_501_000,
        };
        assert_eq!(profile.duration_ns(), 2_500_000);
        assert!((profile.duration_ms() - 2.5).abs() < 1e-12);

        let reversed = EventProfile { start_ns: 10, end_ns: 5 };
        assert_eq!(reversed.duration_ns(), 0);
    }

    #[test]
    fn test_nd_range_sizes() {
        let range = NdRange2::new([64, 32], [8, 4]);
        assert_eq!(range.work_items(), 2048);
        assert_eq!(range.group_size(), 32);
        assert_eq!(range.to_string(), "global 64x32 local 8x4");
    }
}
