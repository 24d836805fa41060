//! Device discovery and capability queries
//!
//! [`DeviceCatalog`] enumerates every platform and device once. Capability
//! lookups are free functions over a backend and a [`Device`]; they never
//! fail, a refused attribute reads as zero with a warning.

use tracing::{debug, error, warn};

use crate::backend::{ComputeBackend, DeviceAttribute, DeviceClass, DeviceId, DeviceText, PlatformId};

const MIB: u64 = 1024 * 1024;

/// One enumerated device. Immutable after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub platform: PlatformId,
    pub id: DeviceId,
    pub class: DeviceClass,
    /// True when the device class could be read at discovery.
    pub valid: bool,
}

/// Read-only result of device discovery.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    devices: Vec<Device>,
}

impl DeviceCatalog {
    /// Enumerate all platforms and their devices.
    ///
    /// Failures are logged and skipped; a platform whose device query fails
    /// contributes nothing, and an empty catalog is a valid outcome.
    pub fn discover(backend: &dyn ComputeBackend) -> Self {
        let platforms = match backend.platforms() {
            Ok(platforms) => platforms,
            Err(err) => {
                error!(backend = backend.name(), error = %err, "platform enumeration failed");
                return Self::default();
            }
        };

        let mut devices = Vec::new();
        for platform in platforms {
            match backend.platform_devices(platform) {
                Ok(found) => {
                    debug!(%platform, count = found.len(), "devices enumerated");
                    devices.extend(found.into_iter().map(|id| classify(backend, platform, id)));
                }
                Err(err) => {
                    error!(%platform, error = %err, "device enumeration failed");
                }
            }
        }

        if devices.is_empty() {
            warn!(backend = backend.name(), "no compute devices found");
        }
        Self { devices }
    }

    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn classify(backend: &dyn ComputeBackend, platform: PlatformId, id: DeviceId) -> Device {
    let (class, valid) = match backend.device_class(id) {
        Ok(class) => (class, true),
        Err(err) => {
            warn!(device = %id, error = %err, "device class query failed");
            (DeviceClass::Default, false)
        }
    };
    Device {
        platform,
        id,
        class,
        valid,
    }
}

fn query(backend: &dyn ComputeBackend, device: &Device, attribute: DeviceAttribute) -> u64 {
    match backend.device_attribute(device.id, attribute) {
        Ok(value) => value,
        Err(err) => {
            warn!(device = %device.id, attribute = attribute.label(), error = %err, "capability query refused");
            0
        }
    }
}

fn text(backend: &dyn ComputeBackend, device: &Device, field: DeviceText) -> String {
    backend.device_text(device.id, field).unwrap_or_else(|err| {
        warn!(device = %device.id, ?field, error = %err, "device text query refused");
        String::new()
    })
}

/// Max constant buffer size in bytes.
pub fn constbuffer(backend: &dyn ComputeBackend, device: &Device) -> u64 {
    query(backend, device, DeviceAttribute::MaxConstantBufferSize)
}

/// Max number of constant arguments.
pub fn constparams(backend: &dyn ComputeBackend, device: &Device) -> u64 {
    query(backend, device, DeviceAttribute::MaxConstantArgs)
}

/// Global memory size in bytes.
pub fn globalmemory(backend: &dyn ComputeBackend, device: &Device) -> u64 {
    query(backend, device, DeviceAttribute::GlobalMemSize)
}

/// Global memory cache size in bytes.
pub fn globalcache(backend: &dyn ComputeBackend, device: &Device) -> u64 {
    query(backend, device, DeviceAttribute::GlobalMemCacheSize)
}

/// Max clock frequency in MHz.
pub fn clockfrequency(backend: &dyn ComputeBackend, device: &Device) -> u64 {
    query(backend, device, DeviceAttribute::MaxClockFrequency)
}

/// Max work-group size (work items).
pub fn workgroup(backend: &dyn ComputeBackend, device: &Device) -> u64 {
    query(backend, device, DeviceAttribute::MaxWorkGroupSize)
}

/// Multi-line diagnostic description of a device.
pub fn format_device_info(backend: &dyn ComputeBackend, device: &Device) -> String {
    let platform = backend.platform_name(device.platform).unwrap_or_else(|err| {
        warn!(platform = %device.platform, error = %err, "platform name query refused");
        String::new()
    });
    let group = workgroup(backend, device);
    let edge = (group as f64).sqrt() as u64;

    format!(
        "\nplatform_model_name: {platform}\n\
         device_model_name: {}\n\
         device_vendor: {}\n\
         device_version: {}\n\
         device_profile: {}\n\
         const_buffer_size: {} MiB\n\
         const_param_max: {} Entry\n\
         global_memory_size: {} MiB\n\
         global_cahce_size: {} MiB\n\
         clock_frequency_max: {} MHz\n\
         working_group_max: {group} ({edge}x{edge})\n",
        text(backend, device, DeviceText::Name),
        text(backend, device, DeviceText::Vendor),
        text(backend, device, DeviceText::Version),
        text(backend, device, DeviceText::Profile),
        constbuffer(backend, device) / MIB,
        constparams(backend, device),
        globalmemory(backend, device) / MIB,
        globalcache(backend, device) / MIB,
        clockfrequency(backend, device),
    )
}
