//! Simulated platforms and devices for the host backend

use std::collections::HashMap;

use crate::backend::{DeviceAttribute, DeviceClass};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HostDevice {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub class: DeviceClass,
    attributes: HashMap<DeviceAttribute, u64>,
}

impl HostDevice {
    /// A CPU device with a 1024-item work-group limit.
    pub fn cpu(name: impl Into<String>) -> Self {
        let attributes = HashMap::from([
            (DeviceAttribute::MaxWorkGroupSize, 1024),
            (DeviceAttribute::GlobalMemSize, 8192 * MIB),
            (DeviceAttribute::GlobalMemCacheSize, 32 * MIB),
            (DeviceAttribute::MaxClockFrequency, 3000),
            (DeviceAttribute::MaxConstantBufferSize, 64 * 1024),
            (DeviceAttribute::MaxConstantArgs, 8),
        ]);
        Self {
            name: name.into(),
            vendor: "starry-pca".to_string(),
            version: "OpenCL 3.0 host".to_string(),
            profile: "FULL_PROFILE".to_string(),
            class: DeviceClass::Cpu,
            attributes,
        }
    }

    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_attribute(mut self, attribute: DeviceAttribute, value: u64) -> Self {
        self.attributes.insert(attribute, value);
        self
    }

    /// Make the device refuse to report `attribute`.
    pub fn without_attribute(mut self, attribute: DeviceAttribute) -> Self {
        self.attributes.remove(&attribute);
        self
    }

    pub fn attribute(&self, attribute: DeviceAttribute) -> Option<u64> {
        self.attributes.get(&attribute).copied()
    }
}

#[derive(Debug, Clone)]
pub struct HostPlatform {
    pub name: String,
    pub devices: Vec<HostDevice>,
}

impl HostPlatform {
    pub fn new(name: impl Into<String>, devices: Vec<HostDevice>) -> Self {
        Self {
            name: name.into(),
            devices,
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new("Starry Host Platform", vec![HostDevice::cpu("Host CPU (rayon)")])
    }
}
