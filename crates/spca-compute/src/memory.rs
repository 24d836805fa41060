//! Ordered memory-object descriptors
//!
//! Declaration order is kernel-argument order: descriptor `i` is bound at
//! argument index `i`. The IN subsequence pairs with pushed host matrices,
//! the OUT subsequence with the matrices returned by a result read.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spca_matrix::ELEMENT_SIZE;
use tracing::{debug, trace, warn};

use crate::backend::{BufferHandle, ComputeBackend, ContextHandle, KernelHandle, MemAccess};
use crate::error::{ComputeError, Result};
use crate::resource::Owned;

/// Transfer direction of a memory object, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device; device read-only.
    In,
    /// Device to host; device read-write.
    Out,
}

impl Direction {
    pub fn access(self) -> MemAccess {
        match self {
            Self::In => MemAccess::ReadOnly,
            Self::Out => MemAccess::ReadWrite,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("In"),
            Self::Out => f.write_str("Out"),
        }
    }
}

#[derive(Debug)]
pub struct MemoryObjectDescriptor {
    pub direction: Direction,
    pub width: usize,
    pub height: usize,
    /// `width × height × 4`
    pub bytes: usize,
    buffer: Option<Owned<BufferHandle>>,
}

impl MemoryObjectDescriptor {
    fn new(width: usize, height: usize, direction: Direction) -> Result<Self> {
        let bytes = width
            .checked_mul(height)
            .and_then(|elements| elements.checked_mul(ELEMENT_SIZE))
            .ok_or(ComputeError::InvalidAttribute { width, height })?;
        Ok(Self {
            direction,
            width,
            height,
            bytes,
            buffer: None,
        })
    }

    /// Device buffer, once materialized.
    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer.as_ref().map(Owned::get)
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectTable {
    descriptors: Vec<MemoryObjectDescriptor>,
    out_count: usize,
}

impl MemoryObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor and return its argument index.
    ///
    /// A zero-sized descriptor is accepted with a warning. Dimensions whose
    /// byte size overflows `usize` are rejected and nothing is appended.
    pub fn push(&mut self, width: usize, height: usize, direction: Direction) -> Result<usize> {
        let descriptor = MemoryObjectDescriptor::new(width, height, direction)?;
        if descriptor.bytes == 0 {
            warn!(width, height, %direction, "memory object declared with zero size");
        }
        if direction == Direction::Out {
            self.out_count += 1;
        }
        self.descriptors.push(descriptor);
        Ok(self.descriptors.len() - 1)
    }

    pub fn descriptors(&self) -> &[MemoryObjectDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, index: usize) -> Option<&MemoryObjectDescriptor> {
        self.descriptors.get(index)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn in_count(&self) -> usize {
        self.descriptors.len() - self.out_count
    }

    pub fn out_count(&self) -> usize {
        self.out_count
    }

    /// IN descriptors with their argument index, in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = (usize, &MemoryObjectDescriptor)> {
        self.by_direction(Direction::In)
    }

    /// OUT descriptors with their argument index, in declaration order.
    pub fn outputs(&self) -> impl Iterator<Item = (usize, &MemoryObjectDescriptor)> {
        self.by_direction(Direction::Out)
    }

    fn by_direction(&self, direction: Direction) -> impl Iterator<Item = (usize, &MemoryObjectDescriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .filter(move |(_, d)| d.direction == direction)
    }

    /// Total declared bytes of one direction.
    pub fn total_bytes(&self, direction: Direction) -> usize {
        self.by_direction(direction).map(|(_, d)| d.bytes).sum()
    }

    pub fn is_materialized(&self) -> bool {
        !self.descriptors.is_empty() && self.descriptors.iter().all(|d| d.buffer.is_some())
    }

    /// Allocate one buffer per descriptor and bind it at the descriptor's
    /// index. On failure the buffers created so far are released.
    pub(crate) fn materialize(
        &mut self,
        backend: &Arc<dyn ComputeBackend>,
        context: ContextHandle,
        kernel: KernelHandle,
    ) -> Result<()> {
        let result = self.try_materialize(backend, context, kernel);
        if result.is_err() {
            self.release_buffers();
        }
        result
    }

    fn try_materialize(
        &mut self,
        backend: &Arc<dyn ComputeBackend>,
        context: ContextHandle,
        kernel: KernelHandle,
    ) -> Result<()> {
        for (index, descriptor) in self.descriptors.iter_mut().enumerate() {
            let buffer = backend.create_buffer(context, descriptor.direction.access(), descriptor.bytes)?;
            let owned = Owned::new(Arc::clone(backend), buffer);
            backend.set_kernel_arg(kernel, index as u32, buffer)?;
            descriptor.buffer = Some(owned);
            trace!("{}({index}) {buffer} {} bytes", descriptor.direction, descriptor.bytes);
        }
        debug!(count = self.descriptors.len(), "memory objects created");
        Ok(())
    }

    /// Drop every device buffer in declaration order. Returns how many were held.
    pub(crate) fn release_buffers(&mut self) -> usize {
        let mut released = 0;
        for descriptor in &mut self.descriptors {
            if descriptor.buffer.take().is_some() {
                released += 1;
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::host::{HostBackend, HostStep};
    use crate::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE};
    use crate::device::DeviceCatalog;
    use crate::resource::{KernelSource, ResourceGroup};

    fn group(host: &Arc<HostBackend>) -> ResourceGroup {
        let device = DeviceCatalog::discover(host.as_ref()).devices()[0];
        ResourceGroup::initialize(
            host.clone(),
            device,
            &KernelSource::inline(BANDWIDTH_SOURCE),
            BANDWIDTH_ENTRY,
            1024,
        )
        .unwrap()
    }

    #[test]
    fn test_counts_and_subsequences() {
        let mut table = MemoryObjectTable::new();
        assert_eq!(table.push(2, 3, Direction::In).unwrap(), 0);
        assert_eq!(table.push(4, 4, Direction::Out).unwrap(), 1);
        assert_eq!(table.push(1, 1, Direction::In).unwrap(), 2);

        assert_eq!(table.in_count(), 2);
        assert_eq!(table.out_count(), 1);
        assert_eq!(table.get(0).unwrap().bytes, 24);
        assert_eq!(table.inputs().map(|(i, _)| i).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(table.outputs().map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
        assert_eq!(table.total_bytes(Direction::In), 28);
        assert!(!table.is_materialized());
    }

    #[test]
    fn test_overflowing_size_rejected() {
        let mut table = MemoryObjectTable::new();
        let err = table.push(usize::MAX / 2, 3, Direction::In).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidAttribute { height: 3, .. }));
        assert!(table.push(usize::MAX / 4, 2, Direction::Out).is_err());
        assert!(table.is_empty());
        assert_eq!(table.out_count(), 0);
    }

    #[test]
    fn test_zero_size_descriptor_accepted() {
        let mut table = MemoryObjectTable::new();
        table.push(0, 8, Direction::In).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().bytes, 0);
    }

    #[test]
    fn test_materialize_binds_access_by_direction() {
        let host = Arc::new(HostBackend::new());
        let mut group = group(&host);
        group.memory_mut().push(8, 8, Direction::In).unwrap();
        group.memory_mut().push(8, 8, Direction::Out).unwrap();
        group.create_memory_objects().unwrap();

        let table = group.memory();
        assert!(table.is_materialized());
        let first = table.get(0).unwrap().buffer().unwrap();
        let second = table.get(1).unwrap().buffer().unwrap();
        assert_eq!(host.buffer_access(first), Some(MemAccess::ReadOnly));
        assert_eq!(host.buffer_access(second), Some(MemAccess::ReadWrite));
    }

    #[test]
    fn test_failed_binding_releases_created_buffers() {
        let host = Arc::new(HostBackend::new());
        let mut group = group(&host);
        group.memory_mut().push(8, 8, Direction::In).unwrap();
        group.memory_mut().push(8, 8, Direction::Out).unwrap();
        host.inject_fault(HostStep::SetKernelArg, 1);

        assert!(group.create_memory_objects().is_err());
        assert_eq!(host.live_resources().buffers, 0);
        assert!(!group.memory().is_materialized());
    }
}
