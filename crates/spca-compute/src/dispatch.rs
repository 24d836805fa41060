//! Serialized kernel enqueue
//!
//! The enqueue primitive is not assumed reentrant across queues, so every
//! session funnels `enqueue_kernel_2d` through one shared gateway.
//! [`DispatchGateway::global`] is the gateway of the process; a private one
//! from [`DispatchGateway::new`] only serializes the sessions it is handed to.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::trace;

use crate::backend::{ComputeBackend, EventHandle, KernelHandle, NdRange2, QueueHandle};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct DispatchGateway {
    lock: Mutex<u64>,
}

impl DispatchGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide gateway. Every call returns the same instance.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<DispatchGateway>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Enqueue a 2D dispatch while holding the gateway lock.
    pub fn enqueue(
        &self,
        backend: &dyn ComputeBackend,
        queue: QueueHandle,
        kernel: KernelHandle,
        range: NdRange2,
    ) -> Result<EventHandle> {
        let mut dispatched = self.lock.lock();
        let event = backend.enqueue_kernel_2d(queue, kernel, range)?;
        *dispatched += 1;
        trace!(%queue, %kernel, %range, total = *dispatched, "kernel enqueued");
        Ok(event)
    }

    /// Number of successful enqueues through this gateway.
    pub fn dispatched(&self) -> u64 {
        *self.lock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::backend::MemAccess;
    use crate::backends::host::HostBackend;
    use crate::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE};
    use crate::device::DeviceCatalog;

    #[test]
    fn test_concurrent_enqueues_are_counted() {
        let host = Arc::new(HostBackend::new());
        let device = DeviceCatalog::discover(host.as_ref()).devices()[0].id;
        let gateway = Arc::new(DispatchGateway::new());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let host = Arc::clone(&host);
                let gateway = Arc::clone(&gateway);
                thread::spawn(move || {
                    let ctx = host.create_context(device).unwrap();
                    let queue = host.create_queue(ctx, device).unwrap();
                    let program = host.build_program(ctx, device, BANDWIDTH_SOURCE, 256).unwrap();
                    let kernel = host.create_kernel(program, BANDWIDTH_ENTRY).unwrap();
                    let a = host.create_buffer(ctx, MemAccess::ReadOnly, 16 * 4).unwrap();
                    let b = host.create_buffer(ctx, MemAccess::ReadWrite, 16 * 4).unwrap();
                    host.set_kernel_arg(kernel, 0, a).unwrap();
                    host.set_kernel_arg(kernel, 1, b).unwrap();
                    for _ in 0..8 {
                        let event = gateway
                            .enqueue(host.as_ref(), queue, kernel, NdRange2::new([4, 4], [2, 2]))
                            .unwrap();
                        host.wait_event(event).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(gateway.dispatched(), 32);
    }

    #[test]
    fn test_global_gateway_is_one_instance() {
        let first = DispatchGateway::global();
        let second = DispatchGateway::global();
        assert!(Arc::ptr_eq(&first, &second));

        let private = Arc::new(DispatchGateway::new());
        assert!(!Arc::ptr_eq(&first, &private));
    }
}
