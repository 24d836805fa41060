//! Host/device matrix staging
//!
//! Upload writes each pushed matrix into the buffer of the matching IN
//! descriptor; download re-allocates one host matrix per OUT descriptor and
//! reads it back. Timed transfers wait on their own event and add its device
//! time. Untimed transfers stay in flight: upload hands the events back to
//! the caller, download drains the queue before returning.
//!
//! The first failing transfer aborts the pass. Anything already enqueued is
//! drained and its event released before the error is returned.

use spca_matrix::{IndexMatrix, MatrixMode};
use spca_tracing::performance::record_transfer;
use tracing::{debug, warn};

use crate::backend::{ComputeBackend, EventHandle, QueueHandle, ResourceHandle, TransferDirection};
use crate::error::{ComputeError, Result};
use crate::memory::{MemoryObjectDescriptor, MemoryObjectTable};
use crate::timing::TransferReport;

/// Result of an upload pass.
#[derive(Debug, Default)]
pub struct Staged {
    pub report: TransferReport,
    /// Events of untimed writes. The source matrices must stay alive until
    /// these complete; pass them to [`TransferEngine::settle`].
    pub pending: Vec<EventHandle>,
}

pub struct TransferEngine<'a> {
    backend: &'a dyn ComputeBackend,
    queue: QueueHandle,
    timed: bool,
}

impl<'a> TransferEngine<'a> {
    pub fn new(backend: &'a dyn ComputeBackend, queue: QueueHandle, timed: bool) -> Self {
        Self { backend, queue, timed }
    }

    /// Write `dataset[k]` into the buffer of the `k`-th IN descriptor.
    pub fn upload(&self, table: &MemoryObjectTable, dataset: &[IndexMatrix]) -> Result<Staged> {
        let expected = table.in_count();
        if dataset.len() != expected {
            return Err(ComputeError::IncompleteDataset {
                pushed: dataset.len(),
                expected,
            });
        }

        let mut staged = Staged::default();
        for ((index, descriptor), matrix) in table.inputs().zip(dataset) {
            if let Err(err) = self.write_one(index, descriptor, matrix, &mut staged) {
                self.abort(&mut staged.pending);
                return Err(err);
            }
        }

        debug!(
            transfers = staged.report.transfers,
            mib = %format!("{:.4}", staged.report.mib()),
            elapsed_ms = staged.report.elapsed_ms,
            "dataset uploaded"
        );
        Ok(staged)
    }

    fn write_one(
        &self,
        index: usize,
        descriptor: &MemoryObjectDescriptor,
        matrix: &IndexMatrix,
        staged: &mut Staged,
    ) -> Result<()> {
        if matrix.is_empty() || matrix.mode() != MatrixMode::Matrix2D || matrix.size_bytes() != descriptor.bytes {
            return Err(ComputeError::DatasetMismatch {
                index,
                expected_bytes: descriptor.bytes,
                actual_bytes: matrix.size_bytes(),
                mode: matrix.mode(),
            });
        }
        let buffer = descriptor
            .buffer()
            .ok_or(ComputeError::invalid_state("upload", "memory objects not created"))?;

        // SAFETY: `matrix` is borrowed from a dataset the caller keeps alive
        // until the event is waited on (timed) or settled (untimed).
        let event = unsafe { self.backend.enqueue_write(self.queue, buffer, matrix.as_bytes()) }
            .map_err(|err| at_index(err, index))?;
        self.account(event, index, descriptor.bytes, TransferDirection::Upload, &mut staged.report, &mut staged.pending)
    }

    /// Read every OUT descriptor into a freshly allocated host matrix, in
    /// declaration order.
    pub fn download(&self, table: &MemoryObjectTable) -> Result<(Vec<IndexMatrix>, TransferReport)> {
        let mut report = TransferReport::default();
        let mut pending = Vec::new();
        let mut results = Vec::with_capacity(table.out_count());

        for (index, descriptor) in table.outputs() {
            let mut matrix = IndexMatrix::new(MatrixMode::Matrix2D);
            let step = matrix
                .alloc(descriptor.width, descriptor.height, 0)
                .map_err(ComputeError::from)
                .and_then(|()| self.read_one(index, descriptor, &mut matrix, &mut report, &mut pending));
            if let Err(err) = step {
                // Destinations of reads already in flight are still in `results`.
                self.abort(&mut pending);
                return Err(err);
            }
            results.push(matrix);
        }

        if !pending.is_empty() {
            if let Err(err) = self.backend.finish(self.queue) {
                self.release_events(&mut pending);
                return Err(err);
            }
            self.release_events(&mut pending);
        }

        debug!(
            transfers = report.transfers,
            mib = %format!("{:.4}", report.mib()),
            elapsed_ms = report.elapsed_ms,
            "results downloaded"
        );
        Ok((results, report))
    }

    fn read_one(
        &self,
        index: usize,
        descriptor: &MemoryObjectDescriptor,
        matrix: &mut IndexMatrix,
        report: &mut TransferReport,
        pending: &mut Vec<EventHandle>,
    ) -> Result<()> {
        let buffer = descriptor
            .buffer()
            .ok_or(ComputeError::invalid_state("download", "memory objects not created"))?;
        // SAFETY: `matrix` is pushed into the result list, whose heap storage
        // does not move, and the queue is drained before the list is returned.
        let event = unsafe { self.backend.enqueue_read(self.queue, buffer, matrix.as_bytes_mut()) }
            .map_err(|err| at_index(err, index))?;
        self.account(event, index, descriptor.bytes, TransferDirection::Download, report, pending)
    }

    fn account(
        &self,
        event: EventHandle,
        index: usize,
        bytes: usize,
        direction: TransferDirection,
        report: &mut TransferReport,
        pending: &mut Vec<EventHandle>,
    ) -> Result<()> {
        report.transfers += 1;
        report.bytes += bytes;
        if !self.timed {
            pending.push(event);
            return Ok(());
        }

        let measured = self
            .backend
            .wait_event(event)
            .and_then(|()| self.backend.event_profile(event));
        self.release_event(event);
        let profile = measured.map_err(|err| at_index(err, index))?;

        let elapsed_ms = profile.duration_ms();
        report.elapsed_ms += elapsed_ms;
        record_transfer(bytes, direction.tag(), profile.duration_ns() / 1000);
        Ok(())
    }

    /// Wait for untimed writes and release their events.
    pub fn settle(&self, pending: &mut Vec<EventHandle>) -> Result<()> {
        let mut result = Ok(());
        for event in pending.iter().copied() {
            if let Err(err) = self.backend.wait_event(event) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        if result.is_err() {
            self.drain();
        }
        self.release_events(pending);
        result
    }

    fn abort(&self, pending: &mut Vec<EventHandle>) {
        self.drain();
        self.release_events(pending);
    }

    fn drain(&self) {
        if let Err(err) = self.backend.finish(self.queue) {
            warn!(queue = %self.queue, error = %err, "queue drain failed");
        }
    }

    fn release_events(&self, pending: &mut Vec<EventHandle>) {
        for event in pending.drain(..) {
            self.release_event(event);
        }
    }

    fn release_event(&self, event: EventHandle) {
        if let Err(err) = self.backend.release(ResourceHandle::Event(event)) {
            warn!(%event, error = %err, "event release failed");
        }
    }
}

fn at_index(err: ComputeError, index: usize) -> ComputeError {
    match err {
        ComputeError::Transfer {
            direction,
            code,
            message,
            ..
        } => ComputeError::Transfer {
            direction,
            index,
            code,
            message,
        },
        other => other,
    }
}
