//! Matrix compute session
//!
//! Drives one [`ResourceGroup`] through a fixed protocol:
//!
//! ```text
//! set_calc_device?  ──►  init_calc_system  ──►  push_matrix_attribute*
//!                                                      │
//!                                                      ▼
//!      read_result ◄── write_and_compute ◄── push_matrix_data* ◄── create_memory_objects
//! ```
//!
//! `alloc_workgroup` may be called at any point before a dispatch. Any
//! dispatch failure, or a failure to create memory objects, releases the
//! whole group and leaves the session permanently [`SessionState::Released`].

use std::fmt;
use std::mem;
use std::sync::Arc;

use spca_matrix::{IndexMatrix, MatrixMode};
use spca_tracing::perf_span;
use spca_tracing::performance::{bytes_to_mib, record_bandwidth, record_kernel_execution};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{ComputeBackend, EventHandle, NdRange2, ResourceHandle};
use crate::config::SessionConfig;
use crate::device::{format_device_info, Device, DeviceCatalog};
use crate::dispatch::DispatchGateway;
use crate::error::{ComputeError, Result};
use crate::memory::{Direction, MemoryObjectTable};
use crate::resource::{KernelSource, ResourceGroup};
use crate::timing::SessionTimers;
use crate::transfer::TransferEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device objects yet.
    Uninit,
    /// Context, queue, program and kernel built; accepting attributes.
    KernelReady,
    /// Memory objects created and bound; accepting data and dispatches.
    Executable,
    /// Torn down after a failure or an explicit release.
    Released,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninit => "uninit",
            Self::KernelReady => "kernel_ready",
            Self::Executable => "executable",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ComputeSession {
    backend: Arc<dyn ComputeBackend>,
    gateway: Arc<DispatchGateway>,
    catalog: DeviceCatalog,
    config: SessionConfig,
    state: SessionState,
    group: Option<ResourceGroup>,
    dataset: Vec<IndexMatrix>,
    entry: String,
    build_log: String,
    timers: SessionTimers,
}

impl ComputeSession {
    /// Session with default config on the process-wide dispatch gateway.
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self::with_config(backend, DispatchGateway::global(), SessionConfig::default())
    }

    /// Discover devices on `backend` and prepare a session.
    ///
    /// An out-of-range `config.device_index` falls back to 0 with a warning.
    pub fn with_config(backend: Arc<dyn ComputeBackend>, gateway: Arc<DispatchGateway>, config: SessionConfig) -> Self {
        let catalog = DeviceCatalog::discover(backend.as_ref());
        Self::with_catalog(backend, gateway, catalog, config)
    }

    /// Prepare a session over an existing catalog.
    pub fn with_catalog(
        backend: Arc<dyn ComputeBackend>,
        gateway: Arc<DispatchGateway>,
        catalog: DeviceCatalog,
        mut config: SessionConfig,
    ) -> Self {
        if config.device_index >= catalog.len() && config.device_index != 0 {
            warn!(index = config.device_index, available = catalog.len(), "configured device out of range, using 0");
            config.device_index = 0;
        }
        if config.workgroup.iter().any(|d| *d <= 1) {
            warn!(x = config.workgroup[0], y = config.workgroup[1], "configured work-group rejected, using 2x2");
            config.workgroup = crate::config::DEFAULT_WORKGROUP;
        }
        debug!(backend = backend.name(), devices = catalog.len(), "compute session created");
        Self {
            backend,
            gateway,
            catalog,
            config,
            state: SessionState::Uninit,
            group: None,
            dataset: Vec::new(),
            entry: String::new(),
            build_log: String::new(),
            timers: SessionTimers::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn devices(&self) -> &[Device] {
        self.catalog.devices()
    }

    /// Diagnostic description of catalog device `index`.
    pub fn device_info(&self, index: usize) -> Result<String> {
        let device = self.catalog.get(index).ok_or(ComputeError::DeviceIndexOutOfRange {
            index,
            available: self.catalog.len(),
        })?;
        Ok(format_device_info(self.backend.as_ref(), device))
    }

    /// Selected catalog index.
    pub fn device_index(&self) -> usize {
        self.config.device_index
    }

    pub fn workgroup(&self) -> [usize; 2] {
        self.config.workgroup
    }

    /// Compiler output of the last failed build, bounded to the configured limit.
    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    pub fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    /// Matrices pushed since the last dispatch.
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn memory(&self) -> Option<&MemoryObjectTable> {
        self.group.as_ref().map(ResourceGroup::memory)
    }

    pub fn resources(&self) -> Option<&ResourceGroup> {
        self.group.as_ref()
    }

    pub fn gateway(&self) -> &Arc<DispatchGateway> {
        &self.gateway
    }

    fn require(&self, operation: &'static str, state: SessionState) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(ComputeError::invalid_state(operation, self.state.as_str()))
        }
    }

    /// Select the catalog device bound by [`Self::init_calc_system`].
    ///
    /// Out-of-range indices leave the selection unchanged.
    pub fn set_calc_device(&mut self, index: usize) -> Result<()> {
        self.require("set_calc_device", SessionState::Uninit)?;
        if index >= self.catalog.len() {
            warn!(
                index,
                available = self.catalog.len(),
                current = self.config.device_index,
                "device index out of range, selection unchanged"
            );
            return Err(ComputeError::DeviceIndexOutOfRange {
                index,
                available: self.catalog.len(),
            });
        }
        self.config.device_index = index;
        debug!(index, "calc device selected");
        Ok(())
    }

    /// Set the local work-group shape. Both sides must exceed 1; a rejected
    /// shape keeps the previous one.
    pub fn alloc_workgroup(&mut self, x: usize, y: usize) -> Result<()> {
        if x <= 1 || y <= 1 {
            let [px, py] = self.config.workgroup;
            warn!(x, y, "work-group rejected, keeping {px}x{py}");
            return Err(ComputeError::InvalidWorkgroup { x, y });
        }
        self.config.workgroup = [x, y];
        debug!(x, y, "work-group set");
        Ok(())
    }

    /// Build context, queue, program and kernel on the selected device.
    pub fn init_calc_system(&mut self, source: KernelSource, entry: &str) -> Result<()> {
        self.require("init_calc_system", SessionState::Uninit)?;
        let index = self.config.device_index;
        let device = *self.catalog.get(index).ok_or(ComputeError::DeviceIndexOutOfRange {
            index,
            available: self.catalog.len(),
        })?;
        if !device.valid {
            warn!(index, device = %device.id, "binding device with unknown class");
        }

        let _span = perf_span!("init_calc_system", device = index);
        match ResourceGroup::initialize(
            Arc::clone(&self.backend),
            device,
            &source,
            entry,
            self.config.build_log_limit,
        ) {
            Ok(group) => {
                self.group = Some(group);
                self.entry = entry.to_string();
                self.build_log.clear();
                self.state = SessionState::KernelReady;
                info!(index, entry, class = %device.class, "calc system ready");
                Ok(())
            }
            Err(err) => {
                if let ComputeError::ProgramBuild { log, .. } = &err {
                    self.build_log = log.clone();
                }
                error!(index, entry, error = %err, "calc system init failed");
                Err(err)
            }
        }
    }

    /// Declare the next memory object. Returns its kernel-argument index.
    pub fn push_matrix_attribute(&mut self, width: usize, height: usize, direction: Direction) -> Result<usize> {
        self.require("push_matrix_attribute", SessionState::KernelReady)?;
        let group = self
            .group
            .as_mut()
            .ok_or(ComputeError::invalid_state("push_matrix_attribute", "released"))?;
        group.memory_mut().push(width, height, direction)
    }

    /// Allocate every declared buffer and bind it at its argument index.
    pub fn create_memory_objects(&mut self) -> Result<()> {
        self.require("create_memory_objects", SessionState::KernelReady)?;
        let group = self
            .group
            .as_mut()
            .ok_or(ComputeError::invalid_state("create_memory_objects", "released"))?;
        if let Err(err) = group.create_memory_objects() {
            error!(error = %err, "memory object creation failed");
            self.teardown();
            return Err(err);
        }
        self.state = SessionState::Executable;
        Ok(())
    }

    /// Queue a copy of `matrix` for the next unfilled IN descriptor.
    ///
    /// Rejected without changing the dataset when every IN descriptor is
    /// already filled, or when the matrix is not 2D with the descriptor's size.
    pub fn push_matrix_data(&mut self, matrix: &IndexMatrix) -> Result<()> {
        self.require("push_matrix_data", SessionState::Executable)?;
        let table = self
            .memory()
            .ok_or(ComputeError::invalid_state("push_matrix_data", "released"))?;

        let capacity = table.in_count();
        let Some((index, descriptor)) = table.inputs().nth(self.dataset.len()) else {
            warn!(capacity, "input dataset full, push rejected");
            return Err(ComputeError::DatasetFull { capacity });
        };
        if matrix.mode() != MatrixMode::Matrix2D || matrix.size_bytes() != descriptor.bytes {
            let err = ComputeError::DatasetMismatch {
                index,
                expected_bytes: descriptor.bytes,
                actual_bytes: matrix.size_bytes(),
                mode: matrix.mode(),
            };
            warn!(error = %err, "push rejected");
            return Err(err);
        }

        self.dataset.push(matrix.clone());
        trace!(index, pushed = self.dataset.len(), capacity, "matrix queued");
        Ok(())
    }

    /// Upload the dataset, dispatch over `global_x × global_y` and wait.
    ///
    /// An upload failure keeps the dataset for another attempt. A dispatch
    /// failure releases every device object.
    pub fn write_and_compute(&mut self, global_x: usize, global_y: usize) -> Result<()> {
        self.require("write_and_compute", SessionState::Executable)?;
        let (Some(queue), Some(kernel)) = (
            self.group.as_ref().and_then(ResourceGroup::queue),
            self.group.as_ref().and_then(ResourceGroup::kernel),
        ) else {
            return Err(ComputeError::invalid_state("write_and_compute", "released"));
        };
        let _span = perf_span!("write_and_compute", global_x = global_x, global_y = global_y);
        let engine = TransferEngine::new(self.backend.as_ref(), queue, self.config.timed_transfers);

        let staged = {
            let table = self
                .memory()
                .ok_or(ComputeError::invalid_state("write_and_compute", "released"))?;
            let total: usize = self.dataset.iter().map(IndexMatrix::size_bytes).sum();
            trace!("input dataset (total)size: {:.4} mib", bytes_to_mib(total));
            match engine.upload(table, &self.dataset) {
                Ok(staged) => staged,
                Err(err) => {
                    error!(error = %err, "dataset upload failed");
                    return Err(err);
                }
            }
        };
        let mut pending = staged.pending;
        let in_flight = mem::take(&mut self.dataset);

        let threshold = self.config.bandwidth_threshold_mib;
        self.timers.upload_ms = staged.report.elapsed_ms;
        self.timers.upload_bytes = staged.report.bytes;
        self.timers.upload_mib_s = staged.report.bandwidth_mib_s(threshold);
        if self.timers.upload_mib_s > 0.0 {
            record_bandwidth("upload", staged.report.mib(), staged.report.elapsed_ms, self.timers.upload_mib_s);
        }

        let range = NdRange2::new([global_x, global_y], self.config.workgroup);
        let outcome = self
            .gateway
            .enqueue(self.backend.as_ref(), queue, kernel, range)
            .and_then(|event| self.collect_dispatch(event));

        let settled = engine.settle(&mut pending);
        drop(in_flight);

        let kernel_ms = match outcome.and_then(|ms| settled.map(|()| ms)) {
            Ok(ms) => ms,
            Err(err) => {
                error!(%range, error = %err, "kernel dispatch failed, releasing device objects");
                self.teardown();
                return Err(err);
            }
        };

        self.timers.kernel_time_ms = kernel_ms;
        record_kernel_execution(&self.entry, range.global, range.local, kernel_ms);
        debug!(%range, kernel_ms, "compute round complete");
        Ok(())
    }

    fn collect_dispatch(&self, event: EventHandle) -> Result<f64> {
        let measured = self
            .backend
            .wait_event(event)
            .and_then(|()| self.backend.event_profile(event));
        if let Err(err) = self.backend.release(ResourceHandle::Event(event)) {
            warn!(%event, error = %err, "event release failed");
        }
        Ok(measured?.duration_ms())
    }

    /// Download every OUT descriptor, in declaration order.
    pub fn read_result(&mut self) -> Result<Vec<IndexMatrix>> {
        self.require("read_result", SessionState::Executable)?;
        let group = self
            .group
            .as_ref()
            .ok_or(ComputeError::invalid_state("read_result", "released"))?;
        let queue = group
            .queue()
            .ok_or(ComputeError::invalid_state("read_result", "released"))?;
        let engine = TransferEngine::new(self.backend.as_ref(), queue, self.config.timed_transfers);

        let (results, report) = match engine.download(group.memory()) {
            Ok(done) => done,
            Err(err) => {
                error!(error = %err, "result download failed");
                return Err(err);
            }
        };

        self.timers.download_ms = report.elapsed_ms;
        self.timers.download_bytes = report.bytes;
        self.timers.download_mib_s = report.bandwidth_mib_s(self.config.bandwidth_threshold_mib);
        if self.timers.download_mib_s > 0.0 {
            record_bandwidth("download", report.mib(), report.elapsed_ms, self.timers.download_mib_s);
        }
        Ok(results)
    }

    /// Release every device object. The session cannot be reused.
    pub fn release(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.dataset.clear();
        if let Some(mut group) = self.group.take() {
            group.release();
        }
        self.state = SessionState::Released;
    }
}

impl fmt::Debug for ComputeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeSession")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("config", &self.config)
            .field("devices", &self.catalog.len())
            .field("dataset", &self.dataset.len())
            .field("group", &self.group)
            .finish()
    }
}
