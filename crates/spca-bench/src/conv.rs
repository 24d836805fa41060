//! FP32 convolution and bandwidth runs

use std::sync::Arc;

use serde::Serialize;
use spca_compute::device::{format_device_info, workgroup};
use spca_compute::kernels::{BANDWIDTH_ENTRY, BANDWIDTH_SOURCE, CONV_FP32_ENTRY, CONV_FP32_SOURCE};
use spca_compute::{
    ComputeBackend, ComputeSession, DeviceCatalog, DeviceClass, Direction, DispatchGateway, KernelSource,
    SessionConfig,
};
use spca_matrix::IndexMatrix;
use spca_tracing::performance::record_flops;
use tracing::{debug, info};

use crate::config::BenchmarkConfig;
use crate::error::{BenchError, Result};
use crate::report::{gflops, BenchmarkResult};

/// One catalog entry for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub index: usize,
    pub class: DeviceClass,
    pub valid: bool,
    pub description: String,
}

/// Describe every device the backend reports.
pub fn list_devices(backend: &dyn ComputeBackend) -> Vec<DeviceSummary> {
    DeviceCatalog::discover(backend)
        .devices()
        .iter()
        .enumerate()
        .map(|(index, device)| DeviceSummary {
            index,
            class: device.class,
            valid: device.valid,
            description: format_device_info(backend, device),
        })
        .collect()
}

/// Largest square edge not above `sqrt(max_group)` that divides both global
/// extents. `None` when no edge above 1 fits.
pub fn workgroup_edge(max_group: u64, global: [usize; 2]) -> Option<usize> {
    let limit = (max_group as f64).sqrt() as usize;
    (2..=limit).rev().find(|edge| global[0] % edge == 0 && global[1] % edge == 0)
}

pub struct BenchmarkConvFp32 {
    backend: Arc<dyn ComputeBackend>,
    gateway: Arc<DispatchGateway>,
    catalog: DeviceCatalog,
    config: BenchmarkConfig,
    session_config: SessionConfig,
    result: BenchmarkResult,
}

impl BenchmarkConvFp32 {
    /// Discover devices and log a description of each.
    pub fn new(backend: Arc<dyn ComputeBackend>, config: BenchmarkConfig) -> Self {
        let catalog = DeviceCatalog::discover(backend.as_ref());
        for (index, device) in catalog.devices().iter().enumerate() {
            debug!("device count {index}:");
            info!("device information: {}", format_device_info(backend.as_ref(), device));
        }
        Self {
            backend,
            gateway: DispatchGateway::global(),
            catalog,
            config,
            session_config: SessionConfig::default(),
            result: BenchmarkResult::default(),
        }
    }

    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn result(&self) -> &BenchmarkResult {
        &self.result
    }

    fn session(&self, source: &str, entry: &str, global: [usize; 2]) -> Result<ComputeSession> {
        if self.catalog.is_empty() {
            return Err(BenchError::NoDevices);
        }
        let mut session = ComputeSession::with_catalog(
            Arc::clone(&self.backend),
            Arc::clone(&self.gateway),
            self.catalog.clone(),
            self.session_config.clone(),
        );
        let device = self
            .catalog
            .get(session.device_index())
            .ok_or(BenchError::NoDevices)?;
        if let Some(edge) = workgroup_edge(workgroup(self.backend.as_ref(), device), global) {
            session.alloc_workgroup(edge, edge)?;
        }
        session.init_calc_system(KernelSource::inline(source), entry)?;
        Ok(session)
    }

    /// Convolve the data matrix with two kernels and record GFLOPS.
    pub fn run_conv(&mut self) -> Result<()> {
        let BenchmarkConfig {
            data_size: [dx, dy],
            conv_size: [cx, cy],
            params_size: [px, py],
            ..
        } = self.config;

        let data = IndexMatrix::zeros_2d(dx, dy)?;
        let conv_a = IndexMatrix::zeros_2d(cx, cy)?;
        let conv_b = IndexMatrix::zeros_2d(cx, cy)?;
        let mut params = IndexMatrix::zeros_2d(px, py)?;
        for slot in params.as_mut_slice().iter_mut().take(2) {
            *slot = cx as f32;
        }

        let mut session = self.session(CONV_FP32_SOURCE, CONV_FP32_ENTRY, [dx, dy])?;
        session.push_matrix_attribute(dx, dy, Direction::In)?;
        session.push_matrix_attribute(cx, cy, Direction::In)?;
        session.push_matrix_attribute(cx, cy, Direction::In)?;
        session.push_matrix_attribute(px, py, Direction::In)?;
        session.push_matrix_attribute(dx, dy, Direction::Out)?;
        session.create_memory_objects()?;

        for matrix in [&data, &conv_a, &conv_b, &params] {
            session.push_matrix_data(matrix)?;
        }
        session.write_and_compute(dx, dy)?;
        drop(session.read_result()?);

        let time_ms = session.timers().kernel_time_ms;
        let flops = self.config.conv_flops();
        self.result.calculate_time_ms = time_ms;
        self.result.calculate_gflops = gflops(flops, time_ms);
        record_flops("conv_fp32", flops, (time_ms * 1000.0) as u64);
        info!(time_ms, gflops = self.result.calculate_gflops, "convolution run complete");
        Ok(())
    }

    /// Copy one large matrix through the device and record transfer rates.
    pub fn run_bandwidth(&mut self) -> Result<()> {
        let [bx, by] = self.config.bandwidth_size;
        let data = IndexMatrix::zeros_2d(bx, by)?;

        let mut session = self.session(BANDWIDTH_SOURCE, BANDWIDTH_ENTRY, [bx, by])?;
        session.push_matrix_attribute(bx, by, Direction::In)?;
        session.push_matrix_attribute(bx, by, Direction::Out)?;
        session.create_memory_objects()?;

        session.push_matrix_data(&data)?;
        session.write_and_compute(bx, by)?;
        drop(session.read_result()?);

        let timers = session.timers();
        self.result.upload_mib_s = timers.upload_mib_s;
        self.result.download_mib_s = timers.download_mib_s;
        info!(
            upload_mib_s = timers.upload_mib_s,
            download_mib_s = timers.download_mib_s,
            "bandwidth run complete"
        );
        Ok(())
    }

    pub fn run_all(&mut self) -> Result<&BenchmarkResult> {
        self.run_conv()?;
        self.run_bandwidth()?;
        Ok(&self.result)
    }

    /// Log the text report.
    pub fn print_result(&self) {
        debug!("benchmark results: {}", self.result);
    }
}
