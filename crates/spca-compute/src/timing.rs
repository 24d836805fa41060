//! Kernel time and bandwidth accounting

use serde::{Deserialize, Serialize};
use spca_tracing::performance::bytes_to_mib;

/// Default lower bound (MiB) for reporting transfer bandwidth.
pub const BANDWIDTH_THRESHOLD_MIB: f64 = 128.0;

/// Figures of the last compute round.
///
/// Bandwidth fields stay zero unless the round moved more than the
/// configured threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTimers {
    /// Device time of the last dispatch.
    pub kernel_time_ms: f64,
    pub upload_ms: f64,
    pub upload_bytes: usize,
    pub upload_mib_s: f64,
    pub download_ms: f64,
    pub download_bytes: usize,
    pub download_mib_s: f64,
}

/// Aggregate of one upload or download pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferReport {
    pub transfers: usize,
    pub bytes: usize,
    /// Summed per-transfer device time; zero when transfers were not timed.
    pub elapsed_ms: f64,
}

impl TransferReport {
    pub fn mib(&self) -> f64 {
        bytes_to_mib(self.bytes)
    }

    pub fn bandwidth_mib_s(&self, threshold_mib: f64) -> f64 {
        bandwidth_mib_s(self.bytes, self.elapsed_ms, threshold_mib)
    }
}

/// `MiB / ms × 1000` when more than `threshold_mib` MiB moved in a measured
/// time, otherwise zero.
pub fn bandwidth_mib_s(bytes: usize, elapsed_ms: f64, threshold_mib: f64) -> f64 {
    let mib = bytes_to_mib(bytes);
    if mib > threshold_mib && elapsed_ms > 0.0 {
        mib / elapsed_ms * 1000.0
    } else {
        0.0
    }
}
