//! Performance events for device transfers, kernel dispatch and throughput.
//!
//! All helpers emit `debug!` events with a stable `event` field so that JSON
//! logs can be filtered by kind (`transfer`, `kernel`, `bandwidth`, `flops`).
//!
//! ```rust
//! use spca_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("upload_dataset", Some(100));
//! record_transfer(4096, "H2D", 250);
//! drop(span);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::Level;

const NO_THRESHOLD: u64 = u64::MAX;

static SPAN_THRESHOLD_US: AtomicU64 = AtomicU64::new(NO_THRESHOLD);

/// Set the process-wide minimum duration for spans created without an
/// explicit threshold.
pub fn set_span_threshold_us(threshold_us: u64) {
    SPAN_THRESHOLD_US.store(threshold_us, Ordering::Relaxed);
}

fn global_threshold() -> Option<u64> {
    match SPAN_THRESHOLD_US.load(Ordering::Relaxed) {
        NO_THRESHOLD => None,
        value => Some(value),
    }
}

/// RAII timer that logs its duration on drop when it meets the threshold.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a debug-level span. `None` falls back to the global threshold.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Create a span at an explicit level.
    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us: threshold_us.or_else(global_threshold),
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Elapsed wall-clock time in fractional milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Bytes to MiB.
pub fn bytes_to_mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Record one host/device transfer.
///
/// `direction` is `"H2D"` (upload) or `"D2H"` (download).
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let mib_per_s = if duration_us > 0 {
        bytes_to_mib(bytes) / (duration_us as f64 / 1_000_000.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        mib = bytes_to_mib(bytes),
        direction = direction,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        mib_per_s = mib_per_s,
        "data_transfer"
    );
}

/// Record a completed 2D kernel dispatch timed from device event timestamps.
pub fn record_kernel_execution(entry: &str, global: [usize; 2], local: [usize; 2], duration_ms: f64) {
    tracing::debug!(
        event = "kernel",
        entry = entry,
        global_x = global[0],
        global_y = global[1],
        local_x = local[0],
        local_y = local[1],
        work_items = global[0] * global[1],
        duration_ms = duration_ms,
        "kernel_execution"
    );
}

/// Record an aggregate bandwidth figure for one dataset transfer.
pub fn record_bandwidth(direction: &str, mib: f64, duration_ms: f64, mib_per_s: f64) {
    tracing::debug!(
        event = "bandwidth",
        direction = direction,
        mib = mib,
        duration_ms = duration_ms,
        mib_per_s = mib_per_s,
        gib_per_s = mib_per_s / 1024.0,
        "dataset_bandwidth"
    );
}

/// Record floating-point throughput for a compute operation.
pub fn record_flops(operation: &str, flops: u64, duration_us: u64) {
    let flops_per_sec = if duration_us > 0 {
        flops as f64 / (duration_us as f64 / 1_000_000.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "flops",
        operation = operation,
        flops = flops,
        duration_us = duration_us,
        gflops = flops_per_sec / 1e9,
        "compute_performance"
    );
}
