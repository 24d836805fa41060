//! Session configuration
//!
//! Defaults match the reference behaviour: device 0, a 2×2 work-group, timed
//! transfers, a 128 MiB bandwidth floor and a 10240-byte build log.
//! `from_env` overlays `SPCA_*` variables; malformed values are skipped with
//! a warning.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::timing::BANDWIDTH_THRESHOLD_MIB;

pub const ENV_DEVICE_INDEX: &str = "SPCA_DEVICE_INDEX";
pub const ENV_WORKGROUP: &str = "SPCA_WORKGROUP";
pub const ENV_TIMED_TRANSFERS: &str = "SPCA_TIMED_TRANSFERS";
pub const ENV_BANDWIDTH_THRESHOLD_MIB: &str = "SPCA_BANDWIDTH_THRESHOLD_MIB";
pub const ENV_BUILD_LOG_LIMIT: &str = "SPCA_BUILD_LOG_LIMIT";

pub const DEFAULT_WORKGROUP: [usize; 2] = [2, 2];
pub const DEFAULT_BUILD_LOG_LIMIT: usize = 10240;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Catalog index of the device bound at init.
    pub device_index: usize,
    /// Local work-group shape for every dispatch.
    pub workgroup: [usize; 2],
    /// Wait on each transfer and accumulate its device time.
    pub timed_transfers: bool,
    pub bandwidth_threshold_mib: f64,
    /// Max bytes of compiler output kept after a failed build.
    pub build_log_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            workgroup: DEFAULT_WORKGROUP,
            timed_transfers: true,
            bandwidth_threshold_mib: BANDWIDTH_THRESHOLD_MIB,
            build_log_limit: DEFAULT_BUILD_LOG_LIMIT,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(index) = parse_var(ENV_DEVICE_INDEX) {
            config.device_index = index;
        }
        if let Some(raw) = env::var(ENV_WORKGROUP).ok().filter(|v| !v.trim().is_empty()) {
            match parse_workgroup(&raw) {
                Some(shape) => config.workgroup = shape,
                None => warn!(var = ENV_WORKGROUP, value = %raw, "expected XxY with both sides > 1, ignoring"),
            }
        }
        if let Some(raw) = env::var(ENV_TIMED_TRANSFERS).ok().filter(|v| !v.trim().is_empty()) {
            match parse_bool(&raw) {
                Some(flag) => config.timed_transfers = flag,
                None => warn!(var = ENV_TIMED_TRANSFERS, value = %raw, "expected a boolean, ignoring"),
            }
        }
        if let Some(threshold) = parse_var::<f64>(ENV_BANDWIDTH_THRESHOLD_MIB) {
            if threshold.is_finite() && threshold >= 0.0 {
                config.bandwidth_threshold_mib = threshold;
            } else {
                warn!(var = ENV_BANDWIDTH_THRESHOLD_MIB, threshold, "threshold must be finite and >= 0, ignoring");
            }
        }
        if let Some(limit) = parse_var(ENV_BUILD_LOG_LIMIT) {
            config.build_log_limit = limit;
        }
        config
    }

    pub fn with_device_index(mut self, index: usize) -> Self {
        self.device_index = index;
        self
    }

    pub fn with_workgroup(mut self, x: usize, y: usize) -> Self {
        self.workgroup = [x, y];
        self
    }

    pub fn with_timed_transfers(mut self, timed: bool) -> Self {
        self.timed_transfers = timed;
        self
    }

    pub fn with_bandwidth_threshold_mib(mut self, threshold: f64) -> Self {
        self.bandwidth_threshold_mib = threshold;
        self
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "unparsable value, ignoring");
            None
        }
    }
}

fn parse_workgroup(raw: &str) -> Option<[usize; 2]> {
    let (x, y) = raw.trim().split_once(['x', 'X'])?;
    let x = x.trim().parse().ok()?;
    let y = y.trim().parse().ok()?;
    (x > 1 && y > 1).then_some([x, y])
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
