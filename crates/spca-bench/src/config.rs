//! Benchmark workload sizes

use serde::{Deserialize, Serialize};

/// Extents of the benchmark matrices, `[width, height]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Convolution input and output.
    pub data_size: [usize; 2],
    /// Each of the two convolution kernels.
    pub conv_size: [usize; 2],
    /// Convolution parameter matrix; holds the kernel extents.
    pub params_size: [usize; 2],
    /// Bandwidth run input and output.
    pub bandwidth_size: [usize; 2],
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            data_size: [320, 320],
            conv_size: [5120, 5120],
            params_size: [2, 1],
            bandwidth_size: [20480, 20480],
        }
    }
}

impl BenchmarkConfig {
    /// Small workloads that finish quickly on the host backend.
    pub fn quick() -> Self {
        Self {
            data_size: [64, 64],
            conv_size: [5, 5],
            params_size: [2, 1],
            bandwidth_size: [512, 512],
        }
    }

    /// Floating-point operations of one convolution run: `x·y·m·n·34`.
    pub fn conv_flops(&self) -> u64 {
        let [x, y] = self.data_size;
        let [m, n] = self.conv_size;
        (x as u64) * (y as u64) * (m as u64) * (n as u64) * 34
    }
}
