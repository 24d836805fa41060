//! Benchmark figures and their text report

use std::fmt;

use serde::{Deserialize, Serialize};

/// MiB→GiB and GFLOPS→TFLOPS factor of the report.
pub const SCALE_1024: f64 = 0.000976;

const PREFIX: &str = "[BINFO]: ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub calculate_gflops: f64,
    /// Device time of the convolution dispatch.
    pub calculate_time_ms: f64,
    pub upload_mib_s: f64,
    pub download_mib_s: f64,
}

impl BenchmarkResult {
    pub fn calculate_tflops(&self) -> f64 {
        self.calculate_gflops * SCALE_1024
    }

    pub fn upload_gib_s(&self) -> f64 {
        self.upload_mib_s * SCALE_1024
    }

    pub fn download_gib_s(&self) -> f64 {
        self.download_mib_s * SCALE_1024
    }
}

/// GFLOPS of `flops` operations done in `time_ms`; zero for an unmeasured time.
pub fn gflops(flops: u64, time_ms: f64) -> f64 {
    if time_ms > 0.0 {
        flops as f64 / 1e9 / (time_ms / 1000.0)
    } else {
        0.0
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{PREFIX}calc total time: {} ms", self.calculate_time_ms)?;
        writeln!(
            f,
            "{PREFIX}calc floating32: {} gflops, {} tflops",
            self.calculate_gflops,
            self.calculate_tflops()
        )?;
        writeln!(
            f,
            "{PREFIX}data bandwidth(ld): {} mib/s, {} gib/s",
            self.upload_mib_s,
            self.upload_gib_s()
        )?;
        write!(
            f,
            "{PREFIX}data bandwidth(st): {} mib/s, {} gib/s",
            self.download_mib_s,
            self.download_gib_s()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gflops() {
        assert!((gflops(2_000_000_000, 1000.0) - 2.0).abs() < 1e-12);
        assert!((gflops(1_000_000_000, 500.0) - 2.0).abs() < 1e-12);
        assert_eq!(gflops(1, 0.0), 0.0);
    }

    #[test]
    fn test_report_layout() {
        let result = BenchmarkResult {
            calculate_gflops: 1000.0,
            calculate_time_ms: 12.5,
            upload_mib_s: 2048.0,
            download_mib_s: 1024.0,
        };
        let text = result.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "[BINFO]: calc total time: 12.5 ms");
        assert!(lines[2].starts_with("[BINFO]: calc floating32: 1000 gflops, "));
        assert!(lines[2].ends_with(" tflops"));
        assert!(lines[3].starts_with("[BINFO]: data bandwidth(ld): 2048 mib/s, "));
        assert!((result.upload_gib_s() - 1.998848).abs() < 1e-9);
        assert!(lines[4].starts_with("[BINFO]: data bandwidth(st): 1024 mib/s"));
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(BenchmarkResult::default()).unwrap();
        for key in ["calculate_gflops", "calculate_time_ms", "upload_mib_s", "download_mib_s"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
