//! spca-bench CLI - FP32 convolution and transfer bandwidth benchmark

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use spca_bench::{list_devices, BenchmarkConfig, BenchmarkConvFp32};
use spca_compute::backends::HostBackend;
use spca_compute::{ComputeBackend, SessionConfig};
use spca_tracing::{init_global_tracing, TracingConfig};

#[derive(Parser)]
#[command(name = "spca-bench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Compute backend
    #[arg(long, value_enum, default_value_t = BackendKind::default_kind(), global = true)]
    backend: BackendKind,

    /// Catalog index of the device to benchmark
    #[arg(long, env = "SPCA_DEVICE_INDEX", global = true)]
    device: Option<usize>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Rayon CPU reference backend
    Host,
    /// OpenCL platforms through the ICD loader
    Opencl,
}

impl BackendKind {
    fn default_kind() -> Self {
        if cfg!(feature = "opencl") {
            Self::Opencl
        } else {
            Self::Host
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List compute devices with their capabilities
    Devices,
    /// Run the FP32 convolution benchmark
    Conv(SizeArgs),
    /// Run the transfer bandwidth benchmark
    Bandwidth(SizeArgs),
    /// Run both benchmarks and print the combined report
    All(SizeArgs),
}

#[derive(Args)]
struct SizeArgs {
    /// Use small workloads suited to the host backend
    #[arg(long)]
    quick: bool,
    /// Convolution data matrix, WxH
    #[arg(long, value_parser = parse_size)]
    data: Option<[usize; 2]>,
    /// Convolution kernel matrices, WxH
    #[arg(long, value_parser = parse_size)]
    conv: Option<[usize; 2]>,
    /// Bandwidth matrix, WxH
    #[arg(long, value_parser = parse_size)]
    size: Option<[usize; 2]>,
}

impl SizeArgs {
    fn config(&self) -> BenchmarkConfig {
        let mut config = if self.quick {
            BenchmarkConfig::quick()
        } else {
            BenchmarkConfig::default()
        };
        if let Some(data) = self.data {
            config.data_size = data;
        }
        if let Some(conv) = self.conv {
            config.conv_size = conv;
        }
        if let Some(size) = self.size {
            config.bandwidth_size = size;
        }
        config
    }
}

fn parse_size(raw: &str) -> std::result::Result<[usize; 2], String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {raw:?}"))?;
    let w: usize = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
    let h: usize = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
    if w == 0 || h == 0 {
        return Err("extents must be non-zero".to_string());
    }
    Ok([w, h])
}

fn backend(kind: BackendKind) -> Result<Arc<dyn ComputeBackend>> {
    match kind {
        BackendKind::Host => Ok(Arc::new(HostBackend::new())),
        #[cfg(feature = "opencl")]
        BackendKind::Opencl => Ok(Arc::new(spca_compute::backends::OpenClBackend::new())),
        #[cfg(not(feature = "opencl"))]
        BackendKind::Opencl => anyhow::bail!("built without the `opencl` feature"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let tracing = TracingConfig::from_env().with_verbosity(cli.verbose);
    init_global_tracing(&tracing).context("failed to initialise tracing")?;

    let backend = backend(cli.backend)?;

    let (sizes, run_conv, run_bandwidth) = match &cli.command {
        Commands::Devices => {
            let devices = list_devices(backend.as_ref());
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("no compute devices found");
            } else {
                for device in &devices {
                    println!("device {} [{}]:{}", device.index, device.class, device.description);
                }
            }
            return Ok(());
        }
        Commands::Conv(sizes) => (sizes, true, false),
        Commands::Bandwidth(sizes) => (sizes, false, true),
        Commands::All(sizes) => (sizes, true, true),
    };

    let mut session_config = SessionConfig::from_env();
    if let Some(index) = cli.device {
        session_config.device_index = index;
    }

    let mut bench = BenchmarkConvFp32::new(backend, sizes.config()).with_session_config(session_config);
    if run_conv {
        bench.run_conv().context("convolution benchmark failed")?;
    }
    if run_bandwidth {
        bench.run_bandwidth().context("bandwidth benchmark failed")?;
    }
    bench.print_result();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(bench.result())?);
    } else {
        println!("{}", bench.result());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("320x240"), Ok([320, 240]));
        assert_eq!(parse_size("16X16"), Ok([16, 16]));
        assert!(parse_size("0x4").is_err());
        assert!(parse_size("320").is_err());
    }

    #[test]
    fn test_size_overrides() {
        let cli = Cli::parse_from(["spca-bench", "conv", "--quick", "--data", "32x32"]);
        let Commands::Conv(sizes) = cli.command else {
            panic!("expected conv");
        };
        let config = sizes.config();
        assert_eq!(config.data_size, [32, 32]);
        assert_eq!(config.conv_size, BenchmarkConfig::quick().conv_size);
    }
}
