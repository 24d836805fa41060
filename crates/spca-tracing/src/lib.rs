//! Shared tracing configuration for the starry-pca workspace.
//!
//! Every crate logs through `tracing` macros with its module path as the event
//! target. Binaries, benches and integration tests install exactly one
//! subscriber through [`init_global_tracing`] so that output format and
//! filtering stay consistent across the workspace.
//!
//! Severity mapping used throughout the workspace:
//!
//! | severity     | macro                                      |
//! |--------------|--------------------------------------------|
//! | error        | `error!`                                   |
//! | warning      | `warn!`                                    |
//! | info         | `info!`                                    |
//! | trace        | `trace!`                                   |
//! | performance  | `debug!` with an `event = "..."` field, see [`performance`] |

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Crates whose events are raised to debug level by the performance preset.
const PERFORMANCE_TARGETS: &str = "spca_compute=debug,spca_bench=debug,spca_tracing=debug";

/// Configuration describing how the shared subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `spca_compute=trace,info`). When
    /// absent `RUST_LOG` is consulted, then [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Fallback directive used when nothing else resolves.
    pub default_directive: String,
    /// Show event targets (module paths) in output.
    pub include_targets: bool,
    /// ANSI colouring. Always off for JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter layer style.
    pub output: TracingOutput,
    /// When false, performance events are still emitted at debug level but the
    /// performance preset filters are not applied.
    pub enable_performance_tracing: bool,
    /// Minimum duration in microseconds before a [`performance::PerformanceSpan`]
    /// is logged. `None` logs every span.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for interactive use.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
        }
    }

    /// JSON lines without colour, for CI and log collectors.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            ..Self::for_local()
        }
    }

    /// JSON output with span close timings and debug level for the compute crates.
    pub fn for_performance() -> Self {
        Self {
            directives: Some(format!("{PERFORMANCE_TARGETS},info")),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Json,
            enable_performance_tracing: true,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `SPCA_TRACING_PROFILE` - `local` (default), `ci` or `performance`
    /// - `SPCA_TRACING_DIRECTIVES` - overrides filter directives
    /// - `SPCA_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `SPCA_PERF_TRACING` - `true`/`1`/`yes` enables performance tracing
    /// - `SPCA_PERF_THRESHOLD_US` - minimum span duration to log
    pub fn from_env() -> Self {
        let profile = env::var("SPCA_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" | "perf" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("SPCA_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Some(output) = env::var("SPCA_TRACING_FORMAT")
            .ok()
            .and_then(|value| TracingOutput::from_env_value(&value))
        {
            config.output = output;
        }

        if let Ok(flag) = env::var("SPCA_PERF_TRACING") {
            config.enable_performance_tracing = parse_flag(&flag);
            if config.enable_performance_tracing && config.directives.is_none() {
                config.directives = Some(format!("{PERFORMANCE_TARGETS},info"));
            }
        }

        if let Some(threshold) = env::var("SPCA_PERF_THRESHOLD_US")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.performance_threshold_us = Some(threshold);
        }

        if matches!(config.output, TracingOutput::Json) {
            config.ansi = false;
        }

        config
    }

    /// Raise the filter by `verbosity` steps above the default (`-v`, `-vv`).
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        let level = match verbosity {
            0 => return self,
            1 => "debug",
            _ => "trace",
        };
        self.directives = Some(format!("spca_compute={level},spca_bench={level},{}", self.default_directive));
        self
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Errors surfaced while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Output format choices for the formatter layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Build a subscriber from `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(layer).with(filter))
}

/// Build the filter and formatter layer for external composition.
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let base = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone());

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => Box::new(base.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(base.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(base.json().with_ansi(false)),
    };

    if let Some(threshold) = config.performance_threshold_us {
        performance::set_span_threshold_us(threshold);
    }

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Install a compact subscriber writing through the test harness capture.
///
/// Safe to call from every test: only the first call installs anything.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: &[&str] = &[
        "SPCA_TRACING_PROFILE",
        "SPCA_TRACING_DIRECTIVES",
        "SPCA_TRACING_FORMAT",
        "SPCA_PERF_TRACING",
        "SPCA_PERF_THRESHOLD_US",
        "RUST_LOG",
    ];

    fn reset_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn rejects_invalid_directive() {
        reset_env();
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(build_subscriber(&config), Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    #[serial]
    fn builds_with_defaults() {
        reset_env();
        assert!(build_subscriber(&TracingConfig::default()).is_ok());
        assert!(build_subscriber(&TracingConfig::for_ci()).is_ok());
        assert!(build_subscriber(&TracingConfig::for_performance()).is_ok());
    }

    #[test]
    #[serial]
    fn from_env_respects_profile_and_format() {
        reset_env();
        env::set_var("SPCA_TRACING_PROFILE", "ci");
        env::set_var("SPCA_TRACING_FORMAT", "compact");
        env::set_var("SPCA_TRACING_DIRECTIVES", "spca_compute=trace");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("spca_compute=trace"));
        assert_eq!(config.output, TracingOutput::Compact);
        assert!(!config.ansi);
        reset_env();
    }

    #[test]
    #[serial]
    fn from_env_enables_performance_tracing() {
        reset_env();
        env::set_var("SPCA_PERF_TRACING", "yes");
        env::set_var("SPCA_PERF_THRESHOLD_US", "250");

        let config = TracingConfig::from_env();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.performance_threshold_us, Some(250));
        assert!(config
            .directives
            .as_deref()
            .is_some_and(|d| d.contains("spca_compute=debug")));
        reset_env();
    }

    #[test]
    #[serial]
    fn json_format_forces_ansi_off() {
        reset_env();
        env::set_var("SPCA_TRACING_FORMAT", "json");
        let config = TracingConfig::from_env();
        assert_eq!(config.output, TracingOutput::Json);
        assert!(!config.ansi);
        reset_env();
    }

    #[test]
    fn verbosity_raises_compute_level() {
        let config = TracingConfig::for_local().with_verbosity(2);
        assert_eq!(
            config.directives.as_deref(),
            Some("spca_compute=trace,spca_bench=trace,info")
        );
        let unchanged = TracingConfig::for_local().with_verbosity(0);
        assert!(unchanged.directives.is_none());
    }

    #[test]
    fn performance_preset() {
        let config = TracingConfig::for_performance();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.output, TracingOutput::Json);
        assert!(!config.ansi);
        assert_eq!(config.span_events, FmtSpan::CLOSE);
    }
}
