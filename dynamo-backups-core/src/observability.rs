/*!
Observability for backup runs.

This module provides:
- Log setting resolution with lenient fallbacks for level and format
- tracing-subscriber setup (text or JSON output)
- Prometheus metrics for store calls (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{BackupError, Result};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resolved logging settings plus any problems found while resolving them
///
/// Problems are collected instead of printed because no subscriber exists yet
/// at resolution time; [`init_observability`] logs them once it is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub warnings: Vec<String>,
}

impl LogSettings {
    /// Resolve raw `LOG_LEVEL` / `LOG_FORMATTER` values
    ///
    /// An unknown level falls back to `info`; an unknown format falls back to JSON.
    pub fn resolve(level: &str, format: &str) -> Self {
        let mut warnings = Vec::new();

        let level = match level.trim().parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => {
                warnings.push(format!(
                    "Could not read log level '{level}' from configuration, defaulting to INFO"
                ));
                LevelFilter::INFO
            }
        };

        let format = match format.trim().to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                warnings.push(format!(
                    "Could not read log formatter '{other}' from configuration, defaulting to JSON"
                ));
                LogFormat::Json
            }
        };

        LogSettings {
            level,
            format,
            warnings,
        }
    }

    /// File and line numbers are only worth their noise at debug level and below
    pub fn with_source_location(&self) -> bool {
        self.level >= LevelFilter::DEBUG
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings::resolve("info", "text")
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` directives, when present, refine the configured level.
pub fn init_observability(settings: &LogSettings) -> Result<()> {
    #[cfg(feature = "metrics")]
    BackupMetrics::global();

    let filter = EnvFilter::builder()
        .with_default_directive(settings.level.into())
        .from_env_lossy();
    let source_location = settings.with_source_location();

    let installed = match settings.format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(source_location)
                .with_line_number(source_location);
            set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(true)
                .with_span_list(false)
                .with_file(source_location)
                .with_line_number(source_location);
            set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
        }
    };

    installed.map_err(|e| {
        BackupError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    for warning in &settings.warnings {
        tracing::error!("{}", warning);
    }
    tracing::debug!(level = %settings.level, format = ?settings.format, "Logging initialized");
    Ok(())
}

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<BackupMetrics>> = OnceLock::new();

/// Store call metrics, labelled by operation
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct BackupMetrics {
    pub store_requests_total: IntCounterVec,
    pub store_errors_total: IntCounterVec,
    pub store_latency_seconds: HistogramVec,
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl BackupMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let store_requests_total = IntCounterVec::new(
            Opts::new(
                "dynamo_backups_store_requests_total",
                "Total store calls made by dynamo-backups",
            ),
            &["operation"],
        )
        .map_err(|e| metric_error("store_requests_total", e))?;

        let store_errors_total = IntCounterVec::new(
            Opts::new(
                "dynamo_backups_store_errors_total",
                "Total failed store calls in dynamo-backups",
            ),
            &["operation"],
        )
        .map_err(|e| metric_error("store_errors_total", e))?;

        let store_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dynamo_backups_store_latency_seconds",
                "Duration of store calls in seconds",
            ),
            &["operation"],
        )
        .map_err(|e| metric_error("store_latency_seconds", e))?;

        registry
            .register(Box::new(store_requests_total.clone()))
            .map_err(|e| metric_error("store_requests_total", e))?;
        registry
            .register(Box::new(store_errors_total.clone()))
            .map_err(|e| metric_error("store_errors_total", e))?;
        registry
            .register(Box::new(store_latency_seconds.clone()))
            .map_err(|e| metric_error("store_latency_seconds", e))?;

        Ok(Self {
            store_requests_total,
            store_errors_total,
            store_latency_seconds,
            registry,
        })
    }

    /// Get or initialize the global metrics instance; `None` if registration failed
    pub fn global() -> Option<&'static BackupMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_request(&self, operation: &str) {
        self.store_requests_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_error(&self, operation: &str) {
        self.store_errors_total.with_label_values(&[operation]).inc();
    }

    pub fn record_latency(&self, operation: &str, duration: std::time::Duration) {
        self.store_latency_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| BackupError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            BackupError::validation(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> BackupError {
    BackupError::validation(format!("Failed to set up {name} metric: {e}"))
}

/// Measures one store call
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    operation: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start(operation: &'static str) -> Self {
        if let Some(metrics) = BackupMetrics::global() {
            metrics.record_request(operation);
        }
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Record the latency, and an error when `ok` is false
    pub fn finish_with(self, ok: bool) {
        if let Some(metrics) = BackupMetrics::global() {
            metrics.record_latency(self.operation, self.start.elapsed());
            if !ok {
                metrics.record_error(self.operation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_valid_settings() {
        let settings = LogSettings::resolve("debug", "json");
        assert_eq!(settings.level, LevelFilter::DEBUG);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.warnings.is_empty());
        assert!(settings.with_source_location());
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let settings = LogSettings::resolve("chatty", "text");
        assert_eq!(settings.level, LevelFilter::INFO);
        assert_eq!(settings.format, LogFormat::Text);
        assert_eq!(settings.warnings.len(), 1);
        assert!(!settings.with_source_location());
    }

    #[test]
    fn test_unknown_format_falls_back_to_json() {
        let settings = LogSettings::resolve("warn", "logfmt");
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.warnings[0].contains("logfmt"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        let timer = MetricsTimer::start("create_backup");
        timer.finish_with(false);

        let metrics = BackupMetrics::global().unwrap();
        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("dynamo_backups_store_requests_total"));
        assert!(text.contains("create_backup"));
    }
}
