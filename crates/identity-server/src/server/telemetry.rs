//! # Telemetry
//!
//! Logging is always on: every diagnostic in the server is a `tracing` event,
//! and [`init_telemetry`] installs the subscriber once at startup. Optional
//! OpenTelemetry export is layered on top behind cargo features.
//!
//! ## Log output
//!
//! - Console: human-readable `pretty` output, or one JSON object per line when
//!   [`LogConfig::json`] is set.
//! - File: an optional JSON sink appended to [`LogConfig::file`].
//! - Filter: `RUST_LOG` when set, otherwise [`LogConfig::level`].
//! - Driver logs emitted through the `log` crate (such as `sqlx` statement
//!   logging) are bridged into the same subscriber.
//!
//! ## Feature matrix
//!
//! - `otel`: Enables OpenTelemetry distributed tracing (via spans).
//! - `metrics`: Enables OpenTelemetry metrics (via counters, histograms, etc.).
//! - `honeycomb`: Enables the Honeycomb OTLP exporter.
//! - `stdout`: Enables the stdout OTLP exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `otel` or `metrics`.
//! - Both `honeycomb` and `stdout` exporters can be enabled at the same time.
//!
//! ## Metrics behavior
//!
//! The interceptor records `rpc_requests`, `rpc_errors`, `rpc_panics`,
//! `rpc_slow` and `rpc_duration` (milliseconds). The recording functions
//! compile to no-ops when `metrics` is disabled.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features otel,metrics,honeycomb
//! cargo run --features otel,stdout
//! ```

// Disallow using `honeycomb` without `otel` or `metrics`
#[cfg(all(feature = "honeycomb", not(any(feature = "otel", feature = "metrics"))))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'otel' or 'metrics' to be enabled."
);

// Disallow using `stdout` without `otel` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{
    EnvFilter, Layer, fmt::time::ChronoLocal, layer::SubscriberExt, registry::LookupSpan,
    util::SubscriberInitExt,
};

// Honeycomb-specific imports
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "otel")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "honeycomb")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "otel")))]
use tonic::transport::ClientTlsConfig;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

/// Subscriber settings resolved from the server configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
    /// Adds source file and line to console output.
    pub source_location: bool,
    pub service_name: String,
}

pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters. Errors are printed, not returned,
    /// since the subscriber may already be unusable at this point.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {:#?}", err);
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {:#?}", err);
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {:#?}", err);
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {:#?}", err);
            }
        }
    }
}

pub fn init_telemetry(config: &LogConfig) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer(&config.service_name)?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics(&config.service_name)?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder("identity-server")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level `{}`", config.level))?,
    };

    let console = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_timer(ChronoLocal::rfc_3339())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(config.source_location)
            .with_file(config.source_location)
            .with_target(true)
            .with_timer(ChronoLocal::rfc_3339())
            .pretty()
            .boxed()
    };

    let file = config
        .file
        .as_deref()
        .map(file_layer)
        .transpose()?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file);

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// JSON lines appended to `path`. The file is created if missing.
pub fn file_layer<S>(path: &Path) -> anyhow::Result<impl Layer<S> + Send + Sync + use<S>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file `{}`", path.display()))?;
    Ok(tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_ansi(false)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(Mutex::new(file)))
}

#[cfg(feature = "honeycomb")]
fn get_metadata() -> anyhow::Result<MetadataMap> {
    let mut map = MetadataMap::new();
    let api_key = std::env::var("HONEYCOMB_API_KEY").context("missing `HONEYCOMB_API_KEY`")?;
    let dataset = std::env::var("HONEYCOMB_DATASET").context("missing `HONEYCOMB_DATASET`")?;
    map.insert(
        "x-honeycomb-team",
        api_key.parse().context("invalid API key")?,
    );
    map.insert(
        "x-honeycomb-dataset",
        dataset.parse().context("invalid dataset")?,
    );
    Ok(map)
}

#[cfg(feature = "honeycomb")]
fn honeycomb_endpoint() -> anyhow::Result<(String, Compression)> {
    use std::str::FromStr;

    let endpoint = std::env::var("HONEYCOMB_ENDPOINT").context("missing `HONEYCOMB_ENDPOINT`")?;
    let raw = std::env::var("HONEYCOMB_COMPRESSION")
        .context("missing `HONEYCOMB_COMPRESSION`")?
        .to_ascii_lowercase();
    Ok((endpoint, Compression::from_str(&raw)?))
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics(service_name: &str) -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        let metadata = get_metadata()?;
        let (endpoint, compression) = honeycomb_endpoint()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel")]
fn init_tracer(service_name: &str) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource(service_name));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        let metadata = get_metadata()?;
        let (endpoint, compression) = honeycomb_endpoint()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RPC_REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_PANICS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_SLOW: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = RPC_REQUESTS.set(
        meter
            .u64_counter("rpc_requests")
            .with_description("Total unary gRPC calls")
            .build(),
    );

    let _ = RPC_ERRORS.set(
        meter
            .u64_counter("rpc_errors")
            .with_description("Calls whose handler returned an error")
            .build(),
    );

    let _ = RPC_PANICS.set(
        meter
            .u64_counter("rpc_panics")
            .with_description("Calls whose handler panicked")
            .build(),
    );

    let _ = RPC_SLOW.set(
        meter
            .u64_counter("rpc_slow")
            .with_description("Successful calls above the slow threshold")
            .build(),
    );

    let _ = RPC_DURATION_MS.set(
        meter
            .f64_histogram("rpc_duration")
            .with_unit("ms")
            .with_description("End-to-end handler duration")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn bump(counter: &OnceLock<Counter<u64>>) {
    if let Some(counter) = counter.get() {
        counter.add(1, &[]);
    }
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_rpc_requests() {
    bump(&RPC_REQUESTS);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rpc_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_rpc_errors() {
    bump(&RPC_ERRORS);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rpc_errors() {}

#[cfg(feature = "metrics")]
pub fn increment_rpc_panics() {
    bump(&RPC_PANICS);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rpc_panics() {}

#[cfg(feature = "metrics")]
pub fn increment_rpc_slow() {
    bump(&RPC_SLOW);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rpc_slow() {}

#[cfg(feature = "metrics")]
pub fn record_rpc_duration(duration_ms: f64) {
    if let Some(histogram) = RPC_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_rpc_duration(_duration_ms: f64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.log");
        std::fs::write(&path, "").unwrap();

        for attempt in 0..2 {
            let subscriber = tracing_subscriber::registry().with(file_layer(&path).unwrap());
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!(target: "grpc", attempt, "gRPC request received");
            });
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["message"], "gRPC request received");
        assert_eq!(entries[0]["target"], "grpc");
        assert_eq!(entries[1]["attempt"], 1);
    }

    #[test]
    fn unwritable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("identity.log");
        let result = file_layer::<tracing_subscriber::Registry>(&path);
        assert!(result.is_err());
    }
}
