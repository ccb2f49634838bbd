//! # Telemetry Features
//!
//! Log output through `tracing_subscriber::fmt` is always on. OpenTelemetry
//! metrics are optional.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics (counters, up-down counter,
//!   histogram).
//! - `stdout`: Exports metrics to stdout every five seconds.
//! - `otlp`: Exports metrics over OTLP/gRPC to `OTEL_EXPORTER_OTLP_ENDPOINT`.
//!
//! ## Feature constraints
//!
//! - Exporters require `metrics`.
//! - Both exporters can be enabled at the same time.
//!
//! ## Metrics
//!
//! Every process keeps its own meter provider. Queue metrics are recorded by
//! the worker that owns the queue:
//!
//! - `items_accepted` / `items_rejected`: `PUT /data` outcomes.
//! - `items_persisted`, `items_retried`, `items_dropped`: queue outcomes.
//! - `queue_depth`: items accepted but not yet persisted or dropped.
//! - `persist_duration` (ms): duration of one write attempt.
//!
//! Enable metrics exported to stdout:
//!
//! ```bash
//! cargo run --features metrics,stdout
//! ```

#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires the 'metrics' feature to be enabled.");

#[cfg(all(feature = "otlp", not(feature = "metrics")))]
compile_error!("The 'otlp' feature requires the 'metrics' feature to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending metrics. Must run before the process exits.
    pub fn shutdown(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        let scope = InstrumentationScope::builder("pgsink")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("pgsink")
        .with_schema_url(
            [
                KeyValue::new(semvcns::resource::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(
                    semvcns::resource::PROCESS_PID,
                    i64::from(std::process::id()),
                ),
            ],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_temporality(sdkmetrics::Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static ITEMS_ACCEPTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ITEMS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ITEMS_PERSISTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ITEMS_RETRIED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ITEMS_DROPPED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static QUEUE_DEPTH: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PERSIST_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = ITEMS_ACCEPTED.set(
        meter
            .u64_counter("items_accepted")
            .with_description("Payloads accepted by PUT /data")
            .build(),
    );
    let _ = ITEMS_REJECTED.set(
        meter
            .u64_counter("items_rejected")
            .with_description("Payloads refused because the queue was closed or full")
            .build(),
    );
    let _ = ITEMS_PERSISTED.set(
        meter
            .u64_counter("items_persisted")
            .with_description("Items written to the store")
            .build(),
    );
    let _ = ITEMS_RETRIED.set(
        meter
            .u64_counter("items_retried")
            .with_description("Failed write attempts that were retried")
            .build(),
    );
    let _ = ITEMS_DROPPED.set(
        meter
            .u64_counter("items_dropped")
            .with_description("Items dropped after their last retry")
            .build(),
    );
    let _ = QUEUE_DEPTH.set(
        meter
            .i64_up_down_counter("queue_depth")
            .with_description("Items buffered or being written")
            .build(),
    );
    let _ = PERSIST_DURATION_MS.set(
        meter
            .f64_histogram("persist_duration")
            .with_unit("ms")
            .with_description("Duration of a single write attempt")
            .build(),
    );
}

// Recording functions compile to no-ops when metrics are disabled.
#[cfg(feature = "metrics")]
pub fn increment_accepted() {
    if let Some(counter) = ITEMS_ACCEPTED.get() {
        counter.add(1, &[]);
    }
    if let Some(depth) = QUEUE_DEPTH.get() {
        depth.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_accepted() {}

#[cfg(feature = "metrics")]
pub fn increment_rejected() {
    if let Some(counter) = ITEMS_REJECTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rejected() {}

#[cfg(feature = "metrics")]
pub fn increment_persisted() {
    if let Some(counter) = ITEMS_PERSISTED.get() {
        counter.add(1, &[]);
    }
    if let Some(depth) = QUEUE_DEPTH.get() {
        depth.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_persisted() {}

#[cfg(feature = "metrics")]
pub fn increment_retried() {
    if let Some(counter) = ITEMS_RETRIED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_retried() {}

#[cfg(feature = "metrics")]
pub fn increment_dropped() {
    if let Some(counter) = ITEMS_DROPPED.get() {
        counter.add(1, &[]);
    }
    if let Some(depth) = QUEUE_DEPTH.get() {
        depth.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_dropped() {}

#[cfg(feature = "metrics")]
pub fn record_persist_duration(duration_ms: f64) {
    if let Some(histogram) = PERSIST_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_persist_duration(_duration_ms: f64) {}
