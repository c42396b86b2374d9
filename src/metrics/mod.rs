use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::registry::ModelFamily;

pub struct MetricsRegistry {
    pub registry: Registry,

    // Lifecycle metrics
    pub model_loads_total: CounterVec,
    pub model_load_duration: HistogramVec,
    pub live_handles: Gauge,

    // Artifact metrics
    pub artifact_downloads_total: Counter,
    pub artifact_download_retries_total: Counter,

    // Inference metrics
    pub inference_items_total: CounterVec,
    pub inference_duration: HistogramVec,
    pub errors_total: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let model_loads_total = CounterVec::new(
            Opts::new("embed_model_loads_total", "Total number of models loaded"),
            &["family"],
        )?;

        // Load duration histogram (10ms to 10 minutes, downloads included)
        let model_load_duration = HistogramVec::new(
            HistogramOpts::new(
                "embed_model_load_duration_seconds",
                "Model load duration in seconds, including artifact fetches",
            )
            .buckets(vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0,
            ]),
            &["family"],
        )?;

        let live_handles = Gauge::new("embed_live_handles", "Number of open model handles")?;

        let artifact_downloads_total = Counter::new(
            "embed_artifact_downloads_total",
            "Total number of artifact files fetched",
        )?;

        let artifact_download_retries_total = Counter::new(
            "embed_artifact_download_retries_total",
            "Total number of retried artifact fetches",
        )?;

        let inference_items_total = CounterVec::new(
            Opts::new("embed_inference_items_total", "Total number of items processed"),
            &["family"],
        )?;

        // Per-call inference histogram (1ms to 2 minutes)
        let inference_duration = HistogramVec::new(
            HistogramOpts::new(
                "embed_inference_duration_seconds",
                "Embed or rerank call duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0,
            ]),
            &["family"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("embed_errors_total", "Total number of failed engine calls"),
            &["kind"],
        )?;

        registry.register(Box::new(model_loads_total.clone()))?;
        registry.register(Box::new(model_load_duration.clone()))?;
        registry.register(Box::new(live_handles.clone()))?;
        registry.register(Box::new(artifact_downloads_total.clone()))?;
        registry.register(Box::new(artifact_download_retries_total.clone()))?;
        registry.register(Box::new(inference_items_total.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            registry,
            model_loads_total,
            model_load_duration,
            live_handles,
            artifact_downloads_total,
            artifact_download_retries_total,
            inference_items_total,
            inference_duration,
            errors_total,
        })
    }

    pub fn record_load(&self, family: ModelFamily, elapsed: Duration) {
        self.model_loads_total
            .with_label_values(&[family.slug()])
            .inc();
        self.model_load_duration
            .with_label_values(&[family.slug()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_inference(&self, family: ModelFamily, items: usize, elapsed: Duration) {
        self.inference_items_total
            .with_label_values(&[family.slug()])
            .inc_by(items as f64);
        self.inference_duration
            .with_label_values(&[family.slug()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.errors_total.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn set_live_handles(&self, n: usize) {
        self.live_handles.set(n as f64);
    }

    /// Prometheus text exposition of everything registered.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
