//! Prometheus metrics for Aeacus

use std::sync::LazyLock;

use axum::http::StatusCode;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Execution duration histogram
pub static EXECUTION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "aeacus_execution_duration_seconds",
        "Time spent executing submissions",
    )
    .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);

    HistogramVec::new(opts, &["strategy"]).expect("Failed to create histogram")
});

/// Test verdicts by type
pub static VERDICT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new("aeacus_verdict_total", "Total test verdicts by type");
    IntCounterVec::new(opts, &["verdict"]).expect("Failed to create counter")
});

/// Submissions with a produced result
pub static SUBMISSIONS_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("aeacus_submissions_processed_total", "Total submissions processed")
        .expect("Failed to create counter")
});

/// Submissions routed to the error path
pub static SUBMISSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("aeacus_submissions_failed_total", "Total submissions that failed")
        .expect("Failed to create counter")
});

/// Submissions currently in flight
pub static ACTIVE_SUBMISSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("aeacus_active_submissions", "Submissions currently being executed")
        .expect("Failed to create gauge")
});

/// Remote workers currently leased
pub static REMOTE_WORKERS_BUSY: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("aeacus_remote_workers_busy", "Remote workers currently executing a submission")
        .expect("Failed to create gauge")
});

/// Initialize and register all metrics
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(EXECUTION_DURATION.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(VERDICT_TOTAL.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(SUBMISSIONS_PROCESSED.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(SUBMISSIONS_FAILED.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(ACTIVE_SUBMISSIONS.clone()))
        .expect("Failed to register metric");
    REGISTRY
        .register(Box::new(REMOTE_WORKERS_BUSY.clone()))
        .expect("Failed to register metric");
}

/// Record a test verdict
pub fn record_verdict(verdict: &str) {
    VERDICT_TOTAL.with_label_values(&[verdict]).inc();
}

/// Record how long a strategy took
pub fn record_execution(strategy: &str, duration_secs: f64) {
    EXECUTION_DURATION
        .with_label_values(&[strategy])
        .observe(duration_secs);
}

/// HTTP server for Prometheus metrics endpoint
pub struct MetricsServer;

impl MetricsServer {
    /// Run the metrics server
    pub async fn run(port: u16) -> anyhow::Result<()> {
        use axum::{Router, routing::get};
        use std::net::SocketAddr;

        init_metrics();

        let app = Router::new()
            .route("/metrics", get(Self::metrics_handler))
            .route("/health", get(|| async { "OK" }));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn metrics_handler() -> Result<String, StatusCode> {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    }
}
