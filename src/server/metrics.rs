use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Metric name prefix for all cloudtune metrics
const PREFIX: &str = "cloudtune";

/// Every metric of one server instance, registered in a registry the
/// instance owns. Two instances never share counters.
pub struct ServerMetrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    uploads_total: CounterVec,
    upload_bytes_total: IntCounter,
    upload_duration_seconds: HistogramVec,
    uploads_in_flight: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new(
                format!("{PREFIX}_http_requests_total"),
                "Total number of HTTP requests",
            ),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_http_request_duration_seconds"),
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["method", "path"],
        )?;
        let uploads_total = CounterVec::new(
            Opts::new(
                format!("{PREFIX}_uploads_total"),
                "Upload attempts by outcome and rejection reason",
            ),
            &["outcome", "reason"],
        )?;
        let upload_bytes_total = IntCounter::new(
            format!("{PREFIX}_upload_bytes_total"),
            "Bytes of content newly written to storage",
        )?;
        let upload_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_upload_duration_seconds"),
                "Upload duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["outcome"],
        )?;
        let uploads_in_flight = IntGauge::new(
            format!("{PREFIX}_uploads_in_flight"),
            "Uploads currently holding an admission slot",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(upload_bytes_total.clone()))?;
        registry.register(Box::new(upload_duration_seconds.clone()))?;
        registry.register(Box::new(uploads_in_flight.clone()))?;

        tracing::info!("Metrics system initialized successfully");
        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            uploads_total,
            upload_bytes_total,
            upload_duration_seconds,
            uploads_in_flight,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }

    /// `outcome` is one of `created`, `deduplicated` or `rejected`; `reason`
    /// is the rejection reason, empty otherwise.
    pub fn record_upload(&self, outcome: &str, reason: &str, stored_bytes: u64, duration: Duration) {
        self.uploads_total
            .with_label_values(&[outcome, reason])
            .inc();
        self.upload_bytes_total.inc_by(stored_bytes);
        self.upload_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn set_uploads_in_flight(&self, count: usize) {
        self.uploads_in_flight.set(count as i64);
    }

    /// Prometheus text exposition of the registry.
    pub fn render(&self) -> Result<String> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler(State(metrics): State<Arc<ServerMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
