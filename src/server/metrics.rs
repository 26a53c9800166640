use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all pipeline metrics
const PREFIX: &str = "stream_ingest";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job runs by outcome"),
        &["job", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job run duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0]),
        &["job"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOBS_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_jobs_running"), "In-flight runs per job"),
        &["job"]
    ).expect("Failed to create background_jobs_running metric");

    // Pipeline Metrics
    pub static ref AUDIT_RECORDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_audit_records_total"), "Ingest audit records written"),
        &["job", "status"]
    ).expect("Failed to create audit_records_total metric");

    pub static ref PROVIDER_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_provider_requests_total"), "Provider stream listings by outcome"),
        &["provider", "outcome"]
    ).expect("Failed to create provider_requests_total metric");

    pub static ref PROVIDER_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_provider_retries_total"), "Provider request retries"),
        &["provider"]
    ).expect("Failed to create provider_retries_total metric");

    pub static ref STREAM_ACTIVATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_stream_activations_total"), "Active stream changes by reason"),
        &["reason"]
    ).expect("Failed to create stream_activations_total metric");

    pub static ref STREAM_VERIFICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_stream_verifications_total"), "Stream liveness probes by result"),
        &["result"]
    ).expect("Failed to create stream_verifications_total metric");

    pub static ref ACTIVE_STREAMS: Gauge = Gauge::new(
        format!("{PREFIX}_active_streams"),
        "Catalog entries with an active stream"
    ).expect("Failed to create active_streams metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOBS_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(AUDIT_RECORDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROVIDER_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STREAM_ACTIVATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STREAM_VERIFICATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_STREAMS.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a finished background job run
pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();

    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: usize) {
    BACKGROUND_JOBS_RUNNING
        .with_label_values(&[job_id])
        .set(running as f64);
}

pub fn record_audit_record(job: &str, status: &str) {
    AUDIT_RECORDS_TOTAL.with_label_values(&[job, status]).inc();
}

/// Record the outcome of one provider stream listing ("ok" or "failed")
pub fn record_provider_request(provider: &str, outcome: &str) {
    PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[provider, outcome])
        .inc();
}

pub fn record_provider_retry(provider: &str) {
    PROVIDER_RETRIES_TOTAL.with_label_values(&[provider]).inc();
}

pub fn record_stream_activation(reason: &str) {
    STREAM_ACTIVATIONS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record a liveness probe ("working" or "broken")
pub fn record_verification(result: &str) {
    STREAM_VERIFICATIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_active_streams(count: usize) {
    ACTIVE_STREAMS.set(count as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
