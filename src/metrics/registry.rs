use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Histogram bucket boundaries for streamed response size (bytes).
const SIZE_BUCKETS: &[f64] = &[
    100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0, 500000.0, 1000000.0, 10_000_000.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full("olla_stream_bytes_total".to_string()),
                SIZE_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // request path
        describe_counter!(
            "olla_proxy_requests_total",
            Unit::Count,
            "Total proxy requests processed, labeled by outcome"
        );
        describe_histogram!(
            "olla_proxy_request_duration_seconds",
            Unit::Seconds,
            "End-to-end request duration including retries and failover"
        );
        describe_histogram!(
            "olla_upstream_request_duration_seconds",
            Unit::Seconds,
            "Per-attempt upstream request duration"
        );
        describe_gauge!(
            "olla_proxy_requests_in_flight",
            Unit::Count,
            "Number of requests currently being proxied"
        );

        // streaming
        describe_counter!(
            "olla_stream_bytes_total",
            Unit::Bytes,
            "Total bytes streamed back to clients"
        );
        describe_counter!(
            "olla_stream_disconnects_total",
            Unit::Count,
            "Total client disconnects observed mid-stream"
        );

        // endpoint health / backoff
        describe_gauge!(
            "olla_endpoint_backoff_seconds",
            Unit::Seconds,
            "Current backoff duration applied to an endpoint"
        );
        describe_counter!(
            "olla_circuit_events_total",
            Unit::Count,
            "Total circuit breaker state transitions, labeled by endpoint and state"
        );

        // retries
        describe_counter!(
            "olla_retry_attempts_total",
            Unit::Count,
            "Total retry/failover attempts across endpoints"
        );

        // connections
        describe_gauge!(
            "olla_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "olla_connections_total",
            Unit::Count,
            "Total connections accepted, labeled by status"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
