use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder
///
/// Fails if a recorder is already installed (e.g., in tests); tests build a
/// local recorder with `PrometheusBuilder::build_recorder` instead.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_panics_total",
        "Handler panics recovered by the middleware"
    );
    describe_counter!("db_queries_total", "Total number of datastore queries");
    describe_gauge!("user_api_info", "Service version information");

    gauge!("user_api_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a completed HTTP request
pub fn record_request(method: &str, route: &str, status: u16, duration: Duration) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a recovered handler panic
pub fn record_panic(route: &str) {
    counter!("http_panics_total", "route" => route.to_string()).increment(1);
}

/// Record a datastore query; `outcome` is `ok`, `not_found` or `error`
pub fn record_query(outcome: &'static str) {
    counter!("db_queries_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_record_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            init_metric_descriptions();
            record_request("GET", "/api/v1/users", 200, Duration::from_millis(12));
            record_panic("/api/v1/panic");
            record_query("ok");
        });

        let rendered = handle.render();
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("status=\"200\""));
        assert!(rendered.contains("http_panics_total"));
        assert!(rendered.contains("db_queries_total{outcome=\"ok\"} 1"));
    }
}
