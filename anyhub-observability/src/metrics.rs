use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Minimal Prometheus metric set (ambient observability, not a spec
/// component): request totals by hub/cache outcome, upstream request totals
/// by hub/method, and overall request latency.
pub struct MetricsCollector {
    registry: Registry,

    /// `anyhub_requests_total{hub,cache_hit}`
    pub requests_total: IntCounterVec,

    /// `anyhub_upstream_requests_total{hub,method}`
    pub upstream_requests_total: IntCounterVec,

    /// `anyhub_request_duration_seconds`
    pub request_duration: HistogramVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("anyhub_requests_total", "Total proxied requests"),
            &["hub", "cache_hit"],
        )?;

        let upstream_requests_total = IntCounterVec::new(
            Opts::new(
                "anyhub_upstream_requests_total",
                "Total requests forwarded to an upstream registry",
            ),
            &["hub", "method"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "anyhub_request_duration_seconds",
                "End-to-end request latency",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["hub"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(upstream_requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            upstream_requests_total,
            request_duration,
        })
    }

    /// Record a completed proxy request.
    pub fn record_request(&self, hub: &str, cache_hit: bool, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[hub, if cache_hit { "true" } else { "false" }])
            .inc();
        self.request_duration
            .with_label_values(&[hub])
            .observe(duration_secs);
    }

    /// Record a request that was forwarded to the upstream registry.
    pub fn record_upstream_request(&self, hub: &str, method: &str) {
        self.upstream_requests_total
            .with_label_values(&[hub, method])
            .inc();
    }

    /// Prometheus text exposition for the `/-/metrics` endpoint.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to create metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_increments_counter_and_observes_latency() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_request("docker-hub", true, 0.01);
        collector.record_request("docker-hub", false, 0.2);
        let text = collector.gather_text();
        assert!(text.contains("anyhub_requests_total"));
        assert!(text.contains("anyhub_request_duration_seconds"));
    }

    #[test]
    fn record_upstream_request_increments_counter() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_upstream_request("npm-hub", "GET");
        let text = collector.gather_text();
        assert!(text.contains("anyhub_upstream_requests_total"));
    }
}
