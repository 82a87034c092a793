//! Prometheus metrics for the gateway.
//!
//! Each [`GatewayMetrics`] owns its registry, so tests and embedders can build as many
//! as they like without colliding on global names. The process normally creates one
//! at startup and hands it to every component as their [`Observer`].

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::observer::Observer;

const NAMESPACE: &str = "tts_gateway";

pub struct GatewayMetrics {
    registry: Registry,
    active_streams: IntGauge,
    jobs_in_flight: IntGauge,
    acquire_timeouts_total: IntCounter,
    limit_exceeded_total: IntCounter,
    queue_full_total: IntCounter,
    relayed_bytes_total: IntCounter,
    stream_errors_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let active_streams = IntGauge::with_opts(
            Opts::new("active_streams", "Admission slots currently held").namespace(NAMESPACE),
        )?;
        let jobs_in_flight = IntGauge::with_opts(
            Opts::new("jobs_in_flight", "Queue jobs currently executing").namespace(NAMESPACE),
        )?;
        let acquire_timeouts_total = IntCounter::with_opts(
            Opts::new(
                "acquire_timeouts_total",
                "Requests that timed out waiting for an admission slot",
            )
            .namespace(NAMESPACE),
        )?;
        let limit_exceeded_total = IntCounter::with_opts(
            Opts::new(
                "limit_exceeded_total",
                "Requests rejected because no admission slot was free",
            )
            .namespace(NAMESPACE),
        )?;
        let queue_full_total = IntCounter::with_opts(
            Opts::new("queue_full_total", "Submits rejected because the work queue was full")
                .namespace(NAMESPACE),
        )?;
        let relayed_bytes_total = IntCounter::with_opts(
            Opts::new("relayed_bytes_total", "Response bytes flushed to clients")
                .namespace(NAMESPACE),
        )?;
        let stream_errors_total = IntCounterVec::new(
            Opts::new("stream_errors_total", "Relays that ended with an error")
                .namespace(NAMESPACE),
            &["code", "phase"],
        )?;

        registry.register(Box::new(active_streams.clone()))?;
        registry.register(Box::new(jobs_in_flight.clone()))?;
        registry.register(Box::new(acquire_timeouts_total.clone()))?;
        registry.register(Box::new(limit_exceeded_total.clone()))?;
        registry.register(Box::new(queue_full_total.clone()))?;
        registry.register(Box::new(relayed_bytes_total.clone()))?;
        registry.register(Box::new(stream_errors_total.clone()))?;

        Ok(Self {
            registry,
            active_streams,
            jobs_in_flight,
            acquire_timeouts_total,
            limit_exceeded_total,
            queue_full_total,
            relayed_bytes_total,
            stream_errors_total,
        })
    }

    pub fn active_streams(&self) -> i64 {
        self.active_streams.get()
    }

    pub fn jobs_in_flight(&self) -> i64 {
        self.jobs_in_flight.get()
    }

    pub fn acquire_timeouts(&self) -> u64 {
        self.acquire_timeouts_total.get()
    }

    pub fn limit_exceeded(&self) -> u64 {
        self.limit_exceeded_total.get()
    }

    pub fn queue_full(&self) -> u64 {
        self.queue_full_total.get()
    }

    pub fn relayed_bytes(&self) -> u64 {
        self.relayed_bytes_total.get()
    }

    pub fn stream_errors(&self, code: &str, after_first_byte: bool) -> u64 {
        self.stream_errors_total
            .with_label_values(&[code, phase_label(after_first_byte)])
            .get()
    }

    /// Prometheus text exposition of every metric in this registry.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
    }
}

fn phase_label(after_first_byte: bool) -> &'static str {
    if after_first_byte { "streaming" } else { "setup" }
}

impl Observer for GatewayMetrics {
    fn slot_acquired(&self) {
        self.active_streams.inc();
    }

    fn slot_released(&self) {
        self.active_streams.dec();
    }

    fn acquire_timed_out(&self) {
        self.acquire_timeouts_total.inc();
    }

    fn limit_exceeded(&self) {
        self.limit_exceeded_total.inc();
    }

    fn queue_full(&self) {
        self.queue_full_total.inc();
    }

    fn job_started(&self) {
        self.jobs_in_flight.inc();
    }

    fn job_finished(&self) {
        self.jobs_in_flight.dec();
    }

    fn bytes_relayed(&self, bytes: u64) {
        self.relayed_bytes_total.inc_by(bytes);
    }

    fn stream_failed(&self, code: &'static str, after_first_byte: bool) {
        self.stream_errors_total
            .with_label_values(&[code, phase_label(after_first_byte)])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_hooks_update_metrics() {
        let metrics = GatewayMetrics::new().unwrap();

        metrics.slot_acquired();
        metrics.slot_acquired();
        metrics.slot_released();
        metrics.acquire_timed_out();
        Observer::queue_full(&metrics);
        Observer::queue_full(&metrics);
        metrics.bytes_relayed(10);
        metrics.stream_failed("backend_error", true);

        assert_eq!(metrics.active_streams(), 1);
        assert_eq!(metrics.acquire_timeouts(), 1);
        assert_eq!(metrics.queue_full(), 2);
        assert_eq!(metrics.relayed_bytes(), 10);
        assert_eq!(metrics.stream_errors("backend_error", true), 1);
        assert_eq!(metrics.stream_errors("backend_error", false), 0);
    }

    #[test]
    fn render_uses_prometheus_text_format() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.slot_acquired();
        metrics.acquire_timed_out();

        let text = metrics.render();
        assert!(text.contains("# TYPE tts_gateway_active_streams gauge"));
        assert!(text.contains("tts_gateway_active_streams 1"));
        assert!(text.contains("# TYPE tts_gateway_acquire_timeouts_total counter"));
        assert!(text.contains("tts_gateway_acquire_timeouts_total 1"));
        assert!(text.contains("tts_gateway_queue_full_total 0"));
    }

    #[test]
    fn registries_are_independent() {
        let a = GatewayMetrics::new().unwrap();
        let b = GatewayMetrics::new().unwrap();
        Observer::queue_full(&a);
        assert_eq!(a.queue_full(), 1);
        assert_eq!(b.queue_full(), 0);
    }
}
