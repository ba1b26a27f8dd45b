//! Prometheus metrics: the two gauges the original exposes
//! (`registryindexer_actions_in_queue`, `registryindexer_images_total`)
//! plus a request-duration histogram for the read API.

use prometheus::{Encoder, Gauge, HistogramVec, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub actions_in_queue: Gauge,
    pub images_total: Gauge,
    pub request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let actions_in_queue = Gauge::new(
            "registryindexer_actions_in_queue",
            "Number of actions currently queued for the indexing engine.",
        )
        .expect("valid metric descriptor");
        let images_total = Gauge::new(
            "registryindexer_images_total",
            "Total number of images currently held in the index.",
        )
        .expect("valid metric descriptor");
        let request_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "registryindexer_request_duration_seconds",
                "Read API request duration in seconds.",
            ),
            &["path", "method"],
        )
        .expect("valid metric descriptor");

        registry
            .register(Box::new(actions_in_queue.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(images_total.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("unique metric name");

        Metrics {
            registry,
            actions_in_queue,
            images_total,
            request_duration,
        }
    }

    /// Renders the registered metrics in the Prometheus text exposition
    /// format, for `GET /metrics`.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}
