use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub transition_latency_seconds: HistogramVec,
    pub assignments_total: IntCounterVec,
    pub location_samples_total: IntCounterVec,
    pub tracked_orders: IntGauge,
    pub stale_feeds: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order transitions by target status and outcome"),
            &["to", "outcome"],
        )
        .expect("valid order_transitions_total metric");

        let transition_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "transition_latency_seconds",
                "Time spent executing a transition, including waiting on the order lock",
            ),
            &["outcome"],
        )
        .expect("valid transition_latency_seconds metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Courier assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let location_samples_total = IntCounterVec::new(
            Opts::new("location_samples_total", "Location samples by outcome"),
            &["outcome"],
        )
        .expect("valid location_samples_total metric");

        let tracked_orders = IntGauge::new("tracked_orders", "Orders with an open location channel")
            .expect("valid tracked_orders metric");

        let stale_feeds = IntGauge::new("stale_feeds", "Location feeds currently flagged stale")
            .expect("valid stale_feeds metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(transition_latency_seconds.clone()))
            .expect("register transition_latency_seconds");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(location_samples_total.clone()))
            .expect("register location_samples_total");
        registry
            .register(Box::new(tracked_orders.clone()))
            .expect("register tracked_orders");
        registry
            .register(Box::new(stale_feeds.clone()))
            .expect("register stale_feeds");

        Self {
            registry,
            order_transitions_total,
            transition_latency_seconds,
            assignments_total,
            location_samples_total,
            tracked_orders,
            stale_feeds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
