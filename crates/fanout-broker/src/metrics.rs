use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message counters, by queue
    pub published_total: IntCounterVec,
    pub delivered_total: IntCounterVec,
    pub acked_total: IntCounterVec,
    pub rejected_total: IntCounterVec,
    pub requeued_total: IntCounterVec,

    // Queue depth
    pub queue_ready: IntGaugeVec,
    pub queue_unacked: IntGaugeVec,

    // Sessions and leases
    pub sessions_open: IntGauge,
    pub workers_registered: IntGaugeVec,
}

impl BrokerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let published_total = IntCounterVec::new(
            Opts::new("fanout_messages_published_total", "Messages published by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(published_total.clone()))?;

        let delivered_total = IntCounterVec::new(
            Opts::new("fanout_messages_delivered_total", "Messages handed to consumers by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(delivered_total.clone()))?;

        let acked_total = IntCounterVec::new(
            Opts::new("fanout_messages_acked_total", "Messages acknowledged by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(acked_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("fanout_messages_rejected_total", "Messages rejected and discarded by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let requeued_total = IntCounterVec::new(
            Opts::new(
                "fanout_messages_requeued_total",
                "Messages returned to their queue after reject or session loss",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(requeued_total.clone()))?;

        let queue_ready = IntGaugeVec::new(
            Opts::new("fanout_queue_ready", "Messages waiting for a consumer"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_ready.clone()))?;

        let queue_unacked = IntGaugeVec::new(
            Opts::new("fanout_queue_unacked", "Messages delivered but not yet settled"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_unacked.clone()))?;

        let sessions_open = IntGauge::new("fanout_sessions_open", "Open client sessions")?;
        registry.register(Box::new(sessions_open.clone()))?;

        let workers_registered = IntGaugeVec::new(
            Opts::new("fanout_workers_registered", "Live worker leases by queue"),
            &["queue"],
        )?;
        registry.register(Box::new(workers_registered.clone()))?;

        Ok(BrokerMetrics {
            registry,
            published_total,
            delivered_total,
            acked_total,
            rejected_total,
            requeued_total,
            queue_ready,
            queue_unacked,
            sessions_open,
            workers_registered,
        })
    }

    /// Update depth gauges for one queue
    pub fn update_queue_depth(&self, queue: &str, ready: usize, unacked: usize) {
        self.queue_ready
            .with_label_values(&[queue])
            .set(ready as i64);
        self.queue_unacked
            .with_label_values(&[queue])
            .set(unacked as i64);
    }

    pub fn set_workers(&self, queue: &str, workers: usize) {
        self.workers_registered
            .with_label_values(&[queue])
            .set(workers as i64);
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
