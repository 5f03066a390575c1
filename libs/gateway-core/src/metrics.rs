use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram};
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

/// Delivery-path metrics the primary worker pool MUST maintain (spec §4.5).
#[derive(Clone)]
pub struct DeliveryMetrics {
    pub deliveries: Family<DeliveryLabels, Counter>,
    pub retries: Family<RetryLabels, Counter>,
    pub dlq_entries: Family<SubscriptionLabel, Counter>,
    pub latency: Family<SubscriptionLabel, Histogram>,
    pub active_workers: Gauge,
    pub stream_length: Gauge,
    pub registry: Arc<Registry>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SubscriptionLabel {
    pub subscription_id: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeliveryLabels {
    pub subscription_id: String,
    pub outcome: DeliveryOutcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelValue)]
pub enum DeliveryOutcome {
    Success,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RetryLabels {
    pub subscription_id: String,
    pub attempt: u32,
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("o2ims_delivery");
        let deliveries = Family::<DeliveryLabels, Counter>::default();
        let retries = Family::<RetryLabels, Counter>::default();
        let dlq_entries = Family::<SubscriptionLabel, Counter>::default();
        let latency = Family::<SubscriptionLabel, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1., 5., 10., 30.].into_iter())
        });
        let active_workers = Gauge::default();
        let stream_length = Gauge::default();

        registry.register(
            "deliveries",
            "Webhook deliveries by subscription and outcome",
            deliveries.clone(),
        );
        registry.register(
            "retries",
            "Delivery retries by subscription and attempt number",
            retries.clone(),
        );
        registry.register(
            "dlq_entries",
            "Dead-letter entries by subscription",
            dlq_entries.clone(),
        );
        registry.register_with_unit(
            "latency",
            "Per-subscription delivery latency",
            Unit::Seconds,
            latency.clone(),
        );
        registry.register(
            "active_workers",
            "Number of primary delivery workers currently running",
            active_workers.clone(),
        );
        registry.register(
            "stream_length",
            "Approximate length of the primary event stream",
            stream_length.clone(),
        );

        Self {
            deliveries,
            retries,
            dlq_entries,
            latency,
            active_workers,
            stream_length,
            registry: Arc::new(registry),
        }
    }
}

impl DeliveryMetrics {
    pub fn record_success(&self, subscription_id: &str) {
        self.deliveries
            .get_or_create(&DeliveryLabels {
                subscription_id: subscription_id.to_owned(),
                outcome: DeliveryOutcome::Success,
            })
            .inc();
    }

    pub fn record_failure(&self, subscription_id: &str) {
        self.deliveries
            .get_or_create(&DeliveryLabels {
                subscription_id: subscription_id.to_owned(),
                outcome: DeliveryOutcome::Failed,
            })
            .inc();
    }

    pub fn record_retry(&self, subscription_id: &str, attempt: u32) {
        self.retries
            .get_or_create(&RetryLabels {
                subscription_id: subscription_id.to_owned(),
                attempt,
            })
            .inc();
    }

    pub fn record_dlq(&self, subscription_id: &str) {
        self.dlq_entries
            .get_or_create(&SubscriptionLabel {
                subscription_id: subscription_id.to_owned(),
            })
            .inc();
    }

    pub fn measure(&self, subscription_id: &str) -> DeliveryMeasurer {
        DeliveryMeasurer {
            start: Instant::now(),
            subscription_id: subscription_id.to_owned(),
            metric: self.latency.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("registry encodes to OpenMetrics text");
        buffer
    }
}

/// Records a single delivery attempt's wall-clock duration into the
/// per-subscription histogram on drop, mirroring the teacher's
/// `ReconcileMeasurer`.
pub struct DeliveryMeasurer {
    start: Instant,
    subscription_id: String,
    metric: Family<SubscriptionLabel, Histogram>,
}

impl Drop for DeliveryMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric
            .get_or_create(&SubscriptionLabel {
                subscription_id: std::mem::take(&mut self.subscription_id),
            })
            .observe(duration);
    }
}
