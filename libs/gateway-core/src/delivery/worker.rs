//! Primary Delivery Worker Pool (spec §4.5): drains `o2ims:events` under
//! consumer group `webhook-workers`, fans out matching subscriptions, and
//! DLQs on retry exhaustion.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::delivery::dispatch::dispatch_once;
use crate::delivery::dlq::route_to_dlq;
use crate::delivery::retry::{run_with_retries, RetryOutcome};
use crate::log::{DurableEventLog, LogEntry};
use crate::metrics::DeliveryMetrics;
use crate::model::{ResourceEvent, Subscription};
use crate::store::SubscriptionStore;

pub const CONSUMER_GROUP: &str = "webhook-workers";
const READ_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Every knob the worker pool needs from [`crate::config::GatewayConfig`],
/// decoupled from it so the pool can be unit-tested without `clap`.
#[derive(Clone)]
pub struct DeliveryConfig {
    pub worker_count: u32,
    pub delivery_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    pub hmac_secret: Option<Vec<u8>>,
    pub max_stream_length: u64,
}

impl From<&crate::config::GatewayConfig> for DeliveryConfig {
    fn from(cfg: &crate::config::GatewayConfig) -> Self {
        Self {
            worker_count: cfg.worker_count,
            delivery_timeout: cfg.delivery_timeout(),
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff(),
            max_backoff: cfg.max_backoff(),
            hmac_secret: cfg.hmac_secret().map(|s| s.to_vec()),
            max_stream_length: cfg.max_stream_length,
        }
    }
}

/// Spawns `config.worker_count` workers sharing the primary consumer group.
/// Returns their join handles; drop the returned [`CancellationToken`] clone
/// (or call `cancel()` on it) to begin graceful shutdown (spec §4.5.5).
pub struct PrimaryWorkerPool {
    pub cancel: CancellationToken,
    pub handles: Vec<JoinHandle<()>>,
}

impl PrimaryWorkerPool {
    pub async fn spawn(
        log: Arc<dyn DurableEventLog>,
        subscriptions: Arc<dyn SubscriptionStore>,
        metrics: Arc<DeliveryMetrics>,
        http_client: reqwest::Client,
        config: DeliveryConfig,
    ) -> crate::error::Result<Self> {
        // Idempotent across all worker processes (spec §4.5.4).
        log.ensure_group(CONSUMER_GROUP).await?;

        let cancel = CancellationToken::new();
        let config = Arc::new(config);
        let mut handles = Vec::with_capacity(config.worker_count as usize);

        for worker_id in 0..config.worker_count {
            let log = log.clone();
            let subscriptions = subscriptions.clone();
            let metrics = metrics.clone();
            let http_client = http_client.clone();
            let config = config.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                run_worker(worker_id, log, subscriptions, metrics, http_client, config, cancel).await;
            }));
        }

        Ok(Self { cancel, handles })
    }

    /// Begins graceful shutdown and waits for every worker to finish its
    /// current attempt (spec §4.5.5).
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(msg = "worker task panicked during shutdown", %e);
            }
        }
    }
}

async fn run_worker(
    worker_id: u32,
    log: Arc<dyn DurableEventLog>,
    subscriptions: Arc<dyn SubscriptionStore>,
    metrics: Arc<DeliveryMetrics>,
    http_client: reqwest::Client,
    config: Arc<DeliveryConfig>,
    cancel: CancellationToken,
) {
    let consumer = format!("worker-{worker_id}");
    metrics.active_workers.inc();
    debug!(consumer, "primary delivery worker started");

    loop {
        let entry = tokio::select! {
            _ = cancel.cancelled() => break,
            result = log.read_group(CONSUMER_GROUP, &consumer, READ_BLOCK_TIMEOUT) => result,
        };

        match entry {
            Ok(Some(entry)) => {
                handle_message(&entry, &log, &subscriptions, &metrics, &http_client, &config, &cancel).await;
            }
            Ok(None) => continue, // read timed out; loop and check cancellation
            Err(e) => {
                warn!(consumer, %e, "consumer-group read failed, retrying");
            }
        }
    }

    metrics.active_workers.dec();
    debug!(consumer, "primary delivery worker stopped");
}

/// Per-message handling sequence (spec §4.5). The message is acknowledged
/// unconditionally at the end, regardless of any individual target's
/// delivery outcome, so it is never re-delivered by the log layer.
async fn handle_message(
    entry: &LogEntry,
    log: &Arc<dyn DurableEventLog>,
    subscriptions: &Arc<dyn SubscriptionStore>,
    metrics: &Arc<DeliveryMetrics>,
    http_client: &reqwest::Client,
    config: &DeliveryConfig,
    cancel: &CancellationToken,
) {
    let Some(raw) = entry.field("event") else {
        warn!(id = %entry.id, "log entry missing 'event' field, acknowledging poison pill");
        ack(log, &entry.id).await;
        return;
    };

    let event: ResourceEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(id = %entry.id, %e, "undecodable event, acknowledging poison pill");
            ack(log, &entry.id).await;
            return;
        }
    };

    let targets = match resolve_targets(&event, subscriptions).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(id = %entry.id, %e, "failed to resolve target subscriptions, acknowledging");
            ack(log, &entry.id).await;
            return;
        }
    };

    for sub in targets {
        // Re-check the filter to tolerate subscription mutation between
        // emission and delivery (spec §4.5, per-message handling step 2).
        let (pool, type_id, resource_id) = event.candidate();
        if !sub.filter.matches(pool, type_id, resource_id) {
            continue;
        }
        deliver_to_subscription(&event, &entry.id, &sub, log, metrics, http_client, config, cancel).await;
    }

    ack(log, &entry.id).await;
}

async fn resolve_targets(
    event: &ResourceEvent,
    subscriptions: &Arc<dyn SubscriptionStore>,
) -> crate::error::Result<Vec<Subscription>> {
    if event.subscription_id.is_empty() {
        subscriptions.list().await
    } else {
        match subscriptions.get(&event.subscription_id).await {
            Ok(sub) => Ok(vec![sub]),
            Err(crate::error::Error::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

async fn deliver_to_subscription(
    event: &ResourceEvent,
    message_id: &str,
    sub: &Subscription,
    log: &Arc<dyn DurableEventLog>,
    metrics: &Arc<DeliveryMetrics>,
    http_client: &reqwest::Client,
    config: &DeliveryConfig,
    cancel: &CancellationToken,
) {
    let mut targeted = event.clone();
    targeted.subscription_id = sub.id.clone();
    targeted.callback_url = sub.callback_url.clone();
    let body = match serde_json::to_vec(&targeted) {
        Ok(body) => body,
        Err(e) => {
            error!(subscription_id = %sub.id, %e, "failed to serialize outbound event");
            metrics.record_failure(&sub.id);
            return;
        }
    };

    let _measurer = metrics.measure(&sub.id);
    let hmac_secret = config.hmac_secret.as_deref();

    let outcome = run_with_retries(
        config.max_retries,
        config.retry_backoff,
        config.max_backoff,
        cancel,
        |attempt| metrics.record_retry(&sub.id, attempt),
        |_attempt| {
            let sub = sub.clone();
            let targeted = targeted.clone();
            let body = body.clone();
            async move {
                let result = dispatch_once(
                    http_client,
                    &sub.callback_url,
                    &targeted,
                    &body,
                    hmac_secret,
                    config.delivery_timeout,
                )
                .await;
                result.success.then_some(())
            }
        },
    )
    .await;

    match outcome {
        RetryOutcome::Success(()) => {
            metrics.record_success(&sub.id);
        }
        RetryOutcome::Cancelled => {
            // Shutdown cut the retry schedule short; leave the event
            // undelivered rather than DLQ-routing mid-shutdown.
            debug!(subscription_id = %sub.id, "delivery cancelled during shutdown");
        }
        RetryOutcome::Exhausted => {
            metrics.record_failure(&sub.id);
            metrics.record_dlq(&sub.id);
            let event_json = serde_json::to_string(&targeted).unwrap_or_default();
            if let Err(e) =
                route_to_dlq(log.as_ref(), config.max_stream_length, &event_json, message_id, &sub.id).await
            {
                error!(subscription_id = %sub.id, %e, "DLQ write failed after retry exhaustion");
            }
        }
    }
}

async fn ack(log: &Arc<dyn DurableEventLog>, id: &str) {
    if let Err(e) = log.ack(CONSUMER_GROUP, id).await {
        error!(id, %e, "failed to acknowledge message");
    }
}
