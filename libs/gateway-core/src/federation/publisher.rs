//! Federation Publisher (spec §4.6): a second, independent consumer group
//! over the same event log, fanning each event out to every matching hub
//! with its own retry budget, isolated from the primary delivery path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::delivery::retry::{run_with_retries, RetryOutcome};
use crate::federation::matcher::HubMatcher;
use crate::federation::transform::FederationTransform;
use crate::log::DurableEventLog;
use crate::metrics::DeliveryMetrics;
use crate::model::ResourceEvent;
use crate::store::hub::HubStore;

pub const CONSUMER_GROUP: &str = "tmf688-event-delivery";
pub const CONSUMER_NAME: &str = "tmf688-consumer";
const READ_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct FederationConfig {
    pub delivery_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    pub hmac_secret: Option<Vec<u8>>,
}

impl From<&crate::config::GatewayConfig> for FederationConfig {
    fn from(cfg: &crate::config::GatewayConfig) -> Self {
        Self {
            delivery_timeout: cfg.delivery_timeout(),
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff(),
            max_backoff: cfg.max_backoff(),
            hmac_secret: cfg.hmac_secret().map(|s| s.to_vec()),
        }
    }
}

/// Single-reader federation path: one task reads the log under
/// `tmf688-event-delivery`, fans each event out to matching hubs via
/// ephemeral per-hub tasks, and acknowledges once all of them return.
pub struct FederationPublisher {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl FederationPublisher {
    pub async fn spawn(
        log: Arc<dyn DurableEventLog>,
        hubs: Arc<dyn HubStore>,
        transform: Arc<dyn FederationTransform>,
        matcher: Arc<dyn HubMatcher>,
        metrics: Arc<DeliveryMetrics>,
        http_client: reqwest::Client,
        config: FederationConfig,
    ) -> crate::error::Result<Self> {
        log.ensure_group(CONSUMER_GROUP).await?;

        let cancel = CancellationToken::new();
        let config = Arc::new(config);
        let cancel_task = cancel.clone();
        let handle = tokio::spawn(async move {
            run_publisher(log, hubs, transform, matcher, metrics, http_client, config, cancel_task).await;
        });

        Ok(Self { cancel, handle })
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(msg = "federation publisher task panicked during shutdown", %e);
        }
    }
}

async fn run_publisher(
    log: Arc<dyn DurableEventLog>,
    hubs: Arc<dyn HubStore>,
    transform: Arc<dyn FederationTransform>,
    matcher: Arc<dyn HubMatcher>,
    metrics: Arc<DeliveryMetrics>,
    http_client: reqwest::Client,
    config: Arc<FederationConfig>,
    cancel: CancellationToken,
) {
    debug!("federation publisher started");
    loop {
        let entry = tokio::select! {
            _ = cancel.cancelled() => break,
            result = log.read_group(CONSUMER_GROUP, CONSUMER_NAME, READ_BLOCK_TIMEOUT) => result,
        };

        match entry {
            Ok(Some(entry)) => {
                let Some(raw) = entry.field("event") else {
                    warn!(id = %entry.id, "federation entry missing 'event' field, acknowledging poison pill");
                    ack(&log, &entry.id).await;
                    continue;
                };
                let event: ResourceEvent = match serde_json::from_str(raw) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(id = %entry.id, %e, "undecodable federation event, acknowledging poison pill");
                        ack(&log, &entry.id).await;
                        continue;
                    }
                };

                fan_out(&event, &hubs, &transform, &matcher, &metrics, &http_client, &config, &cancel).await;
                ack(&log, &entry.id).await;
            }
            Ok(None) => continue,
            Err(e) => warn!(%e, "federation consumer-group read failed, retrying"),
        }
    }
    debug!("federation publisher stopped");
}

/// Lists hubs, matches, and concurrently delivers to every match, joining
/// every per-hub task before returning (spec §4.6: "Acknowledge after all
/// goroutines return"). Failures on individual hubs are logged, never
/// propagated — they never block acknowledgment.
async fn fan_out(
    event: &ResourceEvent,
    hubs: &Arc<dyn HubStore>,
    transform: &Arc<dyn FederationTransform>,
    matcher: &Arc<dyn HubMatcher>,
    metrics: &Arc<DeliveryMetrics>,
    http_client: &reqwest::Client,
    config: &Arc<FederationConfig>,
    cancel: &CancellationToken,
) {
    let registrations = match hubs.list().await {
        Ok(regs) => regs,
        Err(e) => {
            error!(%e, "failed to list hub registrations, skipping federation fan-out");
            return;
        }
    };

    let federation_event = transform.transform(event);
    let body = match serde_json::to_vec(&federation_event) {
        Ok(body) => body,
        Err(e) => {
            error!(%e, "failed to serialize federation event");
            return;
        }
    };

    let tasks: Vec<_> = registrations
        .into_iter()
        .filter(|hub| matcher.matches(hub, event))
        .map(|hub| {
            let body = body.clone();
            let http_client = http_client.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                deliver_to_hub(&hub.id, &hub.callback, &body, &http_client, &config, &cancel, &metrics).await;
            })
        })
        .collect();

    for task in tasks {
        if let Err(e) = task.await {
            error!(%e, "federation delivery task panicked");
        }
    }
}

async fn deliver_to_hub(
    hub_id: &str,
    callback: &str,
    body: &[u8],
    http_client: &reqwest::Client,
    config: &FederationConfig,
    cancel: &CancellationToken,
    metrics: &Arc<DeliveryMetrics>,
) {
    let hmac_secret = config.hmac_secret.as_deref();
    let outcome = run_with_retries(
        config.max_retries,
        config.retry_backoff,
        config.max_backoff,
        cancel,
        |attempt| metrics.record_retry(hub_id, attempt),
        |_attempt| {
            let body = body.to_vec();
            async move {
                let response = http_client
                    .post(callback)
                    .timeout(config.delivery_timeout)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .send()
                    .await;
                match response {
                    Ok(resp) if (200..300).contains(&resp.status().as_u16()) => Some(()),
                    _ => None,
                }
            }
        },
    )
    .await;

    match outcome {
        RetryOutcome::Success(()) => metrics.record_success(hub_id),
        RetryOutcome::Cancelled => {
            debug!(hub_id, "federation delivery cancelled during shutdown");
        }
        RetryOutcome::Exhausted => {
            warn!(hub_id, "federation delivery exhausted retries, dropping");
            metrics.record_failure(hub_id);
        }
    }
}

async fn ack(log: &Arc<dyn DurableEventLog>, id: &str) {
    if let Err(e) = log.ack(CONSUMER_GROUP, id).await {
        error!(id, %e, "failed to acknowledge federation message");
    }
}
