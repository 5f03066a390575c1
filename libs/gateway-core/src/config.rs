use std::time::Duration;

use clap::Parser;

/// Every configuration knob the core recognizes (spec §6), with the
/// documented defaults. Mirrors the teacher's `Args` struct: `clap::Parser`
/// with `env` attrs so every flag doubles as an environment variable.
#[derive(Parser, Clone, Debug)]
pub struct GatewayConfig {
    /// Number of primary delivery workers sharing the `webhook-workers` consumer group.
    #[arg(long, default_value_t = 10, env)]
    pub worker_count: u32,

    /// Per-request webhook delivery timeout.
    #[arg(long, default_value_t = 10, env = "DELIVERY_TIMEOUT_SECS")]
    pub delivery_timeout_secs: u64,

    /// Maximum number of retries after the initial delivery attempt.
    #[arg(long, default_value_t = 3, env)]
    pub max_retries: u32,

    /// Base retry backoff duration.
    #[arg(long, default_value_t = 1, env = "RETRY_BACKOFF_SECS")]
    pub retry_backoff_secs: u64,

    /// Maximum retry backoff duration.
    #[arg(long, default_value_t = 300, env = "MAX_BACKOFF_SECS")]
    pub max_backoff_secs: u64,

    /// HMAC secret used to sign outbound webhook bodies. Empty disables signing.
    #[arg(long, default_value = "", env)]
    pub hmac_secret: String,

    /// Periodic full resync interval for the watch source.
    #[arg(long, default_value_t = 30, env = "INFORMER_RESYNC_PERIOD_SECS")]
    pub informer_resync_period_secs: u64,

    /// Approximate maximum length of the durable event log and DLQ streams.
    #[arg(long, default_value_t = 10_000, env)]
    pub max_stream_length: u64,

    /// Allow `http://` (non-TLS) subscription callback URLs. Test/dev only.
    #[arg(long, default_value_t = false, env)]
    pub allow_insecure_callbacks: bool,

    /// Identity of the O-Cloud this gateway serves; required, non-empty.
    #[arg(long, env)]
    pub o_cloud_id: String,

    /// Redis connection URL backing the durable log and subscription/hub stores.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env)]
    pub redis_url: String,

    /// Fixed ceiling on active subscriptions per tenant.
    #[arg(long, default_value_t = 1_000, env = "TENANT_SUBSCRIPTION_QUOTA")]
    pub tenant_subscription_quota: u64,
}

impl GatewayConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn informer_resync_period(&self) -> Duration {
        Duration::from_secs(self.informer_resync_period_secs)
    }

    pub fn hmac_secret(&self) -> Option<&[u8]> {
        if self.hmac_secret.is_empty() {
            None
        } else {
            Some(self.hmac_secret.as_bytes())
        }
    }
}
