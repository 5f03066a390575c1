//! Primary Delivery Worker Pool (spec §4.5): drains the durable event log
//! under the `webhook-workers` consumer group and dispatches matching
//! subscriptions over HTTP, with retry and dead-letter routing.

pub mod dispatch;
pub mod dlq;
pub mod retry;
pub mod worker;

pub use dispatch::{dispatch_once, DispatchOutcome};
pub use dlq::{route_to_dlq, DLQ_STREAM_KEY};
pub use retry::{backoff_for_attempt, run_with_retries, RetryOutcome};
pub use worker::{DeliveryConfig, PrimaryWorkerPool, CONSUMER_GROUP};
