//! Dead-Letter Routing (spec §4.5.3): terminal delivery failures are
//! appended to the `o2ims:dlq` stream with the original event, the original
//! message ID, the failure timestamp, and the subscription ID.

use chrono::Utc;
use tracing::error;

use crate::log::DurableEventLog;

pub const DLQ_STREAM_KEY: &str = "o2ims:dlq";

/// Appends a dead-letter entry. DLQ writes MUST NOT fail silently (spec
/// §4.5.3): a failure here is logged and metered by the caller, who passes
/// the subscription ID through for that purpose.
pub async fn route_to_dlq(
    log: &dyn DurableEventLog,
    max_length: u64,
    original_event_json: &str,
    original_message_id: &str,
    subscription_id: &str,
) -> crate::error::Result<()> {
    let failed_at = Utc::now().to_rfc3339();
    let fields = [
        ("event", original_event_json),
        ("original_id", original_message_id),
        ("failed_at", failed_at.as_str()),
        ("subscription_id", subscription_id),
    ];

    log.append(&fields, max_length).await.map(|_| ()).map_err(|e| {
        error!(
            msg = "DLQ write failed",
            subscription_id,
            original_message_id,
            %e,
        );
        e
    })
}
