//! HTTP Dispatch (spec §4.5.1): a single webhook POST attempt.

use std::time::Duration;

use gateway_http_util::sign_body;

use crate::model::ResourceEvent;

/// Outcome of one delivery attempt. Any non-2xx status, timeout, or
/// connection error is a failure (spec §4.5.1).
#[derive(Debug)]
pub struct DispatchOutcome {
    pub success: bool,
    pub status: Option<u16>,
}

/// Performs one POST of `body` (the serialized `event`) to `callback_url`,
/// signing it when `hmac_secret` is configured. Does not retry; the retry
/// engine (spec §4.5.2) owns that.
pub async fn dispatch_once(
    client: &reqwest::Client,
    callback_url: &str,
    event: &ResourceEvent,
    body: &[u8],
    hmac_secret: Option<&[u8]>,
    timeout: Duration,
) -> DispatchOutcome {
    let mut request = client
        .post(callback_url)
        .timeout(timeout)
        .header("Content-Type", "application/json")
        .header("X-O2IMS-Event-Type", event.notification_event_type.as_str())
        .header("X-O2IMS-Notification-ID", event.notification_id.as_str())
        .header("X-O2IMS-Subscription-ID", event.subscription_id.as_str())
        .body(body.to_vec());

    if let Some(secret) = hmac_secret {
        request = request.header("X-O2IMS-Signature", sign_body(secret, body));
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            DispatchOutcome {
                success: (200..300).contains(&status),
                status: Some(status),
            }
        }
        Err(_) => DispatchOutcome {
            success: false,
            status: None,
        },
    }
}
