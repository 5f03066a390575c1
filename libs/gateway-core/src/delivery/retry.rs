//! Retry Engine (spec §4.5.2): exponential backoff shared by the primary
//! delivery path and the federation publisher's per-hub fan-out.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Backoff before attempt `i` (i ≥ 1): `min(base * 2^(i-1), max_backoff)`.
/// Attempt 0 (the initial POST) has no backoff.
pub fn backoff_for_attempt(attempt: u32, base: Duration, max_backoff: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    base.checked_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX))
        .unwrap_or(max_backoff)
        .min(max_backoff)
}

/// Outcome of running an attempt sequence to completion.
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted,
    Cancelled,
}

/// Drives `attempt` for attempts `0..=max_retries`, sleeping the backoff
/// before each retry and honoring `cancel` during both the sleep and the
/// attempt itself (spec §5: "all sleeps... are cancellable").
///
/// `attempt` returns `Some(value)` on success, `None` on failure. `on_retry`
/// is invoked with the attempt number about to be (re)tried, after the first
/// failure, for metering (spec §4.5.2: "each retry is metered by attempt
/// number").
pub async fn run_with_retries<T, Fut>(
    max_retries: u32,
    base: Duration,
    max_backoff: Duration,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(u32),
    mut attempt: impl FnMut(u32) -> Fut,
) -> RetryOutcome<T>
where
    Fut: std::future::Future<Output = Option<T>>,
{
    for i in 0..=max_retries {
        if i > 0 {
            on_retry(i);
            let sleep = tokio::time::sleep(backoff_for_attempt(i, base, max_backoff));
            tokio::select! {
                _ = sleep => {}
                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
            }
        }

        tokio::select! {
            result = attempt(i) => {
                if let Some(value) = result {
                    return RetryOutcome::Success(value);
                }
            }
            _ = cancel.cancelled() => return RetryOutcome::Cancelled,
        }
    }
    RetryOutcome::Exhausted
}
