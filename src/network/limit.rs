//! Fixed-interval pacing.
//!
//! Both the outbound write loop and task admission allow one event per
//! configured interval with no burst. A zero interval disables pacing.

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Type alias for governor's direct rate limiter.
pub type Pacer = governor::DefaultDirectRateLimiter;

/// Build a limiter that admits one event per `interval`.
pub fn pacer(interval: Duration) -> Pacer {
    let quota = Quota::with_period(interval)
        .unwrap_or_else(|| Quota::per_second(nonzero!(1_000_000u32)));
    RateLimiter::direct(quota)
}

/// Wait for the next slot. Returns `false` if `cancel` fired first.
pub async fn wait(pacer: &Pacer, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = pacer.until_ready() => true,
    }
}
