//! Process-wide lookup rate limiting
//!
//! A single [`RateLimiter`] is shared by every worker of every job. It is a
//! GCRA token bucket (via `governor`): `burst` permits are available at once
//! and the bucket refills continuously at `requests_per_second`.
//!
//! Callers that find the bucket empty sleep until their turn, racing that
//! sleep against a [`CancellationToken`] so a cancelled job never stays
//! parked on the limiter.

use async_trait::async_trait;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota,
};
use std::num::NonZeroU32;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("permit wait cancelled")]
    Cancelled,
}

/// Gate in front of every external lookup.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait for one permit, or fail once `cancel` fires.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError>;

    /// Take a permit only if one is available right now.
    fn try_acquire(&self) -> bool;
}

type Direct<C> = governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: Direct<C>,
    clock: C,
}

impl RateLimiter<DefaultClock> {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self::with_clock(requests_per_second, burst, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(requests_per_second: u32, burst: u32, clock: C) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: governor::RateLimiter::direct_with_clock(quota, &clock),
            clock,
        }
    }
}

#[async_trait]
impl<C> Throttle for RateLimiter<C>
where
    C: Clock + Send + Sync,
    C::Instant: Send + Sync,
{
    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            let wait = match self.limiter.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };

            trace!(wait_ms = wait.as_millis() as u64, "Waiting for lookup permit");

            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {},
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
