//! Token bucket pacing for outbound classification calls
//!
//! LLM providers enforce per-minute request quotas. Batch classification
//! paces itself through a token bucket instead of sleeping a fixed time:
//! - Units refill at `refill_rate` per second up to `burst_units`
//! - Each gap between two records costs `request_cost` units
//! - Each gap between two groups additionally costs `batch_cost` units
//! - Waiting happens on the tokio timer, so it can be raced against
//!   cancellation and fast-forwarded with a paused clock in tests

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ThrottleConfig;

/// Kind of pause taken between classification calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gap {
    /// Between two consecutive records
    Request,
    /// Between two consecutive groups of a batch
    Batch,
}

/// Token bucket shared by every clone
#[derive(Debug)]
pub struct TokenBucket {
    inner: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    available_units: f64,
    max_units: f64,
    refill_rate: f64,
    last_refill: Instant,
    total_consumed: f64,
    total_acquisitions: u64,
    total_waited: Duration,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available_units = (self.available_units + elapsed * self.refill_rate).min(self.max_units);
        self.last_refill = now;
    }

    fn consume(&mut self, units: f64) {
        self.available_units -= units;
        self.total_consumed += units;
        self.total_acquisitions += 1;
    }
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// # Arguments
    /// * `refill_rate` - Units added per second
    /// * `max_units` - Burst capacity
    pub fn with_config(refill_rate: f64, max_units: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BucketState {
                available_units: max_units,
                max_units,
                refill_rate,
                last_refill: Instant::now(),
                total_consumed: 0.0,
                total_acquisitions: 0,
                total_waited: Duration::ZERO,
            })),
        }
    }

    /// Take `units` from the bucket, waiting for the refill if needed
    ///
    /// Requests above the burst capacity are capped at the capacity.
    pub async fn acquire(&self, units: f64) -> ThrottlePermit {
        let mut waited = Duration::ZERO;

        loop {
            let wait_time = {
                let mut state = self.inner.lock().await;
                state.refill();
                let needed = units.min(state.max_units).max(0.0);

                trace!(
                    "Bucket state: {:.1}/{:.1} units available, requesting {:.1}",
                    state.available_units,
                    state.max_units,
                    needed
                );

                if state.available_units >= needed {
                    state.consume(needed);
                    state.total_waited += waited;
                    debug!(
                        "Acquired {:.1} units, {:.1} remaining",
                        needed,
                        state.available_units
                    );
                    return ThrottlePermit { waited };
                }

                let deficit = needed - state.available_units;
                Duration::from_secs_f64(deficit / state.refill_rate)
            };

            // Sleep outside the lock so other callers can refill and inspect
            debug!(
                "Throttle exhausted, waiting {:.2}s for {:.1} units",
                wait_time.as_secs_f64(),
                units
            );
            tokio::time::sleep(wait_time).await;
            waited += wait_time;
        }
    }

    /// Take `units` only if they are available right now
    pub async fn try_acquire(&self, units: f64) -> Option<ThrottlePermit> {
        let mut state = self.inner.lock().await;
        state.refill();

        if state.available_units >= units {
            state.consume(units);
            Some(ThrottlePermit {
                waited: Duration::ZERO,
            })
        } else {
            None
        }
    }

    pub async fn stats(&self) -> ThrottleStats {
        let mut state = self.inner.lock().await;
        state.refill();
        ThrottleStats {
            available_units: state.available_units,
            max_units: state.max_units,
            refill_rate: state.refill_rate,
            total_consumed: state.total_consumed,
            total_acquisitions: state.total_acquisitions,
            total_waited: state.total_waited,
        }
    }

    /// Units available right now, without consuming any
    pub async fn available(&self) -> f64 {
        let mut state = self.inner.lock().await;
        state.refill();
        state.available_units
    }
}

impl Clone for TokenBucket {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Returned by a successful acquisition
#[derive(Debug)]
pub struct ThrottlePermit {
    waited: Duration,
}

impl ThrottlePermit {
    /// Time spent waiting for the refill
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

#[derive(Debug, Clone)]
pub struct ThrottleStats {
    pub available_units: f64,
    pub max_units: f64,
    pub refill_rate: f64,
    pub total_consumed: f64,
    pub total_acquisitions: u64,
    pub total_waited: Duration,
}

/// Pacing policy consulted by the batch loop
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait until a call separated by `gap` may proceed
    async fn pace(&self, gap: Gap);
}

/// Production throttle: charges each gap against a token bucket
#[derive(Debug, Clone)]
pub struct TokenBucketThrottle {
    bucket: TokenBucket,
    request_cost: f64,
    batch_cost: f64,
}

impl TokenBucketThrottle {
    pub fn new(bucket: TokenBucket, request_cost: f64, batch_cost: f64) -> Self {
        Self {
            bucket,
            request_cost,
            batch_cost,
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(
            TokenBucket::with_config(config.refill_rate, config.burst_units),
            config.request_cost,
            config.batch_cost,
        )
    }

    pub fn cost(&self, gap: Gap) -> f64 {
        match gap {
            Gap::Request => self.request_cost,
            Gap::Batch => self.batch_cost,
        }
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

#[async_trait]
impl Throttle for TokenBucketThrottle {
    async fn pace(&self, gap: Gap) {
        let permit = self.bucket.acquire(self.cost(gap)).await;
        if !permit.waited().is_zero() {
            trace!(?gap, waited_ms = permit.waited().as_millis() as u64, "Paced");
        }
    }
}

/// Never waits
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThrottle;

#[async_trait]
impl Throttle for NoThrottle {
    async fn pace(&self, _gap: Gap) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The paused clock rounds timers up to the next millisecond
    fn assert_elapsed(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_immediate_from_full_bucket() {
        let bucket = TokenBucket::with_config(1.0, 5.0);

        let permit = bucket.acquire(2.0).await;
        assert!(permit.waited().is_zero());

        let stats = bucket.stats().await;
        assert_eq!(stats.total_acquisitions, 1);
        assert_eq!(stats.total_consumed, 2.0);
        assert!((stats.available_units - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_insufficient() {
        let bucket = TokenBucket::with_config(1.0, 2.0);
        assert!(bucket.try_acquire(5.0).await.is_none());
        assert!(bucket.try_acquire(2.0).await.is_some());
        assert!(bucket.try_acquire(0.5).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::with_config(1.0, 5.0);
        bucket.acquire(5.0).await;

        let start = Instant::now();
        let permit = bucket.acquire(2.0).await;

        // Two units at one unit per second
        assert_elapsed(start.elapsed(), Duration::from_secs(2));
        assert_elapsed(permit.waited(), Duration::from_secs(2));
        assert_elapsed(bucket.stats().await.total_waited, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let bucket = TokenBucket::with_config(10.0, 5.0);
        bucket.acquire(5.0).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!((bucket.available().await - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_capped() {
        let bucket = TokenBucket::with_config(1.0, 3.0);
        let permit = bucket.acquire(10.0).await;
        assert!(permit.waited().is_zero());
        assert_eq!(bucket.stats().await.total_consumed, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_state() {
        let bucket = TokenBucket::with_config(1.0, 4.0);
        let clone = bucket.clone();

        clone.acquire(4.0).await;
        assert!(bucket.try_acquire(1.0).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_pacing_matches_fixed_delays() {
        // Steady state: a request gap costs 2s and a batch gap costs 5s
        let throttle = TokenBucketThrottle::from_config(&ThrottleConfig::default());
        throttle.bucket().acquire(5.0).await;

        let start = Instant::now();
        throttle.pace(Gap::Request).await;
        assert_elapsed(start.elapsed(), Duration::from_secs(2));

        let start = Instant::now();
        throttle.pace(Gap::Batch).await;
        assert_elapsed(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_throttle_never_waits() {
        let start = Instant::now();
        for _ in 0..100 {
            NoThrottle.pace(Gap::Batch).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
