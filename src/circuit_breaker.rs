//! Per-provider circuit breaker
//!
//! A provider that keeps failing with transient errors (timeouts, 429s, 5xx)
//! is skipped for a cool-down period instead of being called, and timing out,
//! on every email of a batch.
//!
//! # Circuit States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Threshold exceeded, the provider is skipped
//! - **HalfOpen**: Cool-down elapsed, the next request probes the provider
//!
//! # Usage
//!
//! ```no_run
//! use email_triage::circuit_breaker::CircuitBreaker;
//! use email_triage::config::CircuitBreakerConfig;
//! use email_triage::error::TriageError;
//!
//! # async fn example() -> Result<(), TriageError> {
//! let breaker = CircuitBreaker::new("openai", CircuitBreakerConfig::default());
//!
//! breaker.check_request().await?;
//!
//! let result: Result<(), TriageError> = Ok(());
//! match result {
//!     Ok(_) => breaker.record_success().await,
//!     Err(ref e) => breaker.record_failure(e).await,
//! }
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    /// Consecutive transient failures
    failure_count: u32,
    opened_at: Option<Instant>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerState {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            config,
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.config.reset_timeout_secs)
    }

    fn should_allow_request(&mut self, provider: &str) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let Some(opened_at) = self.opened_at else {
                    warn!(provider, "Circuit open without a timestamp, closing");
                    self.state = CircuitState::Closed;
                    return Ok(());
                };

                let elapsed = opened_at.elapsed();
                let timeout = self.reset_timeout();
                if elapsed >= timeout {
                    debug!(provider, "Circuit half-open after {:?}", elapsed);
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(TriageError::CircuitBreakerOpen {
                        message: format!(
                            "{} skipped after {} consecutive failures",
                            provider, self.failure_count
                        ),
                        retry_after_secs: (timeout - elapsed).as_secs(),
                    })
                }
            }
        }
    }

    fn record_success(&mut self, provider: &str) {
        if !self.config.enabled {
            return;
        }

        if self.state != CircuitState::Closed {
            debug!(provider, "Request succeeded, closing circuit");
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    fn record_failure(&mut self, provider: &str, error: &TriageError) {
        if !self.config.enabled || !should_count_as_failure(error) {
            return;
        }

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                debug!(
                    provider,
                    "Failure {}/{} in closed state",
                    self.failure_count,
                    self.config.failure_threshold
                );

                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        provider,
                        "{} consecutive failures, skipping provider for {} seconds",
                        self.failure_count,
                        self.config.reset_timeout_secs
                    );
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(provider, "Probe request failed, reopening circuit");
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// State as a caller would observe it now, without transitioning
    fn observed_state(&self) -> CircuitState {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) if opened_at.elapsed() >= self.reset_timeout() => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }
}

/// Only transient failures say anything about provider health
fn should_count_as_failure(error: &TriageError) -> bool {
    matches!(
        error,
        TriageError::RateLimitExceeded { .. }
            | TriageError::ServerError { .. }
            | TriageError::NetworkError(_)
    )
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    provider: String,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            state: Arc::new(Mutex::new(CircuitBreakerState::new(config))),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Fails with `CircuitBreakerOpen` while the provider is cooling down
    pub async fn check_request(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.should_allow_request(&self.provider)
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.record_success(&self.provider);
    }

    pub async fn record_failure(&self, error: &TriageError) {
        let mut state = self.state.lock().await;
        state.record_failure(&self.provider, error);
    }

    pub async fn state(&self) -> CircuitState {
        let state = self.state.lock().await;
        state.observed_state()
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.opened_at = None;
        debug!(provider = %self.provider, "Circuit manually reset");
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;
        CircuitBreakerStats {
            state: state.observed_state(),
            failure_count: state.failure_count,
            opened_at: state.opened_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
}
