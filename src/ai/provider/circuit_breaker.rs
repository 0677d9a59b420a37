//! Circuit Breaker Pattern for Provider Resilience
//!
//! Guards a single remote provider. Outcomes are tracked over a time-based
//! rolling window; once enough calls have been seen and the failure rate
//! crosses the threshold, the circuit opens and calls are rejected without
//! touching the provider.
//!
//! ## States
//!
//! - **Closed**: Normal operation, requests flow through
//! - **Open**: Provider is failing, requests are rejected immediately
//! - **HalfOpen**: Exactly one trial request is admitted
//!
//! ## Transitions
//!
//! ```text
//! Closed   --[volume >= threshold && failure% >= threshold]--> Open
//! Open     --[reset_timeout elapsed]--> HalfOpen
//! HalfOpen --[trial success]--> Closed (window cleared)
//! HalfOpen --[trial failure]--> Open (timer restarted)
//! ```
//!
//! Neutral outcomes (the call was refused before reaching the provider, e.g.
//! by the usage governor) are not recorded. A neutral outcome in HalfOpen
//! frees the trial slot.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::ai::metrics::{MetricEvent, NoopMetrics, SharedMetrics};
use crate::ai::timeout::with_provider_timeout;
use crate::config::BreakerConfig;
use crate::constants::{circuit_breaker as cb_constants, provider as provider_constants};
use crate::types::ProviderError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests flow through
    Closed,
    /// Provider is failing - requests rejected immediately
    Open,
    /// Testing recovery - a single trial request allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure percentage within the window that opens the circuit
    pub error_threshold_pct: u8,
    /// Minimum outcomes in the window before the rate is evaluated
    pub volume_threshold: u32,
    /// Length of the rolling outcome window
    pub rolling_window: Duration,
    /// Time spent open before a trial call is admitted
    pub reset_timeout: Duration,
    /// Hard bound on each guarded call; expiry counts as a failure
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_pct: cb_constants::ERROR_THRESHOLD_PCT,
            volume_threshold: cb_constants::VOLUME_THRESHOLD,
            rolling_window: Duration::from_secs(cb_constants::ROLLING_WINDOW_SECS),
            reset_timeout: Duration::from_secs(cb_constants::RESET_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(provider_constants::SECONDARY_TIMEOUT_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_config(config: &BreakerConfig, call_timeout: Duration) -> Self {
        Self {
            error_threshold_pct: config.error_threshold_pct,
            volume_threshold: config.volume_threshold,
            rolling_window: Duration::from_secs(config.rolling_window_secs),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            call_timeout,
        }
    }
}

/// Unified internal state - all mutable state in single struct
/// to ensure atomicity of state transitions
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    /// (recorded_at, succeeded)
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    blocked_count: u64,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
            blocked_count: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn counts(&self) -> (u32, u32) {
        let failures = self.window.iter().filter(|(_, ok)| !ok).count() as u32;
        (self.window.len() as u32 - failures, failures)
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }
}

/// Thread-safe circuit breaker with unified state management.
///
/// All state is protected by a single RwLock to ensure consistency
/// between the outcome window and state transitions.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    provider_name: String,
    inner: RwLock<CircuitBreakerInner>,
    metrics: SharedMetrics,
}

impl CircuitBreaker {
    pub fn new(provider_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            provider_name: provider_name.into(),
            inner: RwLock::new(CircuitBreakerInner::new()),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Emit `breaker_opened` / `breaker_closed` events to this sink
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Get current circuit state (checking for timeout transitions)
    pub fn state(&self) -> CircuitState {
        self.check_state_transition();

        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state
    }

    /// Run `call` through the breaker with the configured hard timeout.
    ///
    /// Rejected calls return a `BreakerOpen` error without polling `call`.
    pub async fn call<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        self.call_gated(async { Ok(()) }, call).await
    }

    /// Like [`call`](Self::call), with an admission step between the breaker
    /// check and the provider call.
    ///
    /// `gate` runs outside the call timeout and its errors are recorded as
    /// neutral, so a slow or refusing gate never counts against the provider.
    pub async fn call_gated<T, G, F>(&self, gate: G, call: F) -> Result<T, ProviderError>
    where
        G: Future<Output = Result<(), ProviderError>>,
        F: Future<Output = Result<T, ProviderError>>,
    {
        if !self.allow_request() {
            return Err(ProviderError::breaker_open(&self.provider_name));
        }

        if let Err(e) = gate.await {
            self.record_neutral();
            return Err(e);
        }

        let started = Instant::now();
        let result =
            with_provider_timeout(self.config.call_timeout, call, &self.provider_name).await;

        match &result {
            Ok(_) => {
                self.metrics
                    .observe_latency(&self.provider_name, started.elapsed());
                self.record_success();
            }
            Err(e) if e.category.counts_against_provider() => {
                self.metrics
                    .observe_latency(&self.provider_name, started.elapsed());
                self.record_failure();
            }
            Err(_) => self.record_neutral(),
        }

        result
    }

    /// Check if request should be allowed
    ///
    /// In HalfOpen, only the first caller gets the trial slot.
    pub fn allow_request(&self) -> bool {
        self.check_state_transition();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                inner.blocked_count += 1;
                tracing::debug!(
                    provider = %self.provider_name,
                    "Circuit breaker: request blocked (circuit OPEN)"
                );
                false
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.blocked_count += 1;
                    tracing::debug!(
                        provider = %self.provider_name,
                        "Circuit breaker: trial already in flight"
                    );
                    false
                } else {
                    inner.trial_in_flight = true;
                    tracing::debug!(
                        provider = %self.provider_name,
                        "Circuit breaker: admitting trial request"
                    );
                    true
                }
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let closed = {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();

            match inner.state {
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Closed;
                    inner.window.clear();
                    inner.opened_at = None;
                    inner.trial_in_flight = false;
                    true
                }
                CircuitState::Closed => {
                    inner.window.push_back((now, true));
                    inner.prune(now, self.config.rolling_window);
                    false
                }
                // Late result from a call admitted before the circuit opened
                CircuitState::Open => false,
            }
        };

        if closed {
            tracing::info!(
                provider = %self.provider_name,
                "Circuit breaker: closed (provider recovered)"
            );
            self.metrics
                .increment(MetricEvent::BreakerClosed, Some(&self.provider_name));
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let opened = {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();

            match inner.state {
                CircuitState::Closed => {
                    inner.window.push_back((now, false));
                    inner.prune(now, self.config.rolling_window);

                    let (successes, failures) = inner.counts();
                    let total = successes + failures;
                    let tripped = total >= self.config.volume_threshold
                        && u64::from(failures) * 100
                            >= u64::from(self.config.error_threshold_pct) * u64::from(total);

                    if tripped {
                        inner.trip(now);
                        tracing::warn!(
                            provider = %self.provider_name,
                            failures,
                            total,
                            reset_timeout = ?self.config.reset_timeout,
                            "Circuit breaker: opened"
                        );
                    }
                    tripped
                }
                CircuitState::HalfOpen => {
                    inner.trip(now);
                    tracing::warn!(
                        provider = %self.provider_name,
                        "Circuit breaker: re-opened after failed trial"
                    );
                    true
                }
                CircuitState::Open => false,
            }
        };

        if opened {
            self.metrics
                .increment(MetricEvent::BreakerOpened, Some(&self.provider_name));
        }
    }

    /// Record an outcome that says nothing about provider health
    pub fn record_neutral(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            tracing::debug!(
                provider = %self.provider_name,
                "Circuit breaker: trial slot released by neutral outcome"
            );
        }
    }

    /// Get statistics for monitoring
    pub fn stats(&self) -> CircuitBreakerStats {
        self.check_state_transition();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.prune(Instant::now(), self.config.rolling_window);
        let (successes, failures) = inner.counts();

        CircuitBreakerStats {
            provider_name: self.provider_name.clone(),
            state: inner.state,
            window_successes: successes,
            window_failures: failures,
            blocked_count: inner.blocked_count,
            time_in_state: inner.opened_at.map(|t| t.elapsed()),
        }
    }

    /// Check if state transition is needed (open -> half-open)
    fn check_state_transition(&self) {
        let should_transition = {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            inner.state == CircuitState::Open
                && inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
        };

        if should_transition {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            // Double-check state (may have changed between read and write)
            if inner.state == CircuitState::Open {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;

                tracing::info!(
                    provider = %self.provider_name,
                    "Circuit breaker: HALF_OPEN (testing recovery)"
                );
            }
        }
    }
}

/// Statistics for monitoring circuit breaker state
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub provider_name: String,
    pub state: CircuitState,
    pub window_successes: u32,
    pub window_failures: u32,
    pub blocked_count: u64,
    pub time_in_state: Option<Duration>,
}

impl CircuitBreakerStats {
    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let time_str = self
            .time_in_state
            .map(|d| format!(" for {:.1}s", d.as_secs_f64()))
            .unwrap_or_default();

        format!(
            "[{}] {} | window ok={} failed={} blocked={}{}",
            self.provider_name,
            self.state,
            self.window_successes,
            self.window_failures,
            self.blocked_count,
            time_str
        )
    }
}
