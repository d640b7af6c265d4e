//! Host-keyed circuit breakers for upstream providers.
//!
//! Each remote host gets its own breaker so one flaky provider cannot exhaust
//! the global fetch budget. The breaker opens after a run of consecutive
//! failures, fails fast while open, and probes through a half-open state
//! before closing again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors surfaced by a circuit-breaker-protected operation.
#[derive(Debug, Clone)]
pub enum CircuitBreakerError {
    /// Circuit breaker is open, operation blocked
    CircuitOpen,
    /// Operation failed due to underlying service error
    ServiceError(String),
    /// Operation timed out
    Timeout,
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit breaker open"),
            CircuitBreakerError::ServiceError(msg) => write!(f, "{msg}"),
            CircuitBreakerError::Timeout => write!(f, "request timed out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Per-operation timeout; a timeout counts as a failure.
    pub operation_timeout: Duration,
    /// How long the circuit stays open before probing.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            operation_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub state: CircuitBreakerState,
    pub failure_rate: f64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    last_opened: Option<Instant>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
}

impl Default for BreakerInner {
    fn default() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_opened: None,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
        }
    }
}

/// A single circuit breaker instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerInner::default()),
        }
    }

    /// Execute an async operation through the breaker, applying the
    /// configured per-operation timeout.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, String>> + Send,
        T: Send,
    {
        self.execute_with_timeout(self.config.operation_timeout, operation)
            .await
    }

    /// Execute with an explicit timeout overriding the configured one.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, String>> + Send,
        T: Send,
    {
        if !self.should_allow_request().await {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_result(true).await;
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_result(false).await;
                Err(CircuitBreakerError::ServiceError(error))
            }
            Err(_) => {
                self.record_result(false).await;
                Err(CircuitBreakerError::Timeout)
            }
        }
    }

    pub async fn state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }

    /// Whether a request would currently be allowed through.
    pub async fn is_available(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => inner
                .last_opened
                .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                .unwrap_or(false),
        }
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().await;
        let failure_rate = if inner.total_calls > 0 {
            inner.failed_calls as f64 / inner.total_calls as f64
        } else {
            0.0
        };
        CircuitBreakerStats {
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            state: inner.state,
            failure_rate,
        }
    }

    /// Force the breaker open (test hook).
    pub async fn force_open(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitBreakerState::Open;
        inner.last_opened = Some(Instant::now());
    }

    /// Force the breaker closed (test hook).
    pub async fn force_closed(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitBreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    async fn should_allow_request(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_opened
                    .map(|opened| opened.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    info!("circuit breaker transitioning from Open to HalfOpen");
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    debug!("circuit breaker open, blocking request");
                    false
                }
            }
        }
    }

    async fn record_result(&self, success: bool) {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;

        if success {
            inner.successful_calls += 1;
            inner.failure_count = 0;
            inner.success_count += 1;
            if inner.state == CircuitBreakerState::HalfOpen
                && inner.success_count >= self.config.success_threshold
            {
                info!("circuit breaker transitioning from HalfOpen to Closed");
                inner.state = CircuitBreakerState::Closed;
                inner.success_count = 0;
            }
        } else {
            inner.failed_calls += 1;
            inner.success_count = 0;
            inner.failure_count += 1;
            if inner.failure_count >= self.config.failure_threshold
                && inner.state != CircuitBreakerState::Open
            {
                warn!(
                    "circuit breaker opening after {} consecutive failures",
                    inner.failure_count
                );
                inner.state = CircuitBreakerState::Open;
                inner.last_opened = Some(Instant::now());
            }
        }
    }
}

/// Registry of circuit breakers keyed by remote host.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or create the breaker for a host.
    pub async fn for_host(&self, host: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(host) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().await;
        Arc::clone(
            breakers
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone()))),
        )
    }

    /// Snapshot of all per-host breaker statistics.
    pub async fn all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers = self.breakers.read().await;
        let mut stats = HashMap::with_capacity(breakers.len());
        for (host, breaker) in breakers.iter() {
            stats.insert(host.clone(), breaker.stats().await);
        }
        stats
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            operation_timeout: Duration::from_millis(100),
            reset_timeout: Duration::from_millis(50),
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..2 {
            let result: Result<(), _> = breaker.execute(|| async { Err("boom".to_string()) }).await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state().await, CircuitBreakerState::Open);

        let result: Result<(), _> = breaker.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..2 {
            let _: Result<(), _> = breaker.execute(|| async { Err("boom".to_string()) }).await;
        }
        assert_eq!(breaker.state().await, CircuitBreakerState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let result: Result<i32, _> = breaker.execute(|| async { Ok(1) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn registry_shares_breakers_per_host() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let a1 = registry.for_host("provider-a.example").await;
        let a2 = registry.for_host("provider-a.example").await;
        let b = registry.for_host("provider-b.example").await;

        a1.force_open().await;
        assert_eq!(a2.state().await, CircuitBreakerState::Open);
        assert_eq!(b.state().await, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new(fast_config());
        let result: Result<(), _> = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Timeout)));
        assert_eq!(breaker.stats().await.failed_calls, 1);
    }
}
