//! Bounded admission limiter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use super::Slot;
use crate::config::ConfigError;
use crate::error::GatewayError;
use crate::observer::{self, Observer};

#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Maximum number of slots outstanding at once. Must be non-zero.
    pub max_concurrent: usize,
    /// How long `acquire` waits for a slot.
    ///
    /// - `None`: wait until a slot frees or the caller cancels.
    /// - `Some(ZERO)`: never wait; fail with `LimitExceeded` when saturated.
    /// - `Some(t)`: wait at most `t`, then fail with `AcquireTimeout`.
    pub acquire_timeout: Option<Duration>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            acquire_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Counting semaphore gating concurrent backend calls.
///
/// No FIFO fairness is promised between waiters beyond what tokio's semaphore
/// provides; callers bound their own wait with a timeout or cancellation.
pub struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Option<Duration>,
    observer: Arc<dyn Observer>,
}

impl AdmissionLimiter {
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::with_observer(config, observer::noop())
    }

    pub fn with_observer(
        config: LimiterConfig,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, ConfigError> {
        if config.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if config.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(
                "max_concurrent",
                config.max_concurrent.to_string(),
                "exceeds the semaphore permit limit",
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            capacity: config.max_concurrent,
            acquire_timeout: config.acquire_timeout,
            observer,
        })
    }

    /// Acquire a slot using the configured timeout policy.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Slot, GatewayError> {
        self.acquire_with_timeout(cancel, self.acquire_timeout).await
    }

    /// Acquire a slot with an explicit timeout policy (see [`LimiterConfig::acquire_timeout`]).
    ///
    /// A token that is already canceled wins over a free slot.
    pub async fn acquire_with_timeout(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Slot, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Canceled);
        }

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.grant(permit)),
            Err(TryAcquireError::Closed) => return Err(GatewayError::ShutdownInProgress),
            Err(TryAcquireError::NoPermits) => {}
        }

        if timeout == Some(Duration::ZERO) {
            self.observer.limit_exceeded();
            tracing::debug!(capacity = self.capacity, "Admission rejected, no slot free");
            return Err(GatewayError::LimitExceeded);
        }

        let wait = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match timeout {
            Some(timeout) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GatewayError::Canceled),
                res = tokio::time::timeout(timeout, wait) => match res {
                    Ok(permit) => permit.map_err(|_| GatewayError::ShutdownInProgress),
                    Err(_) => {
                        self.observer.acquire_timed_out();
                        tracing::debug!(
                            timeout_ms = timeout.as_millis(),
                            "Timed out waiting for admission slot"
                        );
                        Err(GatewayError::AcquireTimeout)
                    }
                },
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GatewayError::Canceled),
                permit = wait => permit.map_err(|_| GatewayError::ShutdownInProgress),
            },
        }?;

        Ok(self.grant(permit))
    }

    /// Non-blocking acquire. `None` when saturated.
    pub fn try_acquire(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.grant(permit))
    }

    fn grant(&self, permit: OwnedSemaphorePermit) -> Slot {
        Slot::new(permit, Arc::clone(&self.observer))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }
}
