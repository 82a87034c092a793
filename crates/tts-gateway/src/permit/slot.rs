//! Slot - one unit of admitted concurrency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedSemaphorePermit;

use crate::observer::Observer;

/// An admission slot.
///
/// Not `Clone`. The permit goes back to the limiter on the first `release()` or on
/// drop, whichever comes first; later calls are no-ops.
#[must_use = "dropping a Slot immediately releases it"]
pub struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    observer: Arc<dyn Observer>,
    acquired_at: Instant,
}

impl Slot {
    pub(crate) fn new(permit: OwnedSemaphorePermit, observer: Arc<dyn Observer>) -> Self {
        observer.slot_acquired();
        Self {
            permit: Some(permit),
            observer,
            acquired_at: Instant::now(),
        }
    }

    /// Return the permit to the limiter. Idempotent.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.observer.slot_released();
            tracing::trace!(held_ms = self.acquired_at.elapsed().as_millis(), "Slot released");
        }
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("held", &self.is_held())
            .field("held_for", &self.held_for())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;
    use tokio::sync::Semaphore;

    #[test]
    fn release_is_idempotent() {
        let sem = Arc::new(Semaphore::new(1));
        let metrics = Arc::new(GatewayMetrics::new().unwrap());

        let permit = Arc::clone(&sem).try_acquire_owned().unwrap();
        let mut slot = Slot::new(permit, metrics.clone());
        assert_eq!(metrics.active_streams(), 1);
        assert_eq!(sem.available_permits(), 0);

        slot.release();
        slot.release();
        drop(slot);

        assert_eq!(sem.available_permits(), 1);
        assert_eq!(metrics.active_streams(), 0);
    }

    #[test]
    fn drop_releases() {
        let sem = Arc::new(Semaphore::new(1));
        {
            let permit = Arc::clone(&sem).try_acquire_owned().unwrap();
            let slot = Slot::new(permit, crate::observer::noop());
            assert!(slot.is_held());
        }
        assert_eq!(sem.available_permits(), 1);
    }
}
