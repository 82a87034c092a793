//! Observer capability injected into core components.
//!
//! Components hold an `Arc<dyn Observer>` handed in at construction. The default is
//! [`NoopObserver`], so nothing in the core depends on process-global state.

use std::sync::Arc;

/// Hooks fired by the limiter, the work queue and the relay.
///
/// Every method has an empty default so implementors only override what they track.
pub trait Observer: Send + Sync {
    /// A slot was granted.
    fn slot_acquired(&self) {}

    /// A previously granted slot was returned.
    fn slot_released(&self) {}

    fn acquire_timed_out(&self) {}

    fn limit_exceeded(&self) {}

    fn queue_full(&self) {}

    /// A worker claimed a job.
    fn job_started(&self) {}

    fn job_finished(&self) {}

    /// Bytes flushed to a client sink.
    fn bytes_relayed(&self, _bytes: u64) {}

    /// A relay ended with an error. `after_first_byte` is true when the client
    /// already received part of the body.
    fn stream_failed(&self, _code: &'static str, _after_first_byte: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

pub fn noop() -> Arc<dyn Observer> {
    Arc::new(NoopObserver)
}
