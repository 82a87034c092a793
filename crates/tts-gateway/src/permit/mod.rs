//! Admission control for backend calls.
//!
//! [`AdmissionLimiter`] is a counting semaphore over fungible permits. Each grant is a
//! [`Slot`] owned by exactly one caller; dropping or releasing the slot returns its
//! permit exactly once.

mod limiter;
mod slot;

pub use limiter::{AdmissionLimiter, LimiterConfig};
pub use slot::Slot;
