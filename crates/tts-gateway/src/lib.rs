//! tts-gateway: admission-controlled streaming relay in front of a slow TTS backend.

mod health;
mod version;

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod observer;
pub mod permit;
pub mod queue;
pub mod relay;
pub mod service;
pub mod transport;

pub use backend::{Backend, BackendConfig, BackendResponse, HttpBackend};
pub use bridge::{TtsRequest, encode_request};
pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use health::{Health, HealthSnapshot, QueueHealth};
pub use metrics::GatewayMetrics;
pub use observer::{NoopObserver, Observer};
pub use permit::{AdmissionLimiter, LimiterConfig, Slot};
pub use queue::{QueueConfig, QueueState, WorkQueue};
pub use relay::{StreamRelay, StreamSession};
pub use service::{GatewayService, StreamStarted};
pub use version::{GATEWAY_VERSION, VersionInfo};
