//! Inference backend seam.
//!
//! The relay talks to the backend only through [`Backend`], so it can run against the
//! reqwest client in [`http`] or a scripted double in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

pub mod http;

#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpBackend;

/// Streamed response body. Errors end the stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// Successful (2xx) backend response with its body not yet consumed.
pub struct BackendResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Issue one synthesis call with an already-encoded payload.
    ///
    /// Non-2xx answers come back as `BackendError` so callers only ever see a body
    /// worth relaying.
    async fn send(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, GatewayError>;

    /// Probe backend liveness.
    async fn health(&self) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Base URL without trailing slash, e.g. `http://127.0.0.1:8081`.
    pub base_url: String,
    /// Whole-request timeout, body included. `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            timeout: Some(Duration::from_secs(60)),
        }
    }
}
