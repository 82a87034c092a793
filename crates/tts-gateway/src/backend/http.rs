//! reqwest client for the synthesis backend.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendConfig, BackendResponse};
use crate::bridge::CONTENT_TYPE_MSGPACK;
use crate::error::GatewayError;
use crate::version::GATEWAY_VERSION;

/// Longest diagnostic body read from a failed response.
const MAX_ERROR_BODY: usize = 2048;

pub struct HttpBackend {
    client: reqwest::Client,
    tts_url: String,
    health_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        let user_agent = format!("tts-gateway/{}", GATEWAY_VERSION);
        if let Ok(value) = HeaderValue::from_str(&user_agent) {
            headers.insert(USER_AGENT, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client: builder.build()?,
            tts_url: format!("{}/v1/tts", base),
            health_url: format!("{}/v1/health", base),
        })
    }

    pub fn tts_url(&self) -> &str {
        &self.tts_url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, GatewayError> {
        let request = self
            .client
            .post(&self.tts_url)
            .header(CONTENT_TYPE, CONTENT_TYPE_MSGPACK)
            .header(ACCEPT, "application/octet-stream")
            .body(payload)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Canceled),
            res = request => res.map_err(classify_transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Canceled),
                message = read_error_body(response) => message,
            };
            tracing::warn!(status = status.as_u16(), %message, "Backend returned an error");
            return Err(GatewayError::BackendError {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let code = status.as_u16();
        let body = response
            .bytes_stream()
            .map_err(move |e| classify_body(e, code))
            .boxed();

        Ok(BackendResponse {
            status: code,
            content_type,
            body,
        })
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::BackendError {
                status: status.as_u16(),
                message: read_error_body(response).await,
            })
        }
    }
}

fn classify_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::BackendTimeout(e.to_string())
    } else {
        GatewayError::BackendUnavailable(e.to_string())
    }
}

/// Failures while the body streams. The status line was already 2xx.
fn classify_body(e: reqwest::Error, status: u16) -> GatewayError {
    if e.is_timeout() {
        GatewayError::BackendTimeout(e.to_string())
    } else {
        GatewayError::BackendError {
            status,
            message: format!("response body interrupted: {}", e),
        }
    }
}

/// Read at most [`MAX_ERROR_BODY`] bytes of a failed response as text.
async fn read_error_body(mut response: reqwest::Response) -> String {
    let status = response.status();
    let mut buf = Vec::new();
    while buf.len() < MAX_ERROR_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read backend error body");
                break;
            }
        }
    }
    buf.truncate(MAX_ERROR_BODY);

    let text = String::from_utf8_lossy(&buf).trim().to_string();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        text
    }
}
