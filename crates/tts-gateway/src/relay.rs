//! Admission-controlled relay of one backend stream to one client sink.
//!
//! [`StreamRelay::open`] takes a slot, encodes the request and starts the backend call.
//! The returned [`StreamSession`] owns the slot, so however the session ends (success,
//! error, cancellation, or just being dropped) the slot goes back exactly once.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{Backend, BackendResponse};
use crate::bridge::{TtsRequest, encode_request};
use crate::error::GatewayError;
use crate::observer::{self, Observer};
use crate::permit::{AdmissionLimiter, Slot};

pub struct StreamRelay {
    limiter: Arc<AdmissionLimiter>,
    backend: Arc<dyn Backend>,
    observer: Arc<dyn Observer>,
}

impl StreamRelay {
    pub fn new(limiter: Arc<AdmissionLimiter>, backend: Arc<dyn Backend>) -> Self {
        Self::with_observer(limiter, backend, observer::noop())
    }

    pub fn with_observer(
        limiter: Arc<AdmissionLimiter>,
        backend: Arc<dyn Backend>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            limiter,
            backend,
            observer,
        }
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Admit the request and start the backend call.
    ///
    /// Every error returned here happened before any byte reached a client.
    pub async fn open(
        &self,
        cancel: &CancellationToken,
        request: &TtsRequest,
    ) -> Result<StreamSession, GatewayError> {
        let slot = self.limiter.acquire(cancel).await?;
        let id = Uuid::new_v4();
        let started = Instant::now();

        tracing::debug!(
            %id,
            text_len = request.text.len(),
            format = %request.format,
            streaming = request.streaming,
            "Relay starting"
        );

        let response = match self.call_backend(cancel, request).await {
            Ok(response) => response,
            Err(e) => {
                self.observer.stream_failed(e.code(), false);
                tracing::warn!(
                    %id,
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Relay failed before streaming"
                );
                return Err(e);
            }
        };

        Ok(StreamSession {
            id,
            slot,
            response,
            observer: Arc::clone(&self.observer),
            started,
        })
    }

    async fn call_backend(
        &self,
        cancel: &CancellationToken,
        request: &TtsRequest,
    ) -> Result<BackendResponse, GatewayError> {
        let payload = encode_request(request)?;
        self.backend.send(payload, cancel).await
    }

    /// [`open`](Self::open) followed by [`StreamSession::copy_to`].
    pub async fn relay<W>(
        &self,
        cancel: &CancellationToken,
        request: &TtsRequest,
        sink: &mut W,
    ) -> Result<u64, GatewayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.open(cancel, request).await?.copy_to(cancel, sink).await
    }
}

/// An admitted backend call whose body has not been relayed yet.
#[must_use = "dropping a StreamSession abandons the backend response"]
pub struct StreamSession {
    id: Uuid,
    slot: Slot,
    response: BackendResponse,
    observer: Arc<dyn Observer>,
    started: Instant,
}

impl StreamSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend status line, always 2xx.
    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.response.content_type.as_deref()
    }

    /// Forward the body to `sink` one chunk at a time, flushing each before reading the
    /// next. Returns the number of bytes flushed.
    ///
    /// A backend error after the first byte stops forwarding and is returned as is; the
    /// client keeps whatever was already flushed. Sink failures mean the client went
    /// away and are reported as `Canceled`.
    pub async fn copy_to<W>(
        mut self,
        cancel: &CancellationToken,
        sink: &mut W,
    ) -> Result<u64, GatewayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written: u64 = 0;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(GatewayError::Canceled),
                next = self.response.body.next() => next,
            };
            let chunk = match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => chunk,
            };

            let write = async {
                sink.write_all(&chunk).await?;
                sink.flush().await
            };
            let flushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GatewayError::Canceled),
                res = write => res.map_err(|e| {
                    tracing::debug!(id = %self.id, error = %e, "Client sink closed");
                    GatewayError::Canceled
                }),
            };
            if let Err(e) = flushed {
                break Err(e);
            }

            written += chunk.len() as u64;
            self.observer.bytes_relayed(chunk.len() as u64);
        };

        self.slot.release();
        let duration_ms = self.started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                tracing::info!(id = %self.id, bytes = written, duration_ms, "Relay finished");
                Ok(written)
            }
            Err(e) => {
                self.observer.stream_failed(e.code(), written > 0);
                if e == GatewayError::Canceled {
                    tracing::info!(id = %self.id, bytes = written, duration_ms, "Relay canceled");
                } else {
                    tracing::warn!(
                        id = %self.id,
                        error = %e,
                        bytes = written,
                        duration_ms,
                        "Relay stream failed"
                    );
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("status", &self.response.status)
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use crate::backend::scripted::{ScriptedBackend, Step};
    use crate::metrics::GatewayMetrics;
    use crate::permit::LimiterConfig;

    fn relay_with(
        backend: Arc<ScriptedBackend>,
        max: usize,
        timeout: Option<Duration>,
    ) -> (StreamRelay, Arc<GatewayMetrics>) {
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let limiter = Arc::new(
            AdmissionLimiter::with_observer(
                LimiterConfig {
                    max_concurrent: max,
                    acquire_timeout: timeout,
                },
                metrics.clone(),
            )
            .unwrap(),
        );
        let relay = StreamRelay::with_observer(limiter, backend, metrics.clone());
        (relay, metrics)
    }

    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn relays_whole_body_and_releases_slot() {
        let backend = Arc::new(ScriptedBackend::streaming(vec![
            Step::Chunk(b"RIFF".to_vec()),
            Step::Chunk(vec![0u8; 60]),
        ]));
        let (relay, metrics) = relay_with(backend.clone(), 1, Some(Duration::ZERO));
        let request = TtsRequest::new("hello");

        let mut sink = Vec::new();
        let n = relay
            .relay(&CancellationToken::new(), &request, &mut sink)
            .await
            .unwrap();

        assert_eq!(n, 64);
        assert_eq!(&sink[..4], b"RIFF");
        assert_eq!(relay.limiter().available(), 1);
        assert_eq!(metrics.active_streams(), 0);
        assert_eq!(metrics.relayed_bytes(), 64);
        assert_eq!(backend.payloads(), vec![encode_request(&request).unwrap()]);
    }

    #[tokio::test]
    async fn truncated_stream_returns_error_after_partial_body() {
        let backend = Arc::new(ScriptedBackend::streaming(vec![
            Step::Chunk(vec![1u8; 10]),
            Step::Fail(GatewayError::BackendError {
                status: 200,
                message: "connection reset".into(),
            }),
            Step::Chunk(vec![2u8; 90]),
        ]));
        let (relay, metrics) = relay_with(backend, 1, Some(Duration::ZERO));

        let mut sink = Vec::new();
        let err = relay
            .relay(&CancellationToken::new(), &TtsRequest::new("hi"), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::BackendError { .. }));
        assert_eq!(sink, vec![1u8; 10]);
        assert_eq!(relay.limiter().available(), 1);
        assert_eq!(metrics.active_streams(), 0);
        assert_eq!(metrics.stream_errors("backend_error", true), 1);
    }

    #[tokio::test]
    async fn backend_rejection_is_reported_before_any_byte() {
        let backend = Arc::new(ScriptedBackend::rejecting(
            GatewayError::BackendUnavailable("connection refused".into()),
        ));
        let (relay, metrics) = relay_with(backend, 1, Some(Duration::ZERO));

        let err = relay
            .open(&CancellationToken::new(), &TtsRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
        assert_eq!(relay.limiter().available(), 1);
        assert_eq!(metrics.stream_errors("backend_unavailable", false), 1);
    }

    #[tokio::test]
    async fn dropped_session_releases_slot() {
        let backend = Arc::new(ScriptedBackend::streaming(vec![Step::Chunk(vec![1])]));
        let (relay, _) = relay_with(backend, 1, Some(Duration::ZERO));
        let token = CancellationToken::new();

        let session = relay.open(&token, &TtsRequest::new("hi")).await.unwrap();
        assert_eq!(session.status(), 200);
        assert_eq!(session.content_type(), Some("audio/wav"));
        assert_eq!(
            relay.open(&token, &TtsRequest::new("hi")).await.unwrap_err(),
            GatewayError::LimitExceeded
        );

        drop(session);
        assert_eq!(relay.limiter().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn third_caller_waits_for_a_free_slot() {
        let backend = Arc::new(
            ScriptedBackend::streaming(vec![Step::Chunk(vec![9u8; 8])])
                .with_response_delay(Duration::from_millis(100)),
        );
        let (relay, _) = relay_with(backend.clone(), 2, None);
        let relay = Arc::new(relay);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let relay = Arc::clone(&relay);
                tokio::spawn(async move {
                    let mut sink = Vec::new();
                    relay
                        .relay(&CancellationToken::new(), &TtsRequest::new("hi"), &mut sink)
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(relay.limiter().in_use(), 2);
        assert_eq!(backend.calls(), 2);

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 8);
        }
        assert_eq!(backend.calls(), 3);
        assert_eq!(relay.limiter().available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_stream_stops_forwarding() {
        let backend = Arc::new(ScriptedBackend::streaming(vec![
            Step::Chunk(vec![1u8; 4]),
            Step::Delay(Duration::from_secs(1)),
            Step::Chunk(vec![2u8; 4]),
        ]));
        let (relay, metrics) = relay_with(backend, 1, Some(Duration::ZERO));

        let token = CancellationToken::new();
        let canceler = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceler.cancel();
        });

        let mut sink = Vec::new();
        let err = relay
            .relay(&token, &TtsRequest::new("hi"), &mut sink)
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::Canceled);
        assert_eq!(sink, vec![1u8; 4]);
        assert_eq!(metrics.active_streams(), 0);
        assert_eq!(metrics.stream_errors("canceled", true), 1);
    }

    #[tokio::test]
    async fn broken_sink_counts_as_canceled() {
        let backend = Arc::new(ScriptedBackend::streaming(vec![Step::Chunk(vec![1u8; 4])]));
        let (relay, _) = relay_with(backend, 1, Some(Duration::ZERO));

        let err = relay
            .relay(&CancellationToken::new(), &TtsRequest::new("hi"), &mut BrokenSink)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Canceled);
        assert_eq!(relay.limiter().available(), 1);
    }
}
