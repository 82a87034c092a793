//! GatewayService: transport-agnostic request handling.
//!
//! This service owns:
//! - the admission limiter (through the relay)
//! - the optional work queue in front of the relay
//! - metrics and health reporting
//! - shutdown coordination (bidirectional)
//!
//! Transports hand it a request plus a sink and get the relay outcome back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{Backend, HttpBackend};
use crate::bridge::TtsRequest;
use crate::config::{ConfigError, GatewayConfig};
use crate::error::GatewayError;
use crate::health::{Health, HealthSnapshot, QueueHealth};
use crate::metrics::GatewayMetrics;
use crate::observer::Observer;
use crate::permit::AdmissionLimiter;
use crate::queue::WorkQueue;
use crate::relay::StreamRelay;
use crate::version::VersionInfo;

/// Sent once the backend accepted the call, before any body byte is relayed.
#[derive(Debug, Clone)]
pub struct StreamStarted {
    pub id: Uuid,
    pub content_type: Option<String>,
}

pub struct GatewayService {
    relay: Arc<StreamRelay>,
    queue: Option<WorkQueue>,
    metrics: Arc<GatewayMetrics>,
    expose_backend_errors: bool,
    version: VersionInfo,

    /// Fired as soon as shutdown is requested; new requests are refused from then on.
    draining: CancellationToken,
    stopped: AtomicBool,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayService {
    /// Build every component from `config`. Spawns queue workers, so call it inside a
    /// tokio runtime.
    pub fn new(
        config: &GatewayConfig,
        backend: Arc<dyn Backend>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, ConfigError> {
        let observer: Arc<dyn Observer> = metrics.clone();
        let limiter = Arc::new(AdmissionLimiter::with_observer(
            config.limiter.clone(),
            Arc::clone(&observer),
        )?);
        let queue = config
            .queue
            .clone()
            .map(|q| WorkQueue::with_observer(q, Arc::clone(&observer)))
            .transpose()?;
        let relay = Arc::new(StreamRelay::with_observer(limiter, backend, observer));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            relay,
            queue,
            metrics,
            expose_backend_errors: config.expose_backend_errors,
            version: VersionInfo::new().with_backend(config.backend.base_url.clone()),
            draining: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Production wiring: reqwest backend and a fresh metrics registry.
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let backend =
            HttpBackend::new(&config.backend).context("Failed to build backend client")?;
        let metrics = GatewayMetrics::new().context("Failed to register metrics")?;
        let service = Self::new(config, Arc::new(backend), Arc::new(metrics))?;
        Ok(service)
    }

    /// Relay one synthesis request into `sink`.
    ///
    /// `started` fires once the backend has accepted the call; if it is dropped
    /// unsent, the returned error explains why. Runs on the work queue when one is
    /// configured, otherwise on the calling task.
    pub async fn synthesize<W>(
        &self,
        cancel: CancellationToken,
        request: TtsRequest,
        started: oneshot::Sender<StreamStarted>,
        sink: W,
    ) -> Result<u64, GatewayError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.draining.is_cancelled() {
            return Err(GatewayError::ShutdownInProgress);
        }

        let relay = Arc::clone(&self.relay);
        match &self.queue {
            Some(queue) => {
                queue
                    .submit(&cancel, move |token| {
                        run_relay(relay, token, request, started, sink)
                    })
                    .await
            }
            None => run_relay(relay, cancel, request, started, sink).await,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        let limiter = self.relay.limiter();
        let available = limiter.available();

        let status = if self.stopped.load(Ordering::SeqCst) {
            Health::Stopped
        } else if self.draining.is_cancelled() {
            Health::Draining
        } else if available == 0 {
            Health::Busy
        } else {
            Health::Ready
        };

        HealthSnapshot {
            status,
            available_slots: available,
            total_slots: limiter.capacity(),
            queue: self.queue.as_ref().map(|q| QueueHealth {
                state: q.state(),
                pending: q.pending(),
                workers: q.workers(),
                capacity: q.capacity(),
            }),
            version: self.version.clone(),
        }
    }

    /// Probe the backend's own health endpoint.
    pub async fn backend_health(&self) -> Result<(), GatewayError> {
        self.relay.backend().health().await
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        self.relay.limiter()
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn expose_backend_errors(&self) -> bool {
        self.expose_backend_errors
    }

    /// Ask the transport to stop. New requests are refused immediately.
    pub fn trigger_shutdown(&self) {
        self.draining.cancel();
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Refuse new work and wait for queued jobs to finish, or until `cancel` fires.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), GatewayError> {
        self.draining.cancel();

        if let Some(queue) = &self.queue
            && let Err(e) = queue.shutdown(cancel).await
        {
            tracing::warn!(error = %e, "Queue did not drain before the deadline");
            return Err(e);
        }

        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!("Gateway stopped");
        }
        Ok(())
    }
}

async fn run_relay<W>(
    relay: Arc<StreamRelay>,
    cancel: CancellationToken,
    request: TtsRequest,
    started: oneshot::Sender<StreamStarted>,
    mut sink: W,
) -> Result<u64, GatewayError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = relay.open(&cancel, &request).await?;
    let _ = started.send(StreamStarted {
        id: session.id(),
        content_type: session.content_type().map(str::to_string),
    });

    let written = session.copy_to(&cancel, &mut sink).await?;
    if let Err(e) = sink.shutdown().await {
        tracing::debug!(error = %e, "Failed to close client sink");
    }
    Ok(written)
}
