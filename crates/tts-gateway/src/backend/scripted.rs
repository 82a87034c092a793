//! Scripted backend double.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendResponse};
use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Chunk(Vec<u8>),
    Delay(Duration),
    Fail(GatewayError),
}

/// Answers every call with the same script, or fails before any body when `reject` is set.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    steps: Vec<Step>,
    reject: Option<GatewayError>,
    response_delay: Option<Duration>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<Bytes>>,
}

impl ScriptedBackend {
    pub(crate) fn streaming(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    pub(crate) fn rejecting(error: GatewayError) -> Self {
        Self {
            reject: Some(error),
            ..Default::default()
        }
    }

    pub(crate) fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn payloads(&self) -> Vec<Bytes> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn send(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload);

        if let Some(delay) = self.response_delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if let Some(err) = &self.reject {
            return Err(err.clone());
        }

        let body = futures::stream::iter(self.steps.clone())
            .then(|step| async move {
                match step {
                    Step::Chunk(bytes) => Some(Ok(Bytes::from(bytes))),
                    Step::Delay(d) => {
                        tokio::time::sleep(d).await;
                        None
                    }
                    Step::Fail(err) => Some(Err(err)),
                }
            })
            .filter_map(futures::future::ready)
            .boxed();

        Ok(BackendResponse {
            status: 200,
            content_type: Some("audio/wav".to_string()),
            body,
        })
    }

    async fn health(&self) -> Result<(), GatewayError> {
        match &self.reject {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
