//! tts-gateway binary: configuration from the environment, then serve until shutdown.

use std::sync::Arc;

use anyhow::Context;

use tts_gateway::{GatewayConfig, GatewayService, logging, transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = GatewayConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        max_concurrent = config.limiter.max_concurrent,
        acquire_timeout_ms = config.limiter.acquire_timeout.map(|t| t.as_millis() as u64),
        queue_workers = config.queue.as_ref().map(|q| q.workers),
        queue_capacity = config.queue.as_ref().map(|q| q.capacity),
        backend = %config.backend.base_url,
        "Configuration loaded"
    );

    let service = Arc::new(GatewayService::from_config(&config)?);
    transport::serve(config.server.clone(), service).await
}
