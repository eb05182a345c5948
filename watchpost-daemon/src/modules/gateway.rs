//! Ingest gateway initialization.
//!
//! Opens the configured queue backend and builds the gateway together
//! with its enqueue task. The gateway is shared by the HTTP API and the
//! local collectors; the enqueue task is registered as a module.
//!
//! ```text
//! HTTP API / collectors --> IngestGateway --handoff--> EnqueueTask --> DurableQueue
//! ```

use std::sync::Arc;

use anyhow::Result;

use watchpost_core::config::WatchpostConfig;
use watchpost_core::queue::DurableQueue;
use watchpost_ingest::{GatewayConfig, IngestGateway, open_queue};

use super::ModuleHandle;

/// Everything the rest of the daemon needs from the ingest side.
pub struct GatewayParts {
    /// Queue shared by the gateway and the analysis worker.
    pub queue: Arc<dyn DurableQueue>,
    /// Gateway shared by the HTTP API and local collectors.
    pub gateway: Arc<IngestGateway>,
    /// Enqueue task module.
    pub handle: ModuleHandle,
}

/// Open the queue and build the gateway.
pub fn init(config: &WatchpostConfig) -> Result<GatewayParts> {
    let queue = open_queue(&config.queue)
        .map_err(|e| anyhow::anyhow!("failed to open queue '{}': {}", config.queue.name, e))?;

    let gateway_config = GatewayConfig::from_core(&config.gateway)
        .map_err(|e| anyhow::anyhow!("invalid gateway config: {}", e))?;
    tracing::info!(
        backend = %config.queue.backend,
        queue = %queue.name(),
        ack_mode = %gateway_config.ack_mode,
        "initializing ingest gateway"
    );

    let (gateway, task) = IngestGateway::new(gateway_config, Arc::clone(&queue));
    Ok(GatewayParts {
        queue,
        gateway: Arc::new(gateway),
        handle: ModuleHandle::new("enqueue", true, Box::new(task)),
    })
}
