//! HTTP ingest API module initialization.

use std::sync::Arc;

use watchpost_core::config::WatchpostConfig;
use watchpost_ingest::IngestGateway;

use super::ModuleHandle;
use crate::server::HttpServer;

/// Initialize the HTTP API module.
///
/// Returns `None` if the server is disabled in configuration.
pub fn init(config: &WatchpostConfig, gateway: Arc<IngestGateway>) -> Option<ModuleHandle> {
    if !config.server.enabled {
        tracing::info!("HTTP ingest API disabled in configuration");
        return None;
    }

    tracing::info!(listen_addr = %config.server.listen_addr, "initializing HTTP ingest API");
    let server = HttpServer::new(config.server.listen_addr.clone(), gateway);
    Some(ModuleHandle::new("http-api", true, Box::new(server)))
}
