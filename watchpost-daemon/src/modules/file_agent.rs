//! File agent module initialization.
//!
//! Converts `WatchpostConfig.file_agent` into a `FileCollectorConfig`
//! and wraps the collector in a `ModuleHandle`.

use std::sync::Arc;

use watchpost_core::config::WatchpostConfig;
use watchpost_ingest::{EventSink, FileCollector, FileCollectorConfig};

use super::ModuleHandle;

/// Initialize the file agent module.
///
/// Returns `None` if the file agent is disabled in configuration.
pub fn init(config: &WatchpostConfig, sink: Arc<dyn EventSink>) -> Option<ModuleHandle> {
    if !config.file_agent.enabled {
        tracing::info!("file agent disabled in configuration");
        return None;
    }

    let collector_config = FileCollectorConfig::from_core(&config.file_agent);
    tracing::info!(
        path = %collector_config.watch_path.display(),
        hostname = %collector_config.hostname,
        "initializing file agent"
    );
    let collector = FileCollector::new(collector_config, sink);
    Some(ModuleHandle::new("file-agent", true, Box::new(collector)))
}
