//! Syslog receiver module initialization.

use std::sync::Arc;

use watchpost_core::config::WatchpostConfig;
use watchpost_ingest::{EventSink, SyslogUdpCollector, SyslogUdpConfig};

use super::ModuleHandle;

/// Initialize the UDP syslog receiver.
///
/// Returns `None` if syslog is disabled in configuration. The socket is
/// bound when the module starts, not here.
pub fn init(config: &WatchpostConfig, sink: Arc<dyn EventSink>) -> Option<ModuleHandle> {
    if !config.syslog.enabled {
        tracing::info!("syslog receiver disabled in configuration");
        return None;
    }

    let collector_config = SyslogUdpConfig::from_core(&config.syslog);
    tracing::info!(bind = %collector_config.bind_addr, "initializing syslog receiver");
    let collector = SyslogUdpCollector::new(collector_config, sink);
    Some(ModuleHandle::new("syslog", true, Box::new(collector)))
}
