//! Module registry and initialization.
//!
//! Each component (HTTP API, enqueue task, collectors, analysis worker)
//! is wrapped as a [`ModuleHandle`] that provides uniform lifecycle
//! management via the [`DynPipeline`] trait.
//!
//! The [`ModuleRegistry`] starts modules in registration order and stops
//! them in reverse. Consumers are registered first so that sources are
//! the last to start and the first to stop.

pub mod file_agent;
pub mod gateway;
pub mod http_api;
pub mod syslog;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;

use watchpost_core::config::WatchpostConfig;
use watchpost_core::error::{PipelineError, WatchpostError};
use watchpost_core::pipeline::{DynPipeline, HealthStatus};
use watchpost_ingest::{EventSink, HttpForwarder, IngestGateway};

/// A handle to a registered module.
///
/// Wraps a `Box<dyn DynPipeline>` with metadata (name, enabled flag).
pub struct ModuleHandle {
    /// Module name for logging and health reporting.
    pub name: String,
    /// Whether this module is enabled in configuration.
    pub enabled: bool,
    /// The module's pipeline implementation (start/stop/health_check).
    pub pipeline: Box<dyn DynPipeline>,
}

impl ModuleHandle {
    /// Create a new module handle.
    pub fn new(name: impl Into<String>, enabled: bool, pipeline: Box<dyn DynPipeline>) -> Self {
        Self {
            name: name.into(),
            enabled,
            pipeline,
        }
    }

    /// Check the module's health status.
    ///
    /// Disabled modules always report `Healthy` (they are not expected to run).
    pub async fn health_check(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::Healthy;
        }
        self.pipeline.health_check().await
    }
}

/// Registry of all daemon modules.
pub struct ModuleRegistry {
    /// Modules in registration order (consumers before sources).
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register a module.
    pub fn register(&mut self, handle: ModuleHandle) {
        self.modules.push(handle);
    }

    /// Start all enabled modules in registration order.
    ///
    /// Returns an error on the first module that fails to start.
    /// Already-started modules are NOT rolled back; the caller should
    /// invoke `stop_all` if partial startup is unacceptable.
    pub async fn start_all(&mut self) -> Result<()> {
        for handle in &mut self.modules {
            if !handle.enabled {
                tracing::debug!(module = %handle.name, "skipping disabled module");
                continue;
            }

            tracing::info!(module = %handle.name, "starting module");
            handle
                .pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start module '{}': {}", handle.name, e))?;
            tracing::info!(module = %handle.name, "module started successfully");
        }
        Ok(())
    }

    /// Stop all enabled modules in reverse registration order.
    ///
    /// Logs errors but continues stopping remaining modules. Modules that
    /// were never started report `NotRunning`, which is logged and skipped.
    pub async fn stop_all(&mut self) -> Result<()> {
        let mut errors = Vec::new();

        for handle in self.modules.iter_mut().rev() {
            if !handle.enabled {
                continue;
            }

            tracing::info!(module = %handle.name, "stopping module");
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = %handle.name, "module stopped successfully"),
                Err(WatchpostError::Pipeline(PipelineError::NotRunning)) => {
                    tracing::debug!(module = %handle.name, "module was not running");
                }
                Err(e) => {
                    tracing::error!(
                        module = %handle.name,
                        error = %e,
                        "failed to stop module"
                    );
                    errors.push(format!("{}: {}", handle.name, e));
                }
            }
        }

        if !errors.is_empty() {
            return Err(anyhow::anyhow!(
                "errors stopping modules: {}",
                errors.join("; ")
            ));
        }

        Ok(())
    }

    /// Get health status for all modules as `(name, enabled, status)`.
    pub async fn health_statuses(&self) -> Vec<(String, bool, HealthStatus)> {
        let mut statuses = Vec::new();
        for handle in &self.modules {
            let status = handle.health_check().await;
            statuses.push((handle.name.clone(), handle.enabled, status));
        }
        statuses
    }

    /// Names of registered modules in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    /// Number of registered modules.
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// Number of enabled modules.
    pub fn enabled_count(&self) -> usize {
        self.modules.iter().filter(|m| m.enabled).count()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Choose where collectors submit their events.
///
/// With `forwarder.ingest_url` set, events are posted to the remote backend;
/// otherwise they go straight into the local gateway.
pub fn select_sink(
    config: &WatchpostConfig,
    gateway: &Arc<IngestGateway>,
) -> Result<Arc<dyn EventSink>> {
    if config.forwards_remotely() {
        let forwarder = HttpForwarder::new(&config.forwarder)
            .map_err(|e| anyhow::anyhow!("failed to build HTTP forwarder: {}", e))?;
        tracing::info!(ingest_url = %forwarder.ingest_url(), "collectors forward to remote ingest");
        Ok(Arc::new(forwarder))
    } else {
        tracing::info!("collectors submit to local gateway");
        Ok(Arc::clone(gateway) as Arc<dyn EventSink>)
    }
}
