//! Module orchestration -- assembly, wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `watchpost-daemon`.
//! It opens the queue, builds the gateway and every enabled module,
//! manages startup/shutdown ordering, and runs the main loop.
//!
//! # Startup Order (consumers before sources)
//!
//! 1. Analysis worker (drains the queue)
//! 2. Enqueue task (moves gateway handoffs into the queue)
//! 3. HTTP API (accepts remote submissions)
//! 4. File agent
//! 5. Syslog receiver
//!
//! # Shutdown Order (reverse of startup)
//!
//! Sources stop first so that events already accepted still reach the
//! queue before the enqueue task drains and the worker exits.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use watchpost_core::config::WatchpostConfig;
use watchpost_core::event::AnalysisResult;
use watchpost_ingest::IngestGateway;

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::metrics_server;
use crate::modules::{self, ModuleRegistry};

/// Analysis result channel capacity.
const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Seconds between periodic health reports.
const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: WatchpostConfig,
    /// Registry of all modules (ordered for start/stop).
    modules: ModuleRegistry,
    /// Gateway shared by the HTTP API and local collectors.
    gateway: Arc<IngestGateway>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
    /// Analysis results, consumed by the result logger once running.
    results_rx: Option<mpsc::Receiver<AnalysisResult>>,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - The queue cannot be opened or a module fails to initialize
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = WatchpostConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: WatchpostConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let gateway_parts = modules::gateway::init(&config)?;
        let gateway = gateway_parts.gateway;
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(16);

        let mut registry = ModuleRegistry::new();

        if let Some(handle) =
            modules::worker::init(&config, Arc::clone(&gateway_parts.queue), results_tx)
        {
            registry.register(handle);
        }
        registry.register(gateway_parts.handle);
        if let Some(handle) = modules::http_api::init(&config, Arc::clone(&gateway)) {
            registry.register(handle);
        }

        let sink = modules::select_sink(&config, &gateway)?;
        if let Some(handle) = modules::file_agent::init(&config, Arc::clone(&sink)) {
            registry.register(handle);
        }
        if let Some(handle) = modules::syslog::init(&config, sink) {
            registry.register(handle);
        }

        tracing::info!(
            modules = ?registry.names(),
            enabled = registry.enabled_count(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            modules: registry,
            gateway,
            shutdown_tx,
            start_time: Instant::now(),
            results_rx: Some(results_rx),
        })
    }

    /// Start all enabled modules and block until `SIGTERM` or `SIGINT`.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start all enabled modules and block until `shutdown` resolves.
    ///
    /// `shutdown` yields the name of the trigger for logging.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        self.start_time = Instant::now();

        tracing::info!("starting all modules");
        if let Err(e) = self.modules.start_all().await {
            tracing::warn!("startup failed, rolling back already-started modules");
            if let Err(stop_err) = self.modules.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            return Err(e);
        }

        let result_logger = self
            .results_rx
            .take()
            .map(|rx| spawn_result_logger(rx, self.shutdown_tx.subscribe()));

        let mut health_interval =
            tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        health_interval.tick().await;

        tracing::info!("entering main loop");
        tokio::pin!(shutdown);
        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal?,
                _ = health_interval.tick() => {
                    let health = self.health().await;
                    log_health(&health);
                }
            }
        };
        tracing::info!(signal = signal, "shutdown signal received");

        let stopped = self.shutdown().await;

        let _ = self.shutdown_tx.send(());
        if let Some(task) = result_logger {
            let _ = task.await;
        }

        stopped
    }

    /// Stop all modules, sources first.
    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping all modules");
        self.modules.stop_all().await
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let modules: Vec<ModuleHealth> = self
            .modules
            .health_statuses()
            .await
            .into_iter()
            .map(|(name, enabled, status)| ModuleHealth {
                name,
                enabled,
                status,
            })
            .collect();

        let queue = match self.gateway.queue_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read queue stats");
                None
            }
        };

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs: self.start_time.elapsed().as_secs(),
            modules,
            queue,
        }
    }

    /// Names of registered modules in start order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.names()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &WatchpostConfig {
        &self.config
    }

    /// Gateway shared by the HTTP API and local collectors.
    pub fn gateway(&self) -> &Arc<IngestGateway> {
        &self.gateway
    }
}

fn log_health(health: &DaemonHealth) {
    let queue_length = health.queue.as_ref().map(|q| q.queue_length);
    let queue_status = health.queue.as_ref().map(|q| q.status.to_string());
    if health.status.is_healthy() {
        tracing::info!(
            uptime_secs = health.uptime_secs,
            queue_length = ?queue_length,
            queue_status = ?queue_status,
            "daemon healthy"
        );
    } else {
        tracing::warn!(
            status = %health.status,
            uptime_secs = health.uptime_secs,
            queue_length = ?queue_length,
            queue_status = ?queue_status,
            "daemon health degraded"
        );
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Spawn a background task that logs analysis results.
fn spawn_result_logger(
    mut results_rx: mpsc::Receiver<AnalysisResult>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = results_rx.recv() => {
                    match result {
                        Some(result) => {
                            tracing::info!(
                                event_id = %result.event_id,
                                risk_score = result.risk_score,
                                confidence = result.confidence,
                                recommended_action = %result.recommended_action,
                                summary = %result.summary,
                                "analysis completed"
                            );
                        }
                        None => {
                            tracing::debug!("result channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("result logger shutting down");
                    break;
                }
            }
        }
    })
}
