//! Analysis worker module initialization.
//!
//! ```text
//! DurableQueue --> AnalysisWorker --AnalysisResult--> results_tx --> result logger
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use watchpost_core::config::WatchpostConfig;
use watchpost_core::event::AnalysisResult;
use watchpost_core::queue::DurableQueue;
use watchpost_ingest::{AnalysisWorker, StubAnalyzer, WorkerConfig};

use super::ModuleHandle;

/// Initialize the analysis worker.
///
/// Returns `None` if the worker is disabled in configuration.
pub fn init(
    config: &WatchpostConfig,
    queue: Arc<dyn DurableQueue>,
    results_tx: mpsc::Sender<AnalysisResult>,
) -> Option<ModuleHandle> {
    if !config.worker.enabled {
        tracing::info!("analysis worker disabled in configuration");
        return None;
    }

    let worker_config = WorkerConfig::from_core(&config.worker);
    tracing::info!(
        queue = %queue.name(),
        pop_timeout_secs = config.worker.pop_timeout_secs,
        backoff_secs = config.worker.backoff_secs,
        "initializing analysis worker"
    );
    let worker = AnalysisWorker::with_results(
        worker_config,
        queue,
        Arc::new(StubAnalyzer::from_core(&config.worker)),
        results_tx,
    );
    Some(ModuleHandle::new("analysis-worker", true, Box::new(worker)))
}
