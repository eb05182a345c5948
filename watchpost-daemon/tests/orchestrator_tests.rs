//! Orchestrator integration tests.
//!
//! Tests the full flow: config -> module init -> start -> ingest -> shutdown.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tokio::sync::oneshot;

use watchpost_core::config::WatchpostConfig;
use watchpost_daemon::orchestrator::Orchestrator;

/// Config with every module disabled and an in-memory queue.
fn minimal_test_config() -> WatchpostConfig {
    let toml_str = r#"
[general]
log_level = "info"

[server]
enabled = false

[queue]
backend = "memory"

[file_agent]
enabled = false

[syslog]
enabled = false

[worker]
enabled = false
"#;
    WatchpostConfig::parse(toml_str).expect("failed to parse minimal config")
}

/// Config with every module enabled on ephemeral local ports.
fn full_test_config(watch_path: &Path) -> WatchpostConfig {
    let mut config = minimal_test_config();
    config.server.enabled = true;
    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.file_agent.enabled = true;
    config.file_agent.watch_path = watch_path.display().to_string();
    config.file_agent.fallback_poll_secs = 1;
    config.syslog.enabled = true;
    config.syslog.bind = "127.0.0.1:0".to_string();
    config.worker.enabled = true;
    config.worker.pop_timeout_secs = 1;
    config.worker.analysis_delay_ms = 0;
    config
}

fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(data.as_bytes()).expect("append");
}

async fn stop_signal(rx: oneshot::Receiver<()>) -> anyhow::Result<&'static str> {
    let _ = rx.await;
    Ok("test")
}

#[tokio::test]
async fn test_build_with_all_modules_disabled() {
    // Given: Only the always-on enqueue task
    let orchestrator = Orchestrator::build_from_config(minimal_test_config())
        .await
        .expect("should build");

    // Then
    assert_eq!(orchestrator.module_names(), vec!["enqueue"]);
    assert_eq!(orchestrator.config().queue.backend, "memory");
}

#[tokio::test]
async fn test_modules_registered_consumers_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.log");
    append(&path, "");

    let orchestrator = Orchestrator::build_from_config(full_test_config(&path))
        .await
        .expect("should build");

    assert_eq!(
        orchestrator.module_names(),
        vec!["analysis-worker", "enqueue", "http-api", "file-agent", "syslog"]
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = minimal_test_config();
    config.gateway.ack_mode = "eventually".to_string();

    let result = Orchestrator::build_from_config(config).await;
    let err = result.err().expect("build should fail");
    assert!(err.to_string().contains("gateway.ack_mode"), "{err}");
}

#[tokio::test]
async fn test_build_from_missing_file_fails() {
    let result = Orchestrator::build(Path::new("/nonexistent/watchpost.toml")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_starts_and_stops_all_modules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.log");
    append(&path, "");

    let mut orchestrator = Orchestrator::build_from_config(full_test_config(&path))
        .await
        .expect("should build");

    // Shutdown fires immediately; start and ordered stop must both succeed
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.run_until(async { Ok("test") }),
    )
    .await
    .expect("run should finish");
    assert!(result.is_ok(), "run failed: {:?}", result.err());
}

#[tokio::test]
async fn test_startup_failure_is_reported() {
    // Given: The syslog address is already taken
    let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = minimal_test_config();
    config.syslog.enabled = true;
    config.syslog.bind = taken.local_addr().unwrap().to_string();

    let mut orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");

    // When / Then: run fails and already-started modules are rolled back
    let err = orchestrator
        .run_until(async { Ok("test") })
        .await
        .expect_err("run should fail");
    assert!(err.to_string().contains("syslog"), "{err}");
}

#[tokio::test]
async fn test_file_lines_reach_queue_through_local_gateway() {
    // Given: File agent only, submitting to the local gateway
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.log");
    append(&path, "old entry\n");

    let mut config = minimal_test_config();
    config.file_agent.enabled = true;
    config.file_agent.watch_path = path.display().to_string();
    config.file_agent.fallback_poll_secs = 1;

    let mut orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("should build");
    let gateway = orchestrator.gateway().clone();

    let (stop_tx, stop_rx) = oneshot::channel();
    let run = tokio::spawn(async move {
        let result = orchestrator.run_until(stop_signal(stop_rx)).await;
        (orchestrator, result)
    });

    // When: A new line is appended after startup
    tokio::time::sleep(Duration::from_millis(200)).await;
    append(&path, "Failed password for root from 10.0.0.9\n");

    let stats = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let stats = gateway.queue_stats().await.expect("stats");
            if stats.queue_length >= 1 {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("line should be queued");

    // Then: Only the new line is queued
    assert_eq!(stats.queue_length, 1);
    assert_eq!(stats.queue_name, "security_events");
    assert_eq!(gateway.accepted_count(), 1);

    let _ = stop_tx.send(());
    let (orchestrator, result) = run.await.expect("run task");
    assert!(result.is_ok());

    let health = orchestrator.health().await;
    assert_eq!(health.queue.map(|q| q.queue_length), Some(1));
}
