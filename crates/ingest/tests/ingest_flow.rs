//! 통합 테스트 -- 수집부터 분석까지 전체 흐름 검증
//!
//! 실제 파일, UDP 소켓, 큐 백엔드를 사용합니다.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use watchpost_core::event::{EventSource, IngestedEvent, SecurityEvent};
use watchpost_core::pipeline::Pipeline;
use watchpost_core::queue::DurableQueue;
use watchpost_ingest::{
    AckMode, AnalysisWorker, FileCollector, FileCollectorConfig, GatewayConfig, IngestGateway,
    JournalQueue, JournalQueueConfig, MemoryQueue, StubAnalyzer, SyslogUdpCollector,
    SyslogUdpConfig, WorkerConfig,
};

fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(data.as_bytes()).expect("append");
}

fn confirmed() -> GatewayConfig {
    GatewayConfig {
        ack_mode: AckMode::Confirmed,
        ..GatewayConfig::default()
    }
}

/// 큐 길이가 `expected`가 될 때까지 기다립니다.
async fn wait_for_len(queue: &dyn DurableQueue, expected: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if queue.len().await.expect("len") >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queue did not reach expected length in time");
}

async fn pop_event(queue: &dyn DurableQueue) -> IngestedEvent {
    let item = queue
        .blocking_pop(Duration::from_secs(1))
        .await
        .expect("pop")
        .expect("item");
    IngestedEvent::from_queue_item(&item).expect("decode")
}

#[tokio::test]
async fn file_append_scenario_delivers_only_new_complete_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.log");
    append(&path, "line1\n");

    let queue = Arc::new(MemoryQueue::new("security_events"));
    let (gateway, _task) = IngestGateway::new(confirmed(), queue.clone());
    let config = FileCollectorConfig {
        watch_path: path.clone(),
        fallback_poll_secs: 1,
        ..FileCollectorConfig::default()
    }
    .with_hostname("web-01");
    let mut collector = FileCollector::new(config, Arc::new(gateway));
    collector.start().await.unwrap();

    append(&path, "line2\nline3");
    wait_for_len(queue.as_ref(), 1).await;

    let event = pop_event(queue.as_ref()).await;
    assert_eq!(event.event.raw_message, "line2");
    assert_eq!(event.event.source, EventSource::FileAgent);
    assert_eq!(event.event.hostname.as_deref(), Some("web-01"));
    assert_eq!(
        event.event.filename.as_deref(),
        Some(path.display().to_string().as_str())
    );

    // line3는 개행이 올 때까지 대기
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(queue.len().await.unwrap(), 0);

    append(&path, "\n");
    wait_for_len(queue.as_ref(), 1).await;
    assert_eq!(pop_event(queue.as_ref()).await.event.raw_message, "line3");

    collector.stop().await.unwrap();
    assert_eq!(collector.lines_read(), 2);
}

#[tokio::test]
async fn syslog_datagram_becomes_queued_event() {
    let queue = Arc::new(MemoryQueue::new("security_events"));
    let (gateway, _task) = IngestGateway::new(confirmed(), queue.clone());
    let config = SyslogUdpConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        ..SyslogUdpConfig::default()
    };
    let mut collector = SyslogUdpCollector::new(config, Arc::new(gateway));
    collector.start().await.unwrap();
    let target = collector.local_addr().expect("bound address");

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(b"   ", target).await.unwrap();
    sender
        .send_to(b"auth failure user=root\n", target)
        .await
        .unwrap();

    wait_for_len(queue.as_ref(), 1).await;
    let event = pop_event(queue.as_ref()).await;
    assert_eq!(event.event.source, EventSource::Syslog);
    assert_eq!(event.event.raw_message, "auth failure user=root");
    assert_eq!(event.event.source_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(event.event.severity, "Unknown");
    assert!(event.event_id.starts_with("evt_"));

    collector.stop().await.unwrap();
    assert_eq!(collector.received_count(), 2);
    assert_eq!(collector.forwarded_count(), 1);
    // 공백 데이터그램은 큐에 도달하지 않음
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn interleaved_producers_keep_arrival_order() {
    let queue = Arc::new(MemoryQueue::new("security_events"));
    let (gateway, _task) = IngestGateway::new(confirmed(), queue.clone());

    let mut expected = Vec::new();
    for i in 0..20 {
        let event = if i % 2 == 0 {
            SecurityEvent::new(EventSource::FileAgent, format!("file-{i}"), Utc::now())
                .with_filename("/var/log/auth.log")
        } else {
            SecurityEvent::new(EventSource::Syslog, format!("syslog-{i}"), Utc::now())
                .with_source_ip("10.0.0.5")
        };
        expected.push(event.raw_message.clone());
        gateway.ingest(event).await.unwrap();
    }

    let mut popped = Vec::new();
    for _ in 0..20 {
        popped.push(pop_event(queue.as_ref()).await.event.raw_message);
    }
    assert_eq!(popped, expected);
}

#[tokio::test]
async fn queued_ack_flows_through_worker() {
    let queue = Arc::new(MemoryQueue::new("security_events"));
    let (gateway, mut enqueue) = IngestGateway::new(GatewayConfig::default(), queue.clone());
    enqueue.start().await.unwrap();

    let (results_tx, mut results_rx) = mpsc::channel(16);
    let mut worker = AnalysisWorker::with_results(
        WorkerConfig {
            pop_timeout: Duration::from_millis(100),
            backoff: Duration::from_millis(100),
        },
        queue.clone(),
        Arc::new(StubAnalyzer::new(Duration::ZERO)),
        results_tx,
    );
    worker.start().await.unwrap();

    let receipt = gateway
        .ingest(
            SecurityEvent::new(EventSource::Syslog, "sshd: invalid user admin", Utc::now())
                .with_source_ip("192.168.1.20"),
        )
        .await
        .unwrap();
    assert_eq!(receipt.status, "queued");

    let result = tokio::time::timeout(Duration::from_secs(5), results_rx.recv())
        .await
        .expect("result in time")
        .expect("result");
    assert_eq!(result.event_id, receipt.event_id);

    worker.stop().await.unwrap();
    enqueue.stop().await.unwrap();
    assert_eq!(worker.stats().processed, 1);
    assert_eq!(enqueue.pushed_count(), 1);
}

#[tokio::test]
async fn journal_queue_survives_restart_between_ingest_and_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let journal_config = JournalQueueConfig {
        dir: dir.path().to_path_buf(),
        name: "security_events".to_owned(),
        fsync: true,
        compact_threshold: 1024,
    };

    let receipt = {
        let queue = Arc::new(JournalQueue::open(journal_config.clone()).unwrap());
        let (gateway, _task) = IngestGateway::new(confirmed(), queue);
        gateway
            .ingest(SecurityEvent::new(
                EventSource::FileAgent,
                "Accepted publickey for deploy",
                Utc::now(),
            ))
            .await
            .unwrap()
    };

    let queue = Arc::new(JournalQueue::open(journal_config).unwrap());
    assert_eq!(queue.len().await.unwrap(), 1);
    let event = pop_event(queue.as_ref()).await;
    assert_eq!(event.event_id, receipt.event_id);
    assert_eq!(event.event.raw_message, "Accepted publickey for deploy");
}
