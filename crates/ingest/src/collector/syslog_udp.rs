//! UDP Syslog 수집기
//!
//! UDP 소켓으로 syslog 메시지를 수신합니다. 데이터그램 하나가 이벤트 하나이며
//! 재조립하지 않습니다. 특권 포트 514 대신 기본값 5140에 바인드합니다.
//!
//! # 구조
//! ```text
//! recv 루프 --(try_send, bounded)--> 전달 태스크 --> EventSink
//! ```
//! 수신 루프는 싱크를 기다리지 않습니다. 버퍼가 가득 차면 데이터그램을 버리고
//! 카운트합니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use metrics::counter;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use watchpost_core::config::SyslogConfig;
use watchpost_core::error::{PipelineError, WatchpostError};
use watchpost_core::event::SecurityEvent;
use watchpost_core::metrics as m;
use watchpost_core::pipeline::{HealthStatus, Pipeline};

use super::CollectorStatus;
use crate::error::IngestError;
use crate::normalizer::normalize_datagram;
use crate::sink::EventSink;

/// UDP syslog 수집기 설정
#[derive(Debug, Clone)]
pub struct SyslogUdpConfig {
    /// 바인드 주소 (예: "0.0.0.0:5140")
    pub bind_addr: String,
    /// 최대 메시지 크기 (바이트, UDP이므로 65535 이하)
    pub max_message_size: usize,
    /// 수신 -> 전달 버퍼 용량
    pub buffer_capacity: usize,
}

impl Default for SyslogUdpConfig {
    fn default() -> Self {
        Self::from_core(&SyslogConfig::default())
    }
}

impl SyslogUdpConfig {
    /// core의 `SyslogConfig`에서 수집기 설정을 생성합니다.
    pub fn from_core(core: &SyslogConfig) -> Self {
        Self {
            bind_addr: core.bind.clone(),
            max_message_size: core.max_message_size,
            buffer_capacity: core.buffer_capacity,
        }
    }
}

#[derive(Debug, Default)]
struct SyslogCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

/// UDP Syslog 수집기
pub struct SyslogUdpCollector {
    config: SyslogUdpConfig,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    status: CollectorStatus,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    counters: Arc<SyslogCounters>,
}

impl SyslogUdpCollector {
    /// 새 UDP syslog 수집기를 생성합니다.
    pub fn new(config: SyslogUdpConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            cancel: CancellationToken::new(),
            status: CollectorStatus::Idle,
            local_addr: None,
            tasks: Vec::new(),
            counters: Arc::new(SyslogCounters::default()),
        }
    }

    /// 설정된 바인드 주소를 반환합니다.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// 실제 바인드된 주소를 반환합니다 (시작 후).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }

    /// 수신한 데이터그램 수
    pub fn received_count(&self) -> u64 {
        self.counters.received.load(Ordering::Relaxed)
    }

    /// 버퍼 포화로 버린 데이터그램 수
    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// 싱크에 제출한 이벤트 수
    pub fn forwarded_count(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    async fn receive_loop(
        socket: UdpSocket,
        max_message_size: usize,
        tx: mpsc::Sender<SecurityEvent>,
        cancel: CancellationToken,
        counters: Arc<SyslogCounters>,
    ) {
        let mut buf = vec![0u8; max_message_size];
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = socket.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            warn!(error = %e, "syslog recv failed");
                            continue;
                        }
                    };
                    counters.received.fetch_add(1, Ordering::Relaxed);
                    counter!(m::SYSLOG_DATAGRAMS_RECEIVED_TOTAL).increment(1);

                    let Some(event) = normalize_datagram(&buf[..len], peer.ip(), Utc::now()) else {
                        debug!(peer = %peer, "ignoring empty syslog datagram");
                        continue;
                    };

                    match tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            counters.dropped.fetch_add(1, Ordering::Relaxed);
                            counter!(m::SYSLOG_DATAGRAMS_DROPPED_TOTAL).increment(1);
                            warn!(peer = %peer, "syslog buffer full, dropping datagram");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            warn!("syslog forward task gone, stopping receiver");
                            break;
                        }
                    }
                }
            }
        }
        debug!("syslog receive loop exited");
    }

    /// 수신 루프가 끝나 송신측이 닫히면 남은 이벤트를 모두 제출하고 종료합니다.
    async fn forward_loop(
        mut rx: mpsc::Receiver<SecurityEvent>,
        sink: Arc<dyn EventSink>,
        counters: Arc<SyslogCounters>,
    ) {
        while let Some(event) = rx.recv().await {
            match sink.submit(event).await {
                Ok(receipt) => {
                    counters.forwarded.fetch_add(1, Ordering::Relaxed);
                    debug!(event_id = %receipt.event_id, "syslog event submitted");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    counter!(m::SYSLOG_SUBMIT_FAILURES_TOTAL).increment(1);
                    warn!(error = %e, "failed to submit syslog event");
                }
            }
        }
        debug!("syslog forward loop exited");
    }
}

impl Pipeline for SyslogUdpCollector {
    async fn start(&mut self) -> Result<(), WatchpostError> {
        if self.status == CollectorStatus::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let socket = match UdpSocket::bind(&self.config.bind_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                let err = IngestError::Collector {
                    source_type: "syslog_udp".to_owned(),
                    reason: format!("failed to bind to {}: {e}", self.config.bind_addr),
                };
                self.status = CollectorStatus::Error(err.to_string());
                return Err(err.into());
            }
        };
        self.local_addr = socket.local_addr().ok();
        info!(
            bind = %self.config.bind_addr,
            local_addr = ?self.local_addr,
            buffer_capacity = self.config.buffer_capacity,
            "syslog UDP collector listening"
        );

        let (tx, rx) = mpsc::channel(self.config.buffer_capacity.max(1));
        self.cancel = CancellationToken::new();
        self.tasks.push(tokio::spawn(Self::receive_loop(
            socket,
            self.config.max_message_size.max(1),
            tx,
            self.cancel.clone(),
            Arc::clone(&self.counters),
        )));
        self.tasks.push(tokio::spawn(Self::forward_loop(
            rx,
            Arc::clone(&self.sink),
            Arc::clone(&self.counters),
        )));

        self.status = CollectorStatus::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WatchpostError> {
        if self.status != CollectorStatus::Running {
            return Err(PipelineError::NotRunning.into());
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "syslog task panicked");
            }
        }
        self.status = CollectorStatus::Stopped;
        info!(
            received = self.received_count(),
            dropped = self.dropped_count(),
            "syslog UDP collector stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if self.tasks.iter().any(JoinHandle::is_finished) {
            return HealthStatus::Unhealthy("syslog task exited".to_owned());
        }
        match self.status.health() {
            HealthStatus::Healthy if self.dropped_count() > 0 => HealthStatus::Degraded(format!(
                "{} datagrams dropped on full buffer",
                self.dropped_count()
            )),
            other => other,
        }
    }
}
