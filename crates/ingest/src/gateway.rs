//! 인제스트 게이트웨이 -- 이벤트에 식별자를 부여하고 큐에 적재
//!
//! # 흐름
//! ```text
//! ingest(event) -> validate -> event_id/ingested_at 부여 -> JSON
//!     queued:    handoff 채널 (try_send) -> EnqueueTask -> DurableQueue::push
//!     confirmed: DurableQueue::push 완료 후 응답
//! ```
//!
//! `queued` 모드에서는 push 실패가 호출자에게 전달되지 않습니다.
//! 실패는 로그와 카운터로만 남습니다.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use watchpost_core::config::GatewayConfig as CoreGatewayConfig;
use watchpost_core::error::{PipelineError, QueueError, WatchpostError};
use watchpost_core::event::{EventSource, IngestedEvent, SecurityEvent};
use watchpost_core::metrics as m;
use watchpost_core::pipeline::{BoxFuture, HealthStatus, Pipeline};
use watchpost_core::queue::{DurableQueue, QueueStats, QueueStatus};

use crate::error::IngestError;
use crate::sink::{EventSink, IngestReceipt};

/// 프로세스 전역 이벤트 순번
static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// 이벤트 ID를 생성합니다.
///
/// 형식: `evt_<YYYYMMDD>_<HHMMSS>_<마이크로초 6자리>_<순번 8자리>`.
/// 순번은 프로세스 전역으로 증가하므로 같은 마이크로초에 생성되어도 겹치지 않습니다.
pub fn next_event_id(at: DateTime<Utc>) -> String {
    let seq = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
    format!("evt_{}_{seq:08}", at.format("%Y%m%d_%H%M%S_%6f"))
}

/// 응답 시점
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// 핸드오프 후 즉시 응답
    #[default]
    Queued,
    /// push 완료 후 응답
    Confirmed,
}

impl FromStr for AckMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "confirmed" => Ok(Self::Confirmed),
            other => Err(IngestError::Config {
                field: "gateway.ack_mode".to_owned(),
                reason: format!("unknown ack mode '{other}'"),
            }),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// 게이트웨이 설정
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 응답 시점
    pub ack_mode: AckMode,
    /// 백로그 판정 임계값
    pub backlog_threshold: usize,
    /// 핸드오프 채널 용량
    pub handoff_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let core = CoreGatewayConfig::default();
        Self {
            ack_mode: AckMode::default(),
            backlog_threshold: core.backlog_threshold,
            handoff_capacity: core.handoff_capacity,
        }
    }
}

impl GatewayConfig {
    /// core의 `GatewayConfig`에서 게이트웨이 설정을 생성합니다.
    pub fn from_core(core: &CoreGatewayConfig) -> Result<Self, IngestError> {
        Ok(Self {
            ack_mode: core.ack_mode.parse()?,
            backlog_threshold: core.backlog_threshold,
            handoff_capacity: core.handoff_capacity.max(1),
        })
    }
}

/// 게이트웨이 거절 사유
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 이벤트 검증 실패
    #[error("validation failed: {0}")]
    Validation(String),

    /// 핸드오프 버퍼 포화
    #[error("ingest overloaded: handoff buffer of {capacity} is full")]
    Overloaded {
        /// 버퍼 용량
        capacity: usize,
    },

    /// 적재 태스크가 종료됨
    #[error("ingest gateway closed")]
    Closed,

    /// 큐 적재 실패 (confirmed 모드)
    #[error("queue push failed: {0}")]
    Queue(#[from] QueueError),

    /// 직렬화 실패
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl GatewayError {
    fn reason_label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Overloaded { .. } => "overloaded",
            Self::Closed => "closed",
            Self::Queue(_) => "queue",
            Self::Encode(_) => "encode",
        }
    }
}

/// 이벤트 검증
///
/// `source`와 `timestamp` 형식은 역직렬화 단계에서 이미 보장됩니다.
pub fn validate_event(event: &SecurityEvent) -> Result<(), GatewayError> {
    if event.raw_message.trim().is_empty() {
        return Err(GatewayError::Validation(
            "raw_message must not be blank".to_owned(),
        ));
    }
    if event.severity.trim().is_empty() {
        return Err(GatewayError::Validation(
            "severity must not be blank".to_owned(),
        ));
    }
    if let Some(ip) = &event.source_ip {
        if event.source != EventSource::Syslog {
            return Err(GatewayError::Validation(format!(
                "source_ip is only allowed for syslog events, got source '{}'",
                event.source
            )));
        }
        if ip.parse::<IpAddr>().is_err() {
            return Err(GatewayError::Validation(format!(
                "source_ip '{ip}' is not an IP address"
            )));
        }
    }
    Ok(())
}

/// 인제스트 게이트웨이
///
/// HTTP 핸들러와 로컬 수집기가 `Arc`로 공유합니다.
pub struct IngestGateway {
    config: GatewayConfig,
    queue: Arc<dyn DurableQueue>,
    handoff: mpsc::Sender<String>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl IngestGateway {
    /// 게이트웨이와 적재 태스크를 생성합니다.
    ///
    /// 반환된 [`EnqueueTask`]를 시작해야 `queued` 모드 이벤트가 큐에 도달합니다.
    pub fn new(config: GatewayConfig, queue: Arc<dyn DurableQueue>) -> (Self, EnqueueTask) {
        let (handoff, rx) = mpsc::channel(config.handoff_capacity);
        let task = EnqueueTask::new(rx, Arc::clone(&queue));
        let gateway = Self {
            config,
            queue,
            handoff,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        };
        (gateway, task)
    }

    /// 이벤트를 검증하고 식별자를 부여해 적재합니다.
    pub async fn ingest(&self, event: SecurityEvent) -> Result<IngestReceipt, GatewayError> {
        let result = self.accept(event).await;
        match &result {
            Ok(receipt) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %receipt.event_id, "event accepted");
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                counter!(m::GATEWAY_EVENTS_REJECTED_TOTAL, m::LABEL_REASON => e.reason_label())
                    .increment(1);
                warn!(error = %e, "event rejected");
            }
        }
        result
    }

    async fn accept(&self, event: SecurityEvent) -> Result<IngestReceipt, GatewayError> {
        validate_event(&event)?;

        let now = Utc::now();
        let event_id = next_event_id(now);
        let source = event.source;
        let ingested = IngestedEvent {
            event_id: event_id.clone(),
            // 생산자 시계가 앞서 있으면 수신 시각을 이벤트 시각으로 맞춤
            ingested_at: now.max(event.timestamp),
            event,
        };
        let item = ingested
            .to_queue_item()
            .map_err(|e| GatewayError::Encode(e.to_string()))?;

        match self.config.ack_mode {
            AckMode::Queued => self.handoff.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => GatewayError::Overloaded {
                    capacity: self.config.handoff_capacity,
                },
                mpsc::error::TrySendError::Closed(_) => GatewayError::Closed,
            })?,
            AckMode::Confirmed => {
                if let Err(e) = self.queue.push(item).await {
                    counter!(m::GATEWAY_PUSH_FAILURES_TOTAL).increment(1);
                    error!(event_id = %event_id, error = %e, "queue push failed");
                    return Err(e.into());
                }
            }
        }

        counter!(m::GATEWAY_EVENTS_ACCEPTED_TOTAL, m::LABEL_SOURCE => source.as_str())
            .increment(1);
        Ok(IngestReceipt::queued(event_id))
    }

    /// 큐 길이와 백로그 상태를 반환합니다.
    pub async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let queue_length = self.queue.len().await?;
        metrics::gauge!(m::QUEUE_LENGTH).set(queue_length as f64);
        Ok(QueueStats {
            queue_length,
            queue_name: self.queue.name().to_owned(),
            status: QueueStatus::from_length(queue_length, self.config.backlog_threshold),
        })
    }

    /// 응답 모드를 반환합니다.
    pub fn ack_mode(&self) -> AckMode {
        self.config.ack_mode
    }

    /// 수락한 이벤트 수를 반환합니다.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// 거절한 이벤트 수를 반환합니다.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl EventSink for IngestGateway {
    fn submit(&self, event: SecurityEvent) -> BoxFuture<'_, Result<IngestReceipt, IngestError>> {
        Box::pin(async move { self.ingest(event).await.map_err(IngestError::from) })
    }
}

/// 핸드오프 채널에서 항목을 꺼내 도착 순서대로 큐에 push하는 태스크
///
/// 취소되면 이미 수락된 항목을 모두 push한 뒤 종료합니다.
pub struct EnqueueTask {
    rx: Option<mpsc::Receiver<String>>,
    queue: Arc<dyn DurableQueue>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    pushed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl EnqueueTask {
    fn new(rx: mpsc::Receiver<String>, queue: Arc<dyn DurableQueue>) -> Self {
        Self {
            rx: Some(rx),
            queue,
            cancel: CancellationToken::new(),
            handle: None,
            pushed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// push에 성공한 항목 수를 반환합니다.
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// push에 실패한 항목 수를 반환합니다.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    async fn run(
        mut rx: mpsc::Receiver<String>,
        queue: Arc<dyn DurableQueue>,
        cancel: CancellationToken,
        pushed: Arc<AtomicU64>,
        failed: Arc<AtomicU64>,
    ) {
        let push = |item: String| {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            let failed = Arc::clone(&failed);
            async move {
                match queue.push(item).await {
                    Ok(()) => {
                        pushed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        counter!(m::GATEWAY_PUSH_FAILURES_TOTAL).increment(1);
                        error!(error = %e, queue = queue.name(), "queue push failed after ack");
                    }
                }
            }
        };

        loop {
            tokio::select! {
                biased;
                item = rx.recv() => match item {
                    Some(item) => push(item).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    rx.close();
                    let mut drained = 0usize;
                    while let Some(item) = rx.recv().await {
                        push(item).await;
                        drained += 1;
                    }
                    info!(drained, "enqueue task drained accepted events");
                    break;
                }
            }
        }
    }
}

impl Pipeline for EnqueueTask {
    async fn start(&mut self) -> Result<(), WatchpostError> {
        let rx = self.rx.take().ok_or(PipelineError::AlreadyRunning)?;
        self.cancel = CancellationToken::new();
        self.handle = Some(tokio::spawn(Self::run(
            rx,
            Arc::clone(&self.queue),
            self.cancel.clone(),
            Arc::clone(&self.pushed),
            Arc::clone(&self.failed),
        )));
        info!(queue = self.queue.name(), "enqueue task started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WatchpostError> {
        let handle = self.handle.take().ok_or(PipelineError::NotRunning)?;
        self.cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "enqueue task panicked");
        }
        info!("enqueue task stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.handle {
            Some(handle) if handle.is_finished() => {
                HealthStatus::Unhealthy("enqueue task exited".to_owned())
            }
            Some(_) => match self.failed_count() {
                0 => HealthStatus::Healthy,
                n => HealthStatus::Degraded(format!("{n} queue push failures")),
            },
            None => HealthStatus::Unhealthy("not running".to_owned()),
        }
    }
}
