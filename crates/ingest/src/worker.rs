//! 분석 워커 -- 큐를 비우며 이벤트마다 분석기를 호출
//!
//! # 상태
//! ```text
//! Idle --start--> Running <--> BackingOff
//!                    \            /
//!                     `--cancel--> Stopped
//! ```
//!
//! - pop 타임아웃은 정상 유휴이며 다시 기다립니다.
//! - 역직렬화 실패 항목은 버리고 다시 넣지 않습니다.
//! - 분석 실패나 큐 에러 후에는 고정 시간 대기합니다. 실패한 항목은 재시도하지 않습니다.
//! - 취소는 모든 대기 지점(pop, backoff, 결과 전달)에서 확인합니다.
//!   진행 중인 `analyze()` 호출은 끝까지 실행됩니다.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use watchpost_core::config::WorkerConfig as CoreWorkerConfig;
use watchpost_core::error::{PipelineError, WatchpostError};
use watchpost_core::event::{AnalysisResult, IngestedEvent};
use watchpost_core::metrics as m;
use watchpost_core::pipeline::{HealthStatus, Pipeline};
use watchpost_core::queue::DurableQueue;

use crate::analysis::Analyzer;

/// 워커 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// 시작 전
    Idle,
    /// 큐 소비 중
    Running,
    /// 에러 후 대기 중
    BackingOff,
    /// 종료됨
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::BackingOff => write!(f, "backing_off"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// 워커 설정
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// blocking pop 타임아웃
    pub pop_timeout: Duration,
    /// 에러 후 대기 시간
    pub backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_core(&CoreWorkerConfig::default())
    }
}

impl WorkerConfig {
    /// core의 `WorkerConfig`에서 워커 설정을 생성합니다.
    pub fn from_core(core: &CoreWorkerConfig) -> Self {
        Self {
            pop_timeout: Duration::from_secs(core.pop_timeout_secs),
            backoff: Duration::from_secs(core.backoff_secs),
        }
    }
}

/// 워커 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// 분석 완료 수
    pub processed: u64,
    /// 분석 실패 수
    pub analysis_failures: u64,
    /// 역직렬화 불가로 버린 항목 수
    pub discarded: u64,
    /// 큐 에러 수
    pub queue_errors: u64,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    processed: AtomicU64,
    analysis_failures: AtomicU64,
    discarded: AtomicU64,
    queue_errors: AtomicU64,
}

impl WorkerCounters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            analysis_failures: self.analysis_failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }
}

/// 워커 루프가 공유하는 상태
struct WorkerContext {
    config: WorkerConfig,
    queue: Arc<dyn DurableQueue>,
    analyzer: Arc<dyn Analyzer>,
    results: Option<mpsc::Sender<AnalysisResult>>,
    state: watch::Sender<WorkerState>,
    counters: WorkerCounters,
}

impl WorkerContext {
    async fn run(&self, cancel: CancellationToken) {
        self.state.send_replace(WorkerState::Running);
        info!(queue = self.queue.name(), "analysis worker running");

        loop {
            let popped = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                popped = self.queue.blocking_pop(self.config.pop_timeout) => popped,
            };

            let keep_going = match popped {
                Ok(None) => {
                    trace!("queue idle");
                    true
                }
                Ok(Some(item)) => self.handle_item(&item, &cancel).await,
                Err(e) => {
                    self.counters.queue_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "queue pop failed");
                    self.back_off(&cancel).await
                }
            };
            if !keep_going {
                break;
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!("analysis worker stopped");
    }

    /// 항목 하나를 처리합니다. 계속 진행해야 하면 `true`.
    async fn handle_item(&self, item: &str, cancel: &CancellationToken) -> bool {
        let event = match IngestedEvent::from_queue_item(item) {
            Ok(event) => event,
            Err(e) => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                counter!(m::WORKER_DECODE_FAILURES_TOTAL).increment(1);
                warn!(error = %e, "discarding undecodable queue item");
                return true;
            }
        };

        let started = Instant::now();
        match self.analyzer.analyze(&event).await {
            Ok(result) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                counter!(m::WORKER_EVENTS_ANALYZED_TOTAL).increment(1);
                histogram!(m::WORKER_ANALYSIS_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                info!(
                    event_id = %result.event_id,
                    risk_score = result.risk_score,
                    action = %result.recommended_action,
                    "event analyzed"
                );
                self.publish(result, cancel).await
            }
            Err(e) => {
                self.counters.analysis_failures.fetch_add(1, Ordering::Relaxed);
                error!(event_id = %event.event_id, error = %e, "analysis failed, item dropped");
                self.back_off(cancel).await
            }
        }
    }

    async fn publish(&self, result: AnalysisResult, cancel: &CancellationToken) -> bool {
        let Some(results) = &self.results else {
            return true;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = results.send(result) => {
                if sent.is_err() {
                    debug!("analysis result receiver dropped");
                }
                true
            }
        }
    }

    /// backoff 동안 대기합니다. 취소되면 `false`.
    async fn back_off(&self, cancel: &CancellationToken) -> bool {
        self.state.send_replace(WorkerState::BackingOff);
        counter!(m::WORKER_BACKOFFS_TOTAL).increment(1);
        warn!(backoff_secs = self.config.backoff.as_secs_f64(), "analysis worker backing off");

        let resumed = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.backoff) => true,
        };
        if resumed {
            self.state.send_replace(WorkerState::Running);
        }
        resumed
    }
}

/// 분석 워커
///
/// 큐당 하나만 실행합니다.
pub struct AnalysisWorker {
    context: Arc<WorkerContext>,
    state_rx: watch::Receiver<WorkerState>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    /// 새 워커를 생성합니다.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn DurableQueue>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self::build(config, queue, analyzer, None)
    }

    /// 분석 결과를 채널로 전달하는 워커를 생성합니다.
    pub fn with_results(
        config: WorkerConfig,
        queue: Arc<dyn DurableQueue>,
        analyzer: Arc<dyn Analyzer>,
        results: mpsc::Sender<AnalysisResult>,
    ) -> Self {
        Self::build(config, queue, analyzer, Some(results))
    }

    fn build(
        config: WorkerConfig,
        queue: Arc<dyn DurableQueue>,
        analyzer: Arc<dyn Analyzer>,
        results: Option<mpsc::Sender<AnalysisResult>>,
    ) -> Self {
        let (state, state_rx) = watch::channel(WorkerState::Idle);
        Self {
            context: Arc::new(WorkerContext {
                config,
                queue,
                analyzer,
                results,
                state,
                counters: WorkerCounters::default(),
            }),
            state_rx,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// 현재 상태를 반환합니다.
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// 상태 변경을 구독합니다.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    /// 카운터 스냅샷을 반환합니다.
    pub fn stats(&self) -> WorkerStats {
        self.context.counters.snapshot()
    }
}

impl Pipeline for AnalysisWorker {
    async fn start(&mut self) -> Result<(), WatchpostError> {
        if self.handle.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }
        self.cancel = CancellationToken::new();
        let context = Arc::clone(&self.context);
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(async move { context.run(cancel).await }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WatchpostError> {
        let handle = self.handle.take().ok_or(PipelineError::NotRunning)?;
        self.cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "analysis worker task panicked");
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state() {
            WorkerState::Running => HealthStatus::Healthy,
            WorkerState::BackingOff => {
                HealthStatus::Degraded("backing off after failure".to_owned())
            }
            WorkerState::Idle => HealthStatus::Unhealthy("not started".to_owned()),
            WorkerState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::queue::MemoryQueue;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use watchpost_core::error::QueueError;
    use watchpost_core::event::{EventSource, SecurityEvent};
    use watchpost_core::pipeline::BoxFuture;

    /// pop이 항상 실패하는 큐
    #[derive(Default)]
    struct BrokenQueue {
        pops: AtomicUsize,
    }

    impl DurableQueue for BrokenQueue {
        fn name(&self) -> &str {
            "broken"
        }

        fn push(&self, _item: String) -> BoxFuture<'_, Result<(), QueueError>> {
            Box::pin(async { Ok(()) })
        }

        fn blocking_pop(
            &self,
            _timeout: Duration,
        ) -> BoxFuture<'_, Result<Option<String>, QueueError>> {
            self.pops.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(QueueError::Storage("journal unreadable".to_owned())) })
        }

        fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
            Box::pin(async { Ok(0) })
        }
    }

    struct FailingAnalyzer;

    impl Analyzer for FailingAnalyzer {
        fn analyze<'a>(
            &'a self,
            _event: &'a IngestedEvent,
        ) -> BoxFuture<'a, Result<AnalysisResult, IngestError>> {
            Box::pin(async { Err(IngestError::Analysis("model unavailable".to_owned())) })
        }
    }

    struct EchoAnalyzer;

    impl Analyzer for EchoAnalyzer {
        fn analyze<'a>(
            &'a self,
            event: &'a IngestedEvent,
        ) -> BoxFuture<'a, Result<AnalysisResult, IngestError>> {
            Box::pin(async move {
                Ok(AnalysisResult {
                    event_id: event.event_id.clone(),
                    summary: event.event.raw_message.clone(),
                    risk_score: 0.5,
                    recommended_action: "none".to_owned(),
                    confidence: 1.0,
                    analyzed_at: Utc::now(),
                })
            })
        }
    }

    fn item(id: &str, msg: &str) -> String {
        IngestedEvent {
            event_id: id.to_owned(),
            ingested_at: Utc::now(),
            event: SecurityEvent::new(EventSource::Syslog, msg, Utc::now()),
        }
        .to_queue_item()
        .unwrap()
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            pop_timeout: Duration::from_millis(50),
            backoff: Duration::from_secs(5),
        }
    }

    #[test]
    fn config_from_core_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.pop_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn processes_items_in_order_and_publishes_results() {
        let queue = Arc::new(MemoryQueue::new("q"));
        queue.push(item("evt_1", "first")).await.unwrap();
        queue.push(item("evt_2", "second")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut worker =
            AnalysisWorker::with_results(fast_config(), queue.clone(), Arc::new(EchoAnalyzer), tx);
        worker.start().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event_id, "evt_1");
        assert_eq!(second.summary, "second");

        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.stats().processed, 2);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn undecodable_item_is_discarded() {
        let queue = Arc::new(MemoryQueue::new("q"));
        queue.push("{not json".to_owned()).await.unwrap();
        queue.push(item("evt_ok", "fine")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut worker =
            AnalysisWorker::with_results(fast_config(), queue.clone(), Arc::new(EchoAnalyzer), tx);
        worker.start().await.unwrap();

        let result = rx.recv().await.unwrap();
        assert_eq!(result.event_id, "evt_ok");
        worker.stop().await.unwrap();

        let stats = worker.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.analysis_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn analysis_failure_backs_off_without_requeue() {
        let queue = Arc::new(MemoryQueue::new("q"));
        queue.push(item("evt_bad", "boom")).await.unwrap();

        let mut worker = AnalysisWorker::new(fast_config(), queue.clone(), Arc::new(FailingAnalyzer));
        let mut state = worker.subscribe_state();
        worker.start().await.unwrap();

        state
            .wait_for(|s| *s == WorkerState::BackingOff)
            .await
            .unwrap();
        assert!(worker.health_check().await.to_string().contains("degraded"));
        assert_eq!(worker.stats().analysis_failures, 1);
        assert_eq!(queue.len().await.unwrap(), 0);

        // backoff 이후 다시 Running
        state.wait_for(|s| *s == WorkerState::Running).await.unwrap();

        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_error_backs_off_before_next_pop() {
        let queue = Arc::new(BrokenQueue::default());
        let mut worker = AnalysisWorker::new(fast_config(), queue.clone(), Arc::new(EchoAnalyzer));
        let mut state = worker.subscribe_state();
        worker.start().await.unwrap();

        state
            .wait_for(|s| *s == WorkerState::BackingOff)
            .await
            .unwrap();
        assert_eq!(worker.stats().queue_errors, 1);
        assert_eq!(queue.pops.load(Ordering::SeqCst), 1);
        assert!(worker.health_check().await.to_string().contains("degraded"));

        // backoff(5초) 동안은 다시 pop하지 않음
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(queue.pops.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.pops.load(Ordering::SeqCst), 2);
        assert_eq!(worker.stats().queue_errors, 2);
        assert_eq!(worker.stats().processed, 0);

        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let queue = Arc::new(MemoryQueue::new("q"));
        queue.push(item("evt_bad", "boom")).await.unwrap();

        let mut worker = AnalysisWorker::new(
            WorkerConfig {
                pop_timeout: Duration::from_secs(30),
                backoff: Duration::from_secs(3600),
            },
            queue,
            Arc::new(FailingAnalyzer),
        );
        let mut state = worker.subscribe_state();
        worker.start().await.unwrap();
        state
            .wait_for(|s| *s == WorkerState::BackingOff)
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        worker.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_keeps_waiting_and_stops_on_cancel() {
        let queue = Arc::new(MemoryQueue::new("q"));
        let mut worker = AnalysisWorker::new(
            WorkerConfig {
                pop_timeout: Duration::from_secs(30),
                backoff: Duration::from_secs(5),
            },
            queue,
            Arc::new(EchoAnalyzer),
        );
        assert_eq!(worker.state(), WorkerState::Idle);
        worker.start().await.unwrap();

        // 여러 번의 pop 타임아웃이 지나도 계속 Running
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(worker.health_check().await.is_healthy());

        worker.stop().await.unwrap();
        assert!(worker.health_check().await.is_unhealthy());
        assert!(worker.stop().await.is_err());
    }
}
