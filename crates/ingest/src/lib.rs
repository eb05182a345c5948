//! Watchpost 인제스트 크레이트
//!
//! 두 소스(파일 테일링, UDP syslog)에서 보안 이벤트를 수집해 정규화하고,
//! 인제스트 경계에서 식별자를 부여해 내구성 큐에 적재한 뒤 분석 워커가 소비합니다.
//!
//! # 데이터 흐름
//! ```text
//! FileCollector ──┐
//!                 ├─> normalizer ─> EventSink ─┬─> IngestGateway ─> EnqueueTask ─> DurableQueue ─> AnalysisWorker
//! SyslogUdp ──────┘                            └─> HttpForwarder ─> POST {remote}/ingest
//! ```
//!
//! # 모듈
//! - [`normalizer`]: 원시 입력 -> [`SecurityEvent`](watchpost_core::SecurityEvent)
//! - [`collector`]: 파일/UDP 수집기
//! - [`gateway`]: 검증, ID 부여, 큐 적재
//! - [`queue`]: 인메모리/저널 큐 백엔드
//! - [`forwarder`]: 원격 `/ingest` 전달
//! - [`analysis`]: 분석기 계약과 스텁
//! - [`worker`]: 큐 소비 루프

pub mod analysis;
pub mod collector;
pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod normalizer;
pub mod queue;
pub mod sink;
pub mod worker;

pub use analysis::{Analyzer, StubAnalyzer};
pub use collector::{
    CollectorStatus, FileCollector, FileCollectorConfig, FileTailer, SyslogUdpCollector,
    SyslogUdpConfig,
};
pub use error::IngestError;
pub use forwarder::HttpForwarder;
pub use gateway::{AckMode, EnqueueTask, GatewayConfig, GatewayError, IngestGateway};
pub use normalizer::{normalize_datagram, normalize_file_line};
pub use queue::{JournalQueue, JournalQueueConfig, MemoryQueue, open_queue};
pub use sink::{EventSink, IngestReceipt};
pub use worker::{AnalysisWorker, WorkerConfig, WorkerState, WorkerStats};
