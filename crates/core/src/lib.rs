//! Watchpost 공통 크레이트
//!
//! 수집기, 인제스트 게이트웨이, 분석 워커가 공유하는 타입과 계약을 정의합니다.
//!
//! - [`event`]: 정규화된 보안 이벤트 ([`SecurityEvent`], [`IngestedEvent`])
//! - [`queue`]: 내구성 FIFO 큐 계약 ([`DurableQueue`])
//! - [`pipeline`]: 모듈 생명주기 trait ([`Pipeline`], [`DynPipeline`])
//! - [`config`]: `watchpost.toml` 설정
//! - [`error`]: 도메인별 에러
//! - [`metrics`]: Prometheus 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod queue;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, PipelineError, QueueError, WatchpostError};

// 설정
pub use config::WatchpostConfig;

// 이벤트
pub use event::{AnalysisResult, EventSource, IngestedEvent, SecurityEvent};

// 파이프라인 trait
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};

// 큐 계약
pub use queue::{DurableQueue, QueueStats, QueueStatus};
