//! 인제스트 에러 타입
//!
//! [`IngestError`]는 수집기, 전달기, 분석 워커 내부에서 발생하는 에러를 표현합니다.
//! `From<IngestError> for WatchpostError` 변환이 구현되어 있어
//! 데몬에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use watchpost_core::error::{PipelineError, QueueError, WatchpostError};

use crate::gateway::GatewayError;

/// 인제스트 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 수집기 에러 (바인드 실패, 감시 등록 실패 등)
    #[error("collector error: {source_type}: {reason}")]
    Collector {
        /// 수집 소스 유형 (file, syslog_udp)
        source_type: String,
        /// 에러 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 게이트웨이가 이벤트를 거절함
    #[error("gateway rejected event: {0}")]
    Gateway(#[from] GatewayError),

    /// 원격 인제스트 전달 실패
    #[error("forward error: {0}")]
    Forward(String),

    /// 분석 실패
    #[error("analysis error: {0}")]
    Analysis(String),

    /// 큐 에러
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for WatchpostError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Queue(e) => WatchpostError::Queue(e),
            IngestError::Io(e) => WatchpostError::Io(e),
            other => WatchpostError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Forward(err.to_string())
    }
}

impl From<notify::Error> for IngestError {
    fn from(err: notify::Error) -> Self {
        IngestError::Collector {
            source_type: "file".to_owned(),
            reason: err.to_string(),
        }
    }
}
