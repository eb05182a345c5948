//! 에러 타입 -- 도메인별 에러 정의

/// Watchpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum WatchpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 큐 에러
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인(모듈) 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 모듈 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 내구성 큐 에러
///
/// 타임아웃은 에러가 아닙니다. `blocking_pop`은 타임아웃 시 `Ok(None)`을 반환합니다.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// 저장소 I/O 실패
    #[error("queue storage error: {0}")]
    Storage(String),

    /// 저장된 레코드 손상
    #[error("corrupt queue record at {position}: {reason}")]
    Corrupt { position: u64, reason: String },

    /// 큐가 닫힘
    #[error("queue closed")]
    Closed,
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_top_level() {
        let err: WatchpostError = ConfigError::InvalidValue {
            field: "worker.backoff_secs".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(err, WatchpostError::Config(_)));
        assert!(err.to_string().contains("worker.backoff_secs"));
    }

    #[test]
    fn queue_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = QueueError::from(io);
        assert!(matches!(err, QueueError::Storage(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn corrupt_record_display() {
        let err = QueueError::Corrupt {
            position: 42,
            reason: "invalid json".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("invalid json"));
    }
}
