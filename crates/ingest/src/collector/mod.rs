//! 로그 수집 모듈 -- 두 소스에서 원시 로그를 수집합니다.
//!
//! # 수집 소스
//! - [`FileCollector`]: 파일 감시 (tail -f 방식, 파일시스템 알림 구동)
//! - [`SyslogUdpCollector`]: UDP syslog 수신
//!
//! # 아키텍처
//! 각 수집기는 자체 tokio 태스크에서 실행되며, 정규화된 이벤트를
//! [`EventSink`](crate::sink::EventSink)로 제출합니다. 제출 실패는 로그로 남기고
//! 수집 루프는 계속됩니다.

pub mod file;
pub mod syslog_udp;

pub use file::{FileCollector, FileCollectorConfig, FileTailer};
pub use syslog_udp::{SyslogUdpCollector, SyslogUdpConfig};

use watchpost_core::pipeline::HealthStatus;

/// 수집기 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    /// 실행 대기 중
    Idle,
    /// 실행 중
    Running,
    /// 에러로 중단됨
    Error(String),
    /// 정상 종료됨
    Stopped,
}

impl CollectorStatus {
    /// 건강 상태로 변환합니다.
    pub fn health(&self) -> HealthStatus {
        match self {
            Self::Running => HealthStatus::Healthy,
            Self::Idle => HealthStatus::Unhealthy("not started".to_owned()),
            Self::Error(reason) => HealthStatus::Unhealthy(reason.clone()),
            Self::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}
