//! 내구성 큐 계약 -- 순서가 보장되는 영속 FIFO
//!
//! 게이트웨이가 [`DurableQueue::push`]로 적재하고, 분석 워커가
//! [`DurableQueue::blocking_pop`]으로 소비합니다. 큐 구현체는 동시 push/pop을
//! 내부적으로 직렬화해야 합니다.
//!
//! # 순서 불변식
//! 여러 생산자(파일, syslog)가 push한 항목은 게이트웨이 도착 순서대로 pop됩니다.
//! 소스 유형에 따라 재정렬되지 않습니다.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::pipeline::BoxFuture;

/// 기본 백로그 임계값
pub const DEFAULT_BACKLOG_THRESHOLD: usize = 1000;

/// 순서 보장 영속 FIFO
///
/// 항목은 직렬화된 문자열입니다. 역직렬화는 소비자의 책임입니다.
pub trait DurableQueue: Send + Sync {
    /// 큐 이름
    fn name(&self) -> &str;

    /// 항목을 꼬리에 추가합니다. 무기한 블로킹하지 않습니다.
    fn push(&self, item: String) -> BoxFuture<'_, Result<(), QueueError>>;

    /// 머리 항목을 꺼냅니다.
    ///
    /// 비어 있으면 최대 `timeout`만큼 기다리고, 타임아웃 시 `Ok(None)`을 반환합니다.
    fn blocking_pop(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<String>, QueueError>>;

    /// 현재 길이를 반환합니다.
    fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>>;
}

/// 큐 상태 신호
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// 정상
    Active,
    /// 길이가 임계값 이상, 소비자가 뒤처지고 있음
    Backlogged,
}

impl QueueStatus {
    /// 큐 길이와 임계값으로 상태를 결정합니다.
    pub fn from_length(length: usize, backlog_threshold: usize) -> Self {
        if length >= backlog_threshold {
            Self::Backlogged
        } else {
            Self::Active
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Backlogged => write!(f, "backlogged"),
        }
    }
}

/// 큐 통계 (`GET /queue/stats` 응답)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// 큐 길이
    pub queue_length: usize,
    /// 큐 이름
    pub queue_name: String,
    /// 상태
    pub status: QueueStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_below_threshold_is_active() {
        assert_eq!(
            QueueStatus::from_length(999, DEFAULT_BACKLOG_THRESHOLD),
            QueueStatus::Active
        );
        assert_eq!(QueueStatus::from_length(0, DEFAULT_BACKLOG_THRESHOLD), QueueStatus::Active);
    }

    #[test]
    fn status_at_threshold_is_backlogged() {
        assert_eq!(
            QueueStatus::from_length(1000, DEFAULT_BACKLOG_THRESHOLD),
            QueueStatus::Backlogged
        );
        assert_eq!(
            QueueStatus::from_length(5000, DEFAULT_BACKLOG_THRESHOLD),
            QueueStatus::Backlogged
        );
    }

    #[test]
    fn stats_serialize_wire_shape() {
        let stats = QueueStats {
            queue_length: 3,
            queue_name: "security_events".to_owned(),
            status: QueueStatus::Active,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queue_length"], 3);
        assert_eq!(json["queue_name"], "security_events");
        assert_eq!(json["status"], "active");
    }
}
