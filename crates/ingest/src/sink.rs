//! 이벤트 싱크 -- 수집기와 인제스트 경계 사이의 연결점
//!
//! 수집기는 [`EventSink`]에만 의존합니다. 같은 프로세스에서는
//! [`IngestGateway`](crate::gateway::IngestGateway)가, 별도 프로세스로 동작할 때는
//! [`HttpForwarder`](crate::forwarder::HttpForwarder)가 싱크가 됩니다.

use serde::{Deserialize, Serialize};

use watchpost_core::event::SecurityEvent;
use watchpost_core::pipeline::BoxFuture;

use crate::error::IngestError;

/// 인제스트 수락 응답 (`{"status":"queued","event_id":...}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// 항상 "queued"
    pub status: String,
    /// 부여된 이벤트 ID
    pub event_id: String,
}

impl IngestReceipt {
    /// 큐 적재 수락 응답을 생성합니다.
    pub fn queued(event_id: impl Into<String>) -> Self {
        Self {
            status: "queued".to_owned(),
            event_id: event_id.into(),
        }
    }
}

/// 정규화된 이벤트를 인제스트 경계로 제출하는 대상
pub trait EventSink: Send + Sync {
    /// 이벤트를 제출합니다.
    fn submit(&self, event: SecurityEvent) -> BoxFuture<'_, Result<IngestReceipt, IngestError>>;
}
