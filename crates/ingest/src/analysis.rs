//! 분석기 -- 인제스트된 이벤트를 [`AnalysisResult`]로 변환하는 교체 가능한 계약
//!
//! 실제 분석 엔진이 연결되기 전까지는 [`StubAnalyzer`]가 고정 지연 후
//! 자리표시 결과를 반환합니다.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use watchpost_core::config::WorkerConfig;
use watchpost_core::event::{AnalysisResult, IngestedEvent};
use watchpost_core::pipeline::BoxFuture;

use crate::error::IngestError;

/// 로그에 남길 메시지 미리보기 길이 (문자 수)
const PREVIEW_CHARS: usize = 100;

/// 이벤트 분석기
pub trait Analyzer: Send + Sync {
    /// 이벤트 하나를 분석합니다.
    fn analyze<'a>(
        &'a self,
        event: &'a IngestedEvent,
    ) -> BoxFuture<'a, Result<AnalysisResult, IngestError>>;
}

/// 자리표시 분석기
#[derive(Debug, Clone)]
pub struct StubAnalyzer {
    delay: Duration,
}

impl StubAnalyzer {
    /// 처리 지연을 지정해 생성합니다.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// core의 `WorkerConfig`에서 생성합니다.
    pub fn from_core(core: &WorkerConfig) -> Self {
        Self::new(Duration::from_millis(core.analysis_delay_ms))
    }
}

impl Default for StubAnalyzer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Analyzer for StubAnalyzer {
    fn analyze<'a>(
        &'a self,
        event: &'a IngestedEvent,
    ) -> BoxFuture<'a, Result<AnalysisResult, IngestError>> {
        Box::pin(async move {
            let preview: String = event.event.raw_message.chars().take(PREVIEW_CHARS).collect();
            info!(
                event_id = %event.event_id,
                source = %event.event.source,
                preview = %preview,
                "analyzing event"
            );

            tokio::time::sleep(self.delay).await;

            Ok(AnalysisResult {
                event_id: event.event_id.clone(),
                summary: format!("Pending analysis of {} event", event.event.source),
                risk_score: 0.0,
                recommended_action: "review manually".to_owned(),
                confidence: 0.0,
                analyzed_at: Utc::now(),
            })
        })
    }
}
