//! 원격 인제스트 전달기
//!
//! 수집기가 백엔드와 다른 프로세스에서 동작할 때 사용하는 [`EventSink`]입니다.
//! 이벤트를 `POST {ingest_url}` JSON 본문으로 전송합니다.

use std::time::Duration;

use watchpost_core::config::ForwarderConfig;
use watchpost_core::event::SecurityEvent;
use watchpost_core::pipeline::BoxFuture;

use crate::error::IngestError;
use crate::sink::{EventSink, IngestReceipt};

/// HTTP 전달기
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    ingest_url: String,
}

impl HttpForwarder {
    /// 설정으로 전달기를 생성합니다.
    pub fn new(config: &ForwarderConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            ingest_url: config.ingest_url.trim().to_owned(),
        })
    }

    /// 전달 대상 URL
    pub fn ingest_url(&self) -> &str {
        &self.ingest_url
    }

    async fn forward(&self, event: SecurityEvent) -> Result<IngestReceipt, IngestError> {
        let response = self.client.post(&self.ingest_url).json(&event).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Forward(format!(
                "ingest endpoint returned {status}: {body}"
            )));
        }

        Ok(response.json::<IngestReceipt>().await?)
    }
}

impl EventSink for HttpForwarder {
    fn submit(&self, event: SecurityEvent) -> BoxFuture<'_, Result<IngestReceipt, IngestError>> {
        Box::pin(self.forward(event))
    }
}
